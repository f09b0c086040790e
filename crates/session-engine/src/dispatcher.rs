//! Message Dispatcher (spec.md §4.F): routes a decoded `CryptoMessage` to
//! its control-message handler or to conversation persistence. Control
//! messages are never persisted as an `EncryptedMessage`; normal messages
//! always are, with exactly one `messageCount` increment apiece.

use chrono::Utc;
use session_proto::{CryptoMessage, DeliveryState, MessageFlags, MessageRecipient, MessageType};
use uuid::Uuid;

use crate::{
    communication::{find_or_create, increment_and_notify, Communication, CommunicationMembers, CommunicationType},
    contact::{find_contact, ContactProps},
    context::{DccKey, SessionContextCell},
    error::EngineError,
    friendship::FriendshipMetadata,
    message_record::{find_by_shared_id, EncryptedMessage},
    model::EncryptedBlob,
    traits::{EventReceiver, SessionDelegate, SessionStore},
};

fn communication_type_for(recipient: &MessageRecipient) -> CommunicationType {
    match recipient {
        MessageRecipient::Nickname { name } => CommunicationType::Nickname { name: name.clone() },
        MessageRecipient::PersonalMessage => CommunicationType::PersonalMessage,
        MessageRecipient::Channel { name } => CommunicationType::Channel { name: name.clone() },
        MessageRecipient::Broadcast => CommunicationType::Broadcast,
    }
}

/// Dispatch one decoded message. `sender` is the already-resolved peer
/// identity the Ratchet Driver handed back alongside the plaintext.
#[allow(clippy::too_many_arguments)]
pub async fn dispatch(
    message: CryptoMessage,
    sender_secret_name: &str,
    sender_device_id: Uuid,
    session_context_id: i64,
    shared_message_id: Uuid,
    cache: &mut Vec<Communication>,
    store: &dyn SessionStore,
    receiver: &dyn EventReceiver,
    delegate: &dyn SessionDelegate,
    context: &SessionContextCell,
    db_key: &[u8; 32],
) -> Result<(), EngineError> {
    match &message.message_type {
        MessageType::Control { flags } => {
            dispatch_control(flags, sender_secret_name, shared_message_id, store, receiver, delegate, context, db_key).await
        }
        MessageType::Normal => {
            persist_normal_message(
                message,
                sender_secret_name,
                sender_device_id,
                session_context_id,
                shared_message_id,
                cache,
                store,
                receiver,
                db_key,
            )
            .await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_control(
    flags: &MessageFlags,
    sender_secret_name: &str,
    shared_message_id: Uuid,
    store: &dyn SessionStore,
    receiver: &dyn EventReceiver,
    delegate: &dyn SessionDelegate,
    context: &SessionContextCell,
    db_key: &[u8; 32],
) -> Result<(), EngineError> {
    match flags {
        MessageFlags::FriendshipStateRequest { metadata } => {
            // The request carries the sender's own view of the friendship;
            // switch perspective before folding it into ours (§4.G).
            let mut incoming: FriendshipMetadata = serde_json::from_value(metadata.clone())
                .map_err(|e| EngineError::PropsError(e.to_string()))?;
            incoming.switch_states();
            incoming.update_our_state();

            let contact_blobs = store.fetch_all_contacts().await.map_err(EngineError::Store)?;
            let final_state = match find_contact(&contact_blobs, db_key, sender_secret_name) {
                Some(mut decrypted) => {
                    let mut props = decrypted.props.clone();
                    props.friendship.their_state = incoming.their_state;
                    props.friendship.update_our_state();
                    props.updated_at = Utc::now();
                    let blob = decrypted.update_props(db_key, props.clone())?;
                    store.update_contact(blob).await.map_err(EngineError::Store)?;
                    props.friendship.our_state
                }
                None => {
                    let mut props = ContactProps::new(sender_secret_name.to_string());
                    props.friendship.their_state = incoming.their_state;
                    props.friendship.update_our_state();
                    let blob = EncryptedBlob::seal(Uuid::new_v4(), db_key, &props)?;
                    store.create_contact(blob).await.map_err(EngineError::Store)?;
                    props.friendship.our_state
                }
            };

            delegate
                .request_friendship_state_change(sender_secret_name, None, metadata, &format!("{final_state:?}"))
                .await;
        }
        MessageFlags::DeliveryStateChange { shared_id, state } => {
            let message_blobs = store.fetch_all_messages().await.map_err(EngineError::Store)?;
            if let Some(mut existing) = find_by_shared_id(&message_blobs, db_key, shared_id) {
                existing.props.delivery_state = *state;
                let props = existing.props.clone();
                let blob = existing.update_props(db_key, props)?;
                store.update_message(blob).await.map_err(EngineError::Store)?;
                delegate.delivery_state_changed(shared_id, *state).await;
            }
        }
        MessageFlags::EditMessage { shared_id, text } => {
            let message_blobs = store.fetch_all_messages().await.map_err(EngineError::Store)?;
            if let Some(mut existing) = find_by_shared_id(&message_blobs, db_key, shared_id) {
                existing.props.content.text = text.clone();
                let props = existing.props.clone();
                let blob = existing.update_props(db_key, props.clone())?;
                store.update_message(blob).await.map_err(EngineError::Store)?;
                receiver.message_updated(&props).await;
                delegate.edit_message(shared_id, text).await;
            }
        }
        MessageFlags::EditMessageMetadata { shared_id, key, reaction } => {
            let message_blobs = store.fetch_all_messages().await.map_err(EngineError::Store)?;
            if let Some(mut existing) = find_by_shared_id(&message_blobs, db_key, shared_id) {
                let mut props = existing.props.clone();
                if let Some(obj) = props.content.metadata.as_object_mut() {
                    obj.insert(key.clone(), serde_json::Value::String(reaction.clone()));
                }
                let blob = existing.update_props(db_key, props.clone())?;
                store.update_message(blob).await.map_err(EngineError::Store)?;
                receiver.message_updated(&props).await;
            }
        }
        MessageFlags::CommunicationSynchronization { shared_id } => {
            let _ = shared_id;
            delegate
                .synchronize_communication(sender_secret_name, shared_message_id)
                .await;
            receiver.synchronize(sender_secret_name, false).await;
        }
        MessageFlags::ContactCreated => {
            delegate.contact_created(sender_secret_name).await;
            receiver.contact_created(sender_secret_name).await;
        }
        MessageFlags::AddContacts { contacts } => {
            for contact in contacts {
                receiver.contact_created(contact).await;
            }
        }
        MessageFlags::RevokeMessage { shared_id } => {
            let message_blobs = store.fetch_all_messages().await.map_err(EngineError::Store)?;
            if let Some(existing) = find_by_shared_id(&message_blobs, db_key, shared_id) {
                store.delete_message(existing.id).await.map_err(EngineError::Store)?;
                receiver.message_deleted(existing.id).await;
            }
        }
        MessageFlags::DccSymmetricKey { key } => {
            let dcc_key = DccKey {
                sender_secret_name: sender_secret_name.to_string(),
                key: key.clone(),
                received_at: Utc::now(),
            };
            context.with_mut(|ctx| ctx.dcc_keys.push(dcc_key));
            if let Some(ctx) = context.get() {
                let blob = EncryptedBlob::seal(Uuid::nil(), db_key, &ctx)?;
                store.update_session_context(blob).await.map_err(EngineError::Store)?;
            }
            receiver
                .local_nudge("dcc_symmetric_key", &serde_json::json!({ "key_len": key.len() }))
                .await;
        }
        MessageFlags::Unknown { name, metadata } => {
            receiver.local_nudge(name, metadata).await;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn persist_normal_message(
    message: CryptoMessage,
    sender_secret_name: &str,
    sender_device_id: Uuid,
    session_context_id: i64,
    shared_message_id: Uuid,
    cache: &mut Vec<Communication>,
    store: &dyn SessionStore,
    receiver: &dyn EventReceiver,
    db_key: &[u8; 32],
) -> Result<(), EngineError> {
    let communication_type = communication_type_for(&message.recipient);
    let members: CommunicationMembers = [sender_secret_name.to_string()].into_iter().collect();

    let communication = find_or_create(store, receiver, db_key, cache, communication_type, members).await?;
    let communication = increment_and_notify(store, receiver, db_key, communication).await?;

    if let Some(slot) = cache.iter_mut().find(|c| c.id == communication.id) {
        *slot = communication.clone();
    }

    let record = EncryptedMessage {
        id: Uuid::new_v4(),
        communication_id: communication.id,
        session_context_id,
        shared_id: shared_message_id.to_string(),
        sequence_number: communication.message_count,
        send_date: message.sent_date,
        delivery_state: DeliveryState::Received,
        content: message,
        senders_secret_name: sender_secret_name.to_string(),
        senders_device_id: sender_device_id,
    };

    let blob = EncryptedBlob::seal(record.id, db_key, &record)?;
    store.create_message(blob).await.map_err(EngineError::Store)?;
    receiver.message_created(&record).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::tests::{FakeEventReceiver, FakeStore};
    use chrono::Utc;
    use session_proto::PushType;

    const DB_KEY: [u8; 32] = [7u8; 32];

    fn normal_message(recipient: MessageRecipient) -> CryptoMessage {
        CryptoMessage {
            text: "hi".into(),
            sent_date: Utc::now(),
            recipient,
            metadata: serde_json::Value::Null,
            transport_info: vec![],
            message_type: MessageType::Normal,
            push_type: PushType::None,
        }
    }

    #[tokio::test]
    async fn normal_message_increments_count_exactly_once() {
        let store = FakeStore::new();
        let receiver = FakeEventReceiver::default();
        let mut cache = Vec::new();
        let context = SessionContextCell::new();

        dispatch(
            normal_message(MessageRecipient::Nickname { name: "bob".into() }),
            "bob",
            Uuid::new_v4(),
            1,
            Uuid::new_v4(),
            &mut cache,
            store.as_ref(),
            &receiver,
            &crate::traits::tests::FakeDelegate,
            &context,
            &DB_KEY,
        )
        .await
        .unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache[0].message_count, 1);
        assert_eq!(receiver.created_messages.lock().len(), 1);
        assert_eq!(receiver.created_messages.lock()[0].sequence_number, 1);
    }

    #[tokio::test]
    async fn control_message_is_never_persisted() {
        let store = FakeStore::new();
        let receiver = FakeEventReceiver::default();
        let mut cache = Vec::new();
        let context = SessionContextCell::new();

        let mut message = normal_message(MessageRecipient::PersonalMessage);
        message.message_type = MessageType::Control {
            flags: MessageFlags::ContactCreated,
        };

        dispatch(
            message,
            "alice",
            Uuid::new_v4(),
            1,
            Uuid::new_v4(),
            &mut cache,
            store.as_ref(),
            &receiver,
            &crate::traits::tests::FakeDelegate,
            &context,
            &DB_KEY,
        )
        .await
        .unwrap();

        assert!(cache.is_empty());
        assert!(receiver.created_messages.lock().is_empty());
    }

    #[tokio::test]
    async fn revoke_message_deletes_existing_record() {
        let store = FakeStore::new();
        let receiver = FakeEventReceiver::default();
        let mut cache = Vec::new();
        let context = SessionContextCell::new();

        dispatch(
            normal_message(MessageRecipient::Nickname { name: "bob".into() }),
            "bob",
            Uuid::new_v4(),
            1,
            Uuid::new_v4(),
            &mut cache,
            store.as_ref(),
            &receiver,
            &crate::traits::tests::FakeDelegate,
            &context,
            &DB_KEY,
        )
        .await
        .unwrap();
        let shared_id = receiver.created_messages.lock()[0].shared_id.clone();

        let mut revoke = normal_message(MessageRecipient::Nickname { name: "bob".into() });
        revoke.message_type = MessageType::Control {
            flags: MessageFlags::RevokeMessage { shared_id },
        };

        dispatch(
            revoke,
            "bob",
            Uuid::new_v4(),
            1,
            Uuid::new_v4(),
            &mut cache,
            store.as_ref(),
            &receiver,
            &crate::traits::tests::FakeDelegate,
            &context,
            &DB_KEY,
        )
        .await
        .unwrap();

        assert!(store.messages.lock().is_empty());
    }
}
