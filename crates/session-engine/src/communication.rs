//! `Communication` (spec.md §3) and Communication Bookkeeping (§4.H):
//! find-or-create, monotonic counter increments, and receiver
//! notification.

use std::collections::HashSet;

use serde_json::Value as MetadataDocument;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::EngineError, model::EncryptedBlob, traits::EventReceiver};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommunicationType {
    Nickname { name: String },
    PersonalMessage,
    Channel { name: String },
    Broadcast,
}

pub type CommunicationMembers = HashSet<String>;

/// Per-conversation record (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Communication {
    pub id: Uuid,
    pub shared_id: Option<Uuid>,
    pub message_count: u64,
    pub members: CommunicationMembers,
    pub administrator: Option<String>,
    pub operators: HashSet<String>,
    pub blocked_members: HashSet<String>,
    pub metadata: MetadataDocument,
    pub communication_type: CommunicationType,
}

impl Communication {
    pub fn new(communication_type: CommunicationType, members: CommunicationMembers) -> Self {
        Self {
            id: Uuid::new_v4(),
            shared_id: None,
            message_count: 0,
            members,
            administrator: None,
            operators: HashSet::new(),
            blocked_members: HashSet::new(),
            metadata: MetadataDocument::Null,
            communication_type,
        }
    }
}

/// `findCommunicationType(cache, type) -> Communication`: scans the given
/// cache of already-loaded communications for a matching type. Returns
/// `None` if the caller must create one via [`Communication::new`].
pub fn find_communication_type<'a>(
    cache: &'a [Communication],
    communication_type: &CommunicationType,
) -> Option<&'a Communication> {
    cache.iter().find(|c| &c.communication_type == communication_type)
}

/// Increment the conversation's monotonic `messageCount` and notify the
/// receiver, persisting the read-modify-write through `store`. The
/// increment happens inside the serialized executor's single-runner
/// context (§4.D), so concurrent inbound messages for the same
/// conversation never race here.
pub async fn increment_and_notify(
    store: &dyn crate::traits::SessionStore,
    receiver: &dyn EventReceiver,
    db_key: &[u8; 32],
    mut communication: Communication,
) -> Result<Communication, EngineError> {
    communication.message_count += 1;
    let blob = EncryptedBlob::seal(communication.id, db_key, &communication)?;
    store.update_communication(blob).await.map_err(EngineError::Store)?;
    receiver
        .updated_communication(&communication, &communication.members)
        .await;
    Ok(communication)
}

/// `findCommunicationType(cache, type)` backed by the store, creating via
/// `createCommunicationModel` when no match exists. Both paths persist.
pub async fn find_or_create(
    store: &dyn crate::traits::SessionStore,
    receiver: &dyn EventReceiver,
    db_key: &[u8; 32],
    cache: &mut Vec<Communication>,
    communication_type: CommunicationType,
    members: CommunicationMembers,
) -> Result<Communication, EngineError> {
    if let Some(existing) = find_communication_type(cache, &communication_type) {
        return Ok(existing.clone());
    }

    let communication = Communication::new(communication_type, members);
    let blob = EncryptedBlob::seal(communication.id, db_key, &communication)?;
    store.create_communication(blob).await.map_err(EngineError::Store)?;
    receiver
        .updated_communication(&communication, &communication.members)
        .await;
    cache.push(communication.clone());
    Ok(communication)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::tests::{FakeEventReceiver, FakeStore};

    const DB_KEY: [u8; 32] = [7u8; 32];

    #[tokio::test]
    async fn find_or_create_is_idempotent_and_leaves_count_unchanged() {
        let store = FakeStore::new();
        let receiver = FakeEventReceiver::default();
        let mut cache = Vec::new();
        let members: CommunicationMembers = ["bob".to_string()].into_iter().collect();

        let first = find_or_create(
            store.as_ref(),
            &receiver,
            &DB_KEY,
            &mut cache,
            CommunicationType::Nickname { name: "bob".into() },
            members.clone(),
        )
        .await
        .unwrap();

        let second = find_or_create(
            store.as_ref(),
            &receiver,
            &DB_KEY,
            &mut cache,
            CommunicationType::Nickname { name: "bob".into() },
            members,
        )
        .await
        .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.message_count, 0);
    }

    #[tokio::test]
    async fn increment_and_notify_bumps_count_and_fires_receiver() {
        let store = FakeStore::new();
        let receiver = FakeEventReceiver::default();
        let communication = Communication::new(CommunicationType::PersonalMessage, CommunicationMembers::new());

        let updated = increment_and_notify(store.as_ref(), &receiver, &DB_KEY, communication)
            .await
            .unwrap();

        assert_eq!(updated.message_count, 1);
        assert_eq!(receiver.updated_communications.lock().len(), 1);
    }
}
