//! Ratchet Driver (spec.md §4.E): per-identity sender/recipient
//! initialization, one-time-key consumption, stashing of out-of-order
//! initial messages, decrypt/encrypt, and signature verification. The
//! single most involved component (§2: 25% share).

use std::sync::Arc;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use parking_lot::Mutex;
use ratchet_core::{
    handshake::{LocalKeyMaterial, RemoteKeyMaterial},
    manager::RatchetStateManager,
};
use session_proto::{
    codec, CryptoMessage, RatchetHeader, RatchetMessage, SignedRatchetMessage,
    SignedRatchetMessageMetadata,
};
use uuid::Uuid;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use crate::{
    context::SessionContextCell,
    error::EngineError,
    identity::SessionIdentityProps,
    job::{InboundTaskMessage, OutboundTaskMessage},
    model::{Decrypted, EncryptedBlob},
    traits::{KeysType, SessionDelegate, SessionStore, SessionTransport},
};

/// The per-database symmetric key (spec.md §3 "per-database symmetric
/// key"). Owned by whoever constructs the driver; never logged.
pub type DbKey = [u8; 32];

/// One decoded inbound message, ready to hand to the dispatcher.
pub struct DecodedInbound {
    pub message: CryptoMessage,
    pub sender_secret_name: String,
    pub sender_device_id: Uuid,
    pub session_context_id: i64,
    pub shared_message_id: Uuid,
}

pub struct RatchetDriver {
    manager: Arc<dyn RatchetStateManager>,
    context: SessionContextCell,
    db_key: DbKey,
    /// Messages stashed because their peer's initial handshake message
    /// hadn't arrived yet (§4.E.2 step 6). In-memory only per §9.
    stash: Mutex<Vec<InboundTaskMessage>>,
}

impl RatchetDriver {
    pub fn new(manager: Arc<dyn RatchetStateManager>, context: SessionContextCell, db_key: DbKey) -> Self {
        Self {
            manager,
            context,
            db_key,
            stash: Mutex::new(Vec::new()),
        }
    }

    fn load_identity(
        &self,
        identities: &[EncryptedBlob],
        identity_id: Uuid,
    ) -> Result<Decrypted<SessionIdentityProps>, EngineError> {
        identities
            .iter()
            .find(|blob| blob.id == identity_id)
            .and_then(|blob| blob.open::<SessionIdentityProps>(&self.db_key))
            .ok_or(EngineError::MissingSessionIdentity(identity_id))
    }

    fn find_identity_by_device(
        &self,
        identities: &[EncryptedBlob],
        device_id: Uuid,
    ) -> Result<Decrypted<SessionIdentityProps>, EngineError> {
        identities
            .iter()
            .filter_map(|blob| blob.open::<SessionIdentityProps>(&self.db_key))
            .find(|d| d.props.device_id == device_id)
            .ok_or(EngineError::MissingSessionIdentity(device_id))
    }

    /// `removeUsedKeys` (shared by §4.E.1 and §4.E.2): delete the consumed
    /// one-time keys from the transport and from the persisted session
    /// context (both private and signed-public sequences).
    async fn remove_used_keys(
        &self,
        curve_id: Option<Uuid>,
        kyber_id: Option<Uuid>,
        transport: &dyn SessionTransport,
        store: &dyn SessionStore,
    ) -> Result<(), EngineError> {
        if let Some(id) = curve_id {
            transport
                .delete_one_time_key(id, KeysType::Curve)
                .await
                .map_err(EngineError::Transport)?;
        }
        if let Some(id) = kyber_id {
            transport
                .delete_one_time_key(id, KeysType::Kyber)
                .await
                .map_err(EngineError::Transport)?;
        }

        self.context.with_mut(|ctx| {
            if let Some(id) = curve_id {
                ctx.session_user.device_keys.remove_one_time_key(id);
                if let Some(config) = ctx.last_user_configuration.as_mut() {
                    config.drop_one_time_key(id);
                }
            }
            if let Some(id) = kyber_id {
                ctx.session_user.device_keys.remove_kyber_one_time_key(id);
                if let Some(config) = ctx.last_user_configuration.as_mut() {
                    config.drop_kyber_one_time_key(id);
                }
            }
        });

        if let Some(ctx) = self.context.get() {
            let blob = EncryptedBlob::seal(Uuid::nil(), &self.db_key, &ctx)?;
            store
                .update_session_context(blob)
                .await
                .map_err(EngineError::Store)?;
        }

        Ok(())
    }

    /// §4.E.1 — `handleWriteMessage`.
    pub async fn handle_write_message(
        &self,
        outbound: OutboundTaskMessage,
        identities: &[EncryptedBlob],
        store: &dyn SessionStore,
        transport: &dyn SessionTransport,
        delegate: &dyn SessionDelegate,
    ) -> Result<SignedRatchetMessage, EngineError> {
        let mut identity = self.load_identity(identities, outbound.recipient_identity)?;

        let ctx = self
            .context
            .get()
            .ok_or(EngineError::SessionNotInitialized)?;
        let signing_key = SigningKey::from_bytes(&ctx.session_user.device_keys.private_signing_key);
        let my_long_term = StaticSecret::from(ctx.session_user.device_keys.private_long_term_key);

        let remote_long_term = X25519Public::from(identity.props.public_long_term_key);
        let remote_one_time = identity.props.remote_one_time_key.map(X25519Public::from);
        let remote_kyber = identity.props.remote_kyber_key.clone().unwrap_or_default();

        let message = delegate.update_crypto_message_metadata(outbound.message, &outbound.shared_id);
        let plaintext = codec::encode(&message)?;

        let (ratchet_bytes, ratchet_message, consumed_keys) = if identity.props.is_uninitialized() {
            // Key selection: the most recent local one-time keys, consumed by
            // this handshake.
            let curve_key = self
                .context
                .with_mut(|c| c.session_user.device_keys.take_latest_one_time_key())
                .flatten();
            let kyber_key = self
                .context
                .with_mut(|c| c.session_user.device_keys.take_latest_kyber_one_time_key())
                .flatten();
            let kyber_id = kyber_key.as_ref().map(|k| k.id);
            let curve_secret = curve_key.as_ref().map(|k| StaticSecret::from(k.scalar));

            let local = LocalKeyMaterial {
                long_term: &my_long_term,
                one_time: curve_secret.as_ref(),
                kyber_decapsulation: None,
            };
            let remote = RemoteKeyMaterial {
                long_term: &remote_long_term,
                one_time: remote_one_time.as_ref(),
                kyber_public: &remote_kyber,
            };

            let new_session = self.manager.start_outbound_session(
                &local,
                &remote,
                &remote_long_term,
                &plaintext,
                outbound.shared_id.as_bytes(),
            )?;

            let header = RatchetHeader {
                remote_public_long_term_key: remote_long_term.to_bytes(),
                remote_public_one_time_key: remote_one_time.map(|k| k.to_bytes()),
                remote_kyber1024_public_key: remote_kyber.clone(),
                curve_one_time_key_id: curve_key.as_ref().map(|k| k.id),
                kyber_one_time_key_id: kyber_id,
                dh_ratchet: new_session.ciphertext.header,
            };
            let ratchet_message = RatchetMessage {
                header,
                ciphertext: new_session.ciphertext.sealed,
                kyber_ciphertext: new_session.ciphertext.kyber_ciphertext,
            };

            (
                new_session.state,
                ratchet_message,
                Some((curve_key.map(|k| k.id), kyber_id)),
            )
        } else {
            let state = identity
                .props
                .state
                .clone()
                .expect("checked non-uninitialized above");
            let (new_state, ciphertext) =
                self.manager.encrypt(&state, &plaintext, outbound.shared_id.as_bytes())?;

            let header = RatchetHeader {
                remote_public_long_term_key: remote_long_term.to_bytes(),
                remote_public_one_time_key: remote_one_time.map(|k| k.to_bytes()),
                remote_kyber1024_public_key: remote_kyber,
                curve_one_time_key_id: None,
                kyber_one_time_key_id: None,
                dh_ratchet: ciphertext.header,
            };
            let ratchet_message = RatchetMessage {
                header,
                ciphertext: ciphertext.sealed,
                kyber_ciphertext: None,
            };
            (new_state, ratchet_message, None)
        };

        identity.props.state = Some(ratchet_bytes);
        let updated_blob = identity.update_props(&self.db_key, identity.props.clone())?;
        store
            .update_identity(updated_blob)
            .await
            .map_err(EngineError::Store)?;

        if let Some((curve_id, kyber_id)) = consumed_keys {
            self.remove_used_keys(curve_id, kyber_id, transport, store).await?;
        }

        let data = codec::encode(&ratchet_message)?;
        let signature = signing_key.sign(&data).to_bytes().to_vec();
        let signed = SignedRatchetMessage { data, signature };

        let metadata = SignedRatchetMessageMetadata {
            recipient_secret_name: identity.props.secret_name.clone(),
            recipient_device_id: identity.props.device_id,
            recipient_tag: None,
            transport_info: message.transport_info.clone(),
            shared_message_id: Uuid::new_v4(),
        };
        transport
            .send_message(signed.clone(), metadata)
            .await
            .map_err(EngineError::Transport)?;

        Ok(signed)
    }

    /// §4.E.2 — `handleStreamMessage`. Drains the stash first, then
    /// processes `inbound`. Returns the decoded messages ready for dispatch,
    /// in (stash..., current) order.
    pub async fn handle_stream_message(
        &self,
        inbound: InboundTaskMessage,
        identities: &[EncryptedBlob],
        store: &dyn SessionStore,
        transport: &dyn SessionTransport,
        delegate: &dyn SessionDelegate,
    ) -> Result<Vec<DecodedInbound>, EngineError> {
        let mut ready = Vec::new();

        let drained: Vec<InboundTaskMessage> = std::mem::take(&mut *self.stash.lock());
        for stashed in drained {
            if let Ok(decoded) = self
                .try_decode_inbound(&stashed, identities, store, transport, delegate)
                .await
            {
                ready.push(decoded);
            }
            // Failures during drain are discarded silently — a stashed task
            // is retried at most once per subsequent inbound (§8 "Stash").
        }

        match self
            .try_decode_inbound(&inbound, identities, store, transport, delegate)
            .await
        {
            Ok(decoded) => ready.push(decoded),
            Err(EngineError::InitialMessageNotReceived) => {
                self.stash.lock().push(inbound);
            }
            Err(e) => return Err(e),
        }

        Ok(ready)
    }

    async fn try_decode_inbound(
        &self,
        inbound: &InboundTaskMessage,
        identities: &[EncryptedBlob],
        store: &dyn SessionStore,
        transport: &dyn SessionTransport,
        _delegate: &dyn SessionDelegate,
    ) -> Result<DecodedInbound, EngineError> {
        let mut identity = self.find_identity_by_device(identities, inbound.sender_device_id)?;

        let verifying_key = VerifyingKey::from_bytes(&identity.props.public_signing_key)
            .map_err(|_| EngineError::InvalidSignature)?;
        let signature = Signature::from_slice(&inbound.message.signature)
            .map_err(|_| EngineError::InvalidSignature)?;
        verifying_key
            .verify(&inbound.message.data, &signature)
            .map_err(|_| EngineError::InvalidSignature)?;

        let ratchet_message: RatchetMessage = codec::decode(&inbound.message.data)?;

        let ctx = self
            .context
            .get()
            .ok_or(EngineError::SessionNotInitialized)?;

        let (new_state, plaintext) = if identity.props.is_uninitialized() {
            let Some(kyber_ciphertext) = ratchet_message.kyber_ciphertext.as_ref() else {
                return Err(EngineError::InitialMessageNotReceived);
            };

            let curve_secret = ratchet_message
                .header
                .curve_one_time_key_id
                .and_then(|id| {
                    ctx.session_user
                        .device_keys
                        .private_one_time_keys
                        .iter()
                        .find(|k| k.id == id)
                })
                .map(|k| StaticSecret::from(k.scalar));

            let kyber_stored = ratchet_message
                .header
                .kyber_one_time_key_id
                .and_then(|id| {
                    ctx.session_user
                        .device_keys
                        .private_kyber_one_time_keys
                        .iter()
                        .find(|k| k.id == id)
                })
                .unwrap_or(&ctx.session_user.device_keys.final_kyber_private_key);
            let decapsulation_key = ratchet_core::decapsulation_key_from_bytes(&kyber_stored.secret)?;

            let my_long_term = StaticSecret::from(ctx.session_user.device_keys.private_long_term_key);
            let my_long_term_pub = X25519Public::from(&my_long_term);

            let local = LocalKeyMaterial {
                long_term: &my_long_term,
                one_time: curve_secret.as_ref(),
                kyber_decapsulation: Some(&decapsulation_key),
            };
            // The header's "remote" fields are written from the sender's
            // perspective and name *our* keys; the sender's own long-term
            // key lives on the already-resolved identity instead.
            let sender_long_term = X25519Public::from(identity.props.public_long_term_key);
            let sender_ratchet_public = X25519Public::from(ratchet_message.header.dh_ratchet.dh_pub);

            let (state, plaintext) = self.manager.start_inbound_session(
                &local,
                &my_long_term,
                &my_long_term_pub,
                &sender_long_term,
                &sender_ratchet_public,
                kyber_ciphertext,
                &ratchet_message.header.dh_ratchet,
                &ratchet_message.ciphertext,
                inbound.shared_message_id.as_bytes(),
            )?;

            if let Some(id) = ratchet_message.header.curve_one_time_key_id {
                self.remove_used_keys(Some(id), None, transport, store).await?;
            }
            if let Some(id) = ratchet_message.header.kyber_one_time_key_id {
                self.remove_used_keys(None, Some(id), transport, store).await?;
            }

            (state, plaintext)
        } else {
            let state = identity
                .props
                .state
                .clone()
                .expect("checked non-uninitialized above");
            self.manager.decrypt(
                &state,
                &ratchet_message.header.dh_ratchet,
                &ratchet_message.ciphertext,
                inbound.shared_message_id.as_bytes(),
            )?
        };

        identity.props.state = Some(new_state);
        let updated_blob = identity.update_props(&self.db_key, identity.props.clone())?;
        store
            .update_identity(updated_blob)
            .await
            .map_err(EngineError::Store)?;

        let message: CryptoMessage = codec::decode(&plaintext)?;
        Ok(DecodedInbound {
            message,
            sender_secret_name: identity.props.secret_name.clone(),
            sender_device_id: identity.props.device_id,
            session_context_id: identity.props.session_context_id,
            shared_message_id: inbound.shared_message_id,
        })
    }
}
