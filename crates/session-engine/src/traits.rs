//! External capability sets (spec.md §6; design note §9 "Dynamic delegate
//! dispatch"): four trait interfaces the core programs against without
//! ever introspecting their concrete types. Implementations are held as
//! single-owner handles established at startup.

use async_trait::async_trait;
use serde_json::Value as MetadataDocument;
use session_proto::{CryptoMessage, SignedRatchetMessage, SignedRatchetMessageMetadata};
use uuid::Uuid;

use crate::{
    communication::{Communication, CommunicationMembers},
    context::UserConfiguration,
    message_record::EncryptedMessage,
    model::EncryptedBlob,
};

/// Which family a one-time-key operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeysType {
    Curve,
    Kyber,
}

/// Freshly rotated signed public keys, as published after a key refresh.
#[derive(Debug, Clone)]
pub struct RotatedPublicKeys {
    pub signing_public_key: [u8; 32],
    pub long_term_public_key: [u8; 32],
    pub signature: Vec<u8>,
}

/// §6.1 — operations the core requires of the persistent store. The core
/// treats every method as fallible with an opaque, implementation-defined
/// error string (spec.md §7 "Transport: any user-defined").
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session_context(&self, blob: EncryptedBlob) -> Result<(), String>;
    async fn fetch_session_context(&self) -> Result<Option<EncryptedBlob>, String>;
    async fn update_session_context(&self, blob: EncryptedBlob) -> Result<(), String>;
    async fn delete_session_context(&self) -> Result<(), String>;

    async fn fetch_device_salt(&self) -> Result<Option<Vec<u8>>, String>;
    async fn delete_device_salt(&self) -> Result<(), String>;

    async fn create_identity(&self, blob: EncryptedBlob) -> Result<(), String>;
    async fn fetch_all_identities(&self) -> Result<Vec<EncryptedBlob>, String>;
    async fn update_identity(&self, blob: EncryptedBlob) -> Result<(), String>;
    async fn delete_identity(&self, id: Uuid) -> Result<(), String>;

    async fn create_contact(&self, blob: EncryptedBlob) -> Result<(), String>;
    async fn fetch_all_contacts(&self) -> Result<Vec<EncryptedBlob>, String>;
    async fn update_contact(&self, blob: EncryptedBlob) -> Result<(), String>;
    async fn delete_contact(&self, id: Uuid) -> Result<(), String>;

    async fn create_communication(&self, blob: EncryptedBlob) -> Result<(), String>;
    async fn fetch_all_communications(&self) -> Result<Vec<EncryptedBlob>, String>;
    async fn update_communication(&self, blob: EncryptedBlob) -> Result<(), String>;
    async fn delete_communication(&self, id: Uuid) -> Result<(), String>;

    async fn create_message(&self, blob: EncryptedBlob) -> Result<(), String>;
    async fn update_message(&self, blob: EncryptedBlob) -> Result<(), String>;
    async fn delete_message(&self, id: Uuid) -> Result<(), String>;
    async fn fetch_all_messages(&self) -> Result<Vec<EncryptedBlob>, String>;

    async fn create_job(&self, blob: EncryptedBlob) -> Result<(), String>;
    async fn read_all_jobs(&self) -> Result<Vec<EncryptedBlob>, String>;
    async fn update_job(&self, blob: EncryptedBlob) -> Result<(), String>;
    async fn delete_job(&self, id: Uuid) -> Result<(), String>;

    async fn create_media_job(&self, blob: EncryptedBlob) -> Result<(), String>;
    async fn fetch_all_media_jobs(&self) -> Result<Vec<EncryptedBlob>, String>;
    async fn fetch_media_job_by_id(&self, id: Uuid) -> Result<Option<EncryptedBlob>, String>;
    async fn delete_media_job(&self, id: Uuid) -> Result<(), String>;
}

/// §6.2 — the network transport.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn send_message(
        &self,
        message: SignedRatchetMessage,
        metadata: SignedRatchetMessageMetadata,
    ) -> Result<(), String>;

    async fn find_configuration(&self, secret_name: &str) -> Result<UserConfiguration, String>;

    async fn publish_user_configuration(
        &self,
        configuration: UserConfiguration,
        recipient: Uuid,
    ) -> Result<(), String>;

    async fn fetch_one_time_key(
        &self,
        secret_name: &str,
        device_id: Uuid,
        keys_type: KeysType,
    ) -> Result<Option<Vec<u8>>, String>;

    async fn update_one_time_keys(
        &self,
        secret_name: &str,
        device_id: Uuid,
        keys_type: KeysType,
        public_keys: Vec<Vec<u8>>,
    ) -> Result<(), String>;

    async fn delete_one_time_key(&self, id: Uuid, keys_type: KeysType) -> Result<(), String>;
    async fn batch_delete_one_time_keys(&self, ids: Vec<Uuid>, keys_type: KeysType) -> Result<(), String>;

    async fn publish_rotated_keys(
        &self,
        secret_name: &str,
        device_id: Uuid,
        keys: RotatedPublicKeys,
    ) -> Result<(), String>;

    async fn create_upload_packet(
        &self,
        secret_name: &str,
        device_id: Uuid,
        recipient: Uuid,
        metadata: MetadataDocument,
    ) -> Result<Vec<u8>, String>;
}

/// §6.3 — application callbacks fired after persistence.
#[async_trait]
pub trait EventReceiver: Send + Sync {
    async fn message_created(&self, message: &EncryptedMessage) {
        let _ = message;
    }
    async fn message_updated(&self, message: &EncryptedMessage) {
        let _ = message;
    }
    async fn message_deleted(&self, id: Uuid) {
        let _ = id;
    }

    async fn contact_created(&self, secret_name: &str) {
        let _ = secret_name;
    }
    async fn contact_removed(&self, secret_name: &str) {
        let _ = secret_name;
    }
    async fn contact_updated(&self, secret_name: &str) {
        let _ = secret_name;
    }
    async fn contact_metadata_changed(&self, secret_name: &str, metadata: &MetadataDocument) {
        let _ = (secret_name, metadata);
    }

    async fn synchronize(&self, contact: &str, request_friendship: bool) {
        let _ = (contact, request_friendship);
    }
    async fn transport_contact_metadata(&self, contact: &str, metadata: &MetadataDocument) {
        let _ = (contact, metadata);
    }

    async fn updated_communication(&self, communication: &Communication, members: &CommunicationMembers) {
        let _ = (communication, members);
    }
    async fn created_channel(&self, communication: &Communication) {
        let _ = communication;
    }

    /// Generic fallback for any control-message type this build doesn't
    /// recognize by name (spec.md §4.F "Unknown control").
    async fn local_nudge(&self, flag_name: &str, metadata: &MetadataDocument) {
        let _ = (flag_name, metadata);
    }
}

/// §6.4 — application policy hooks, consulted inline by the driver and
/// dispatcher.
#[async_trait]
pub trait SessionDelegate: Send + Sync {
    async fn synchronize_communication(&self, recipient: &str, shared_identifier: Uuid) {
        let _ = (recipient, shared_identifier);
    }
    async fn request_friendship_state_change(
        &self,
        recipient: &str,
        block_data: Option<&[u8]>,
        metadata: &MetadataDocument,
        current_state: &str,
    ) {
        let _ = (recipient, block_data, metadata, current_state);
    }
    async fn delivery_state_changed(&self, shared_id: &str, state: session_proto::DeliveryState) {
        let _ = (shared_id, state);
    }
    async fn contact_created(&self, secret_name: &str) {
        let _ = secret_name;
    }
    async fn request_metadata(&self, secret_name: &str) -> MetadataDocument {
        let _ = secret_name;
        MetadataDocument::Null
    }
    async fn edit_message(&self, shared_id: &str, text: &str) {
        let _ = (shared_id, text);
    }

    fn should_persist(&self, transport_info: &[u8]) -> bool {
        let _ = transport_info;
        true
    }
    fn retrieve_user_info(&self, transport_info: &[u8]) -> Option<(String, Uuid)> {
        let _ = transport_info;
        None
    }

    fn update_crypto_message_metadata(&self, message: CryptoMessage, _shared_id: &str) -> CryptoMessage {
        message
    }
    fn update_encryptable_message_metadata(
        &self,
        message: CryptoMessage,
        _transport_info: &[u8],
        _identity_device_id: Uuid,
        _recipient: &str,
    ) -> CryptoMessage {
        message
    }

    fn should_finish_communication_synchronization(&self, transport_info: &[u8]) -> bool {
        let _ = transport_info;
        true
    }
    fn process_unpersisted_message(&self, _message: &CryptoMessage, _sender: &str, _sender_device: Uuid) -> bool {
        true
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// In-memory fake transport: serves a fixed `UserConfiguration` per
    /// secret name and records every sent message for assertions.
    pub struct FakeTransport {
        configurations: HashMap<String, UserConfiguration>,
        pub sent: Mutex<Vec<(SignedRatchetMessage, SignedRatchetMessageMetadata)>>,
        pub deleted_curve_keys: Mutex<Vec<Uuid>>,
        pub deleted_kyber_keys: Mutex<Vec<Uuid>>,
    }

    impl FakeTransport {
        pub fn with_verified_devices(secret_name: &str, devices: Vec<Uuid>) -> Self {
            let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
            let mut configuration = UserConfiguration {
                secret_name: secret_name.to_string(),
                signing_public_key: signing_key.verifying_key().to_bytes(),
                long_term_public_key: [0u8; 32],
                signed_public_one_time_keys: vec![],
                signed_public_kyber_one_time_keys: vec![],
                verified_devices: devices,
                signature: vec![],
                updated_at: chrono::Utc::now(),
            };
            let payload = crate::identity::configuration_signing_payload(&configuration);
            configuration.signature = signing_key.sign(&payload).to_bytes().to_vec();

            let mut configurations = HashMap::new();
            configurations.insert(secret_name.to_string(), configuration);
            Self {
                configurations,
                sent: Mutex::new(vec![]),
                deleted_curve_keys: Mutex::new(vec![]),
                deleted_kyber_keys: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl SessionTransport for FakeTransport {
        async fn send_message(
            &self,
            message: SignedRatchetMessage,
            metadata: SignedRatchetMessageMetadata,
        ) -> Result<(), String> {
            self.sent.lock().push((message, metadata));
            Ok(())
        }

        async fn find_configuration(&self, secret_name: &str) -> Result<UserConfiguration, String> {
            self.configurations
                .get(secret_name)
                .cloned()
                .ok_or_else(|| format!("no configuration for {secret_name}"))
        }

        async fn publish_user_configuration(&self, _configuration: UserConfiguration, _recipient: Uuid) -> Result<(), String> {
            Ok(())
        }

        async fn fetch_one_time_key(&self, _secret_name: &str, _device_id: Uuid, _keys_type: KeysType) -> Result<Option<Vec<u8>>, String> {
            Ok(None)
        }

        async fn update_one_time_keys(&self, _secret_name: &str, _device_id: Uuid, _keys_type: KeysType, _public_keys: Vec<Vec<u8>>) -> Result<(), String> {
            Ok(())
        }

        async fn delete_one_time_key(&self, id: Uuid, keys_type: KeysType) -> Result<(), String> {
            match keys_type {
                KeysType::Curve => self.deleted_curve_keys.lock().push(id),
                KeysType::Kyber => self.deleted_kyber_keys.lock().push(id),
            }
            Ok(())
        }

        async fn batch_delete_one_time_keys(&self, ids: Vec<Uuid>, keys_type: KeysType) -> Result<(), String> {
            for id in ids {
                self.delete_one_time_key(id, keys_type).await?;
            }
            Ok(())
        }

        async fn publish_rotated_keys(&self, _secret_name: &str, _device_id: Uuid, _keys: RotatedPublicKeys) -> Result<(), String> {
            Ok(())
        }

        async fn create_upload_packet(&self, _secret_name: &str, _device_id: Uuid, _recipient: Uuid, _metadata: MetadataDocument) -> Result<Vec<u8>, String> {
            Ok(vec![])
        }
    }

    /// In-memory fake store, keyed by the record id.
    #[derive(Default)]
    pub struct FakeStore {
        pub session_context: Mutex<Option<EncryptedBlob>>,
        pub identities: Mutex<HashMap<Uuid, EncryptedBlob>>,
        pub contacts: Mutex<HashMap<Uuid, EncryptedBlob>>,
        pub communications: Mutex<HashMap<Uuid, EncryptedBlob>>,
        pub messages: Mutex<HashMap<Uuid, EncryptedBlob>>,
        pub jobs: Mutex<HashMap<Uuid, EncryptedBlob>>,
        pub media_jobs: Mutex<HashMap<Uuid, EncryptedBlob>>,
    }

    impl FakeStore {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }
    }

    #[async_trait]
    impl SessionStore for FakeStore {
        async fn create_session_context(&self, blob: EncryptedBlob) -> Result<(), String> {
            *self.session_context.lock() = Some(blob);
            Ok(())
        }
        async fn fetch_session_context(&self) -> Result<Option<EncryptedBlob>, String> {
            Ok(self.session_context.lock().clone())
        }
        async fn update_session_context(&self, blob: EncryptedBlob) -> Result<(), String> {
            *self.session_context.lock() = Some(blob);
            Ok(())
        }
        async fn delete_session_context(&self) -> Result<(), String> {
            *self.session_context.lock() = None;
            Ok(())
        }

        async fn fetch_device_salt(&self) -> Result<Option<Vec<u8>>, String> {
            Ok(None)
        }
        async fn delete_device_salt(&self) -> Result<(), String> {
            Ok(())
        }

        async fn create_identity(&self, blob: EncryptedBlob) -> Result<(), String> {
            self.identities.lock().insert(blob.id, blob);
            Ok(())
        }
        async fn fetch_all_identities(&self) -> Result<Vec<EncryptedBlob>, String> {
            Ok(self.identities.lock().values().cloned().collect())
        }
        async fn update_identity(&self, blob: EncryptedBlob) -> Result<(), String> {
            self.identities.lock().insert(blob.id, blob);
            Ok(())
        }
        async fn delete_identity(&self, id: Uuid) -> Result<(), String> {
            self.identities.lock().remove(&id);
            Ok(())
        }

        async fn create_contact(&self, blob: EncryptedBlob) -> Result<(), String> {
            self.contacts.lock().insert(blob.id, blob);
            Ok(())
        }
        async fn fetch_all_contacts(&self) -> Result<Vec<EncryptedBlob>, String> {
            Ok(self.contacts.lock().values().cloned().collect())
        }
        async fn update_contact(&self, blob: EncryptedBlob) -> Result<(), String> {
            self.contacts.lock().insert(blob.id, blob);
            Ok(())
        }
        async fn delete_contact(&self, id: Uuid) -> Result<(), String> {
            self.contacts.lock().remove(&id);
            Ok(())
        }

        async fn create_communication(&self, blob: EncryptedBlob) -> Result<(), String> {
            self.communications.lock().insert(blob.id, blob);
            Ok(())
        }
        async fn fetch_all_communications(&self) -> Result<Vec<EncryptedBlob>, String> {
            Ok(self.communications.lock().values().cloned().collect())
        }
        async fn update_communication(&self, blob: EncryptedBlob) -> Result<(), String> {
            self.communications.lock().insert(blob.id, blob);
            Ok(())
        }
        async fn delete_communication(&self, id: Uuid) -> Result<(), String> {
            self.communications.lock().remove(&id);
            Ok(())
        }

        async fn create_message(&self, blob: EncryptedBlob) -> Result<(), String> {
            self.messages.lock().insert(blob.id, blob);
            Ok(())
        }
        async fn update_message(&self, blob: EncryptedBlob) -> Result<(), String> {
            self.messages.lock().insert(blob.id, blob);
            Ok(())
        }
        async fn delete_message(&self, id: Uuid) -> Result<(), String> {
            self.messages.lock().remove(&id);
            Ok(())
        }
        async fn fetch_all_messages(&self) -> Result<Vec<EncryptedBlob>, String> {
            Ok(self.messages.lock().values().cloned().collect())
        }

        async fn create_job(&self, blob: EncryptedBlob) -> Result<(), String> {
            self.jobs.lock().insert(blob.id, blob);
            Ok(())
        }
        async fn read_all_jobs(&self) -> Result<Vec<EncryptedBlob>, String> {
            Ok(self.jobs.lock().values().cloned().collect())
        }
        async fn update_job(&self, blob: EncryptedBlob) -> Result<(), String> {
            self.jobs.lock().insert(blob.id, blob);
            Ok(())
        }
        async fn delete_job(&self, id: Uuid) -> Result<(), String> {
            self.jobs.lock().remove(&id);
            Ok(())
        }

        async fn create_media_job(&self, blob: EncryptedBlob) -> Result<(), String> {
            self.media_jobs.lock().insert(blob.id, blob);
            Ok(())
        }
        async fn fetch_all_media_jobs(&self) -> Result<Vec<EncryptedBlob>, String> {
            Ok(self.media_jobs.lock().values().cloned().collect())
        }
        async fn fetch_media_job_by_id(&self, id: Uuid) -> Result<Option<EncryptedBlob>, String> {
            Ok(self.media_jobs.lock().get(&id).cloned())
        }
        async fn delete_media_job(&self, id: Uuid) -> Result<(), String> {
            self.media_jobs.lock().remove(&id);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeEventReceiver {
        pub created_messages: Mutex<Vec<EncryptedMessage>>,
        pub updated_communications: Mutex<Vec<Communication>>,
    }

    #[async_trait]
    impl EventReceiver for FakeEventReceiver {
        async fn message_created(&self, message: &EncryptedMessage) {
            self.created_messages.lock().push(message.clone());
        }
        async fn updated_communication(&self, communication: &Communication, _members: &CommunicationMembers) {
            self.updated_communications.lock().push(communication.clone());
        }
    }

    #[derive(Default)]
    pub struct FakeDelegate;

    #[async_trait]
    impl SessionDelegate for FakeDelegate {}
}
