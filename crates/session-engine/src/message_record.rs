//! `EncryptedMessage` (spec.md §3): a persisted, app-visible message,
//! distinct from the on-wire ratcheted envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use session_proto::{CryptoMessage, DeliveryState};
use uuid::Uuid;

use crate::model::{Decrypted, EncryptedBlob};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedMessage {
    pub id: Uuid,
    pub communication_id: Uuid,
    pub session_context_id: i64,
    pub shared_id: String,
    pub sequence_number: u64,
    pub send_date: DateTime<Utc>,
    pub delivery_state: DeliveryState,
    pub content: CryptoMessage,
    pub senders_secret_name: String,
    pub senders_device_id: Uuid,
}

/// Scan already-fetched message blobs for one matching `shared_id`,
/// superseding the dedicated `fetchMessageBySharedId` store query with the
/// fetch-all-then-filter idiom used for identities and contacts.
pub fn find_by_shared_id(
    blobs: &[EncryptedBlob],
    db_key: &[u8; 32],
    shared_id: &str,
) -> Option<Decrypted<EncryptedMessage>> {
    blobs
        .iter()
        .filter_map(|blob| blob.open::<EncryptedMessage>(db_key))
        .find(|d| d.props.shared_id == shared_id)
}
