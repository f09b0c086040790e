//! Plaintext message types — the unit that is encoded, ratcheted, and sent
//! (spec.md §3 `CryptoMessage`). Structured after the teacher's
//! `dl_proto::message`, with `recipient`/`messageType` generalized into the
//! tagged unions the dispatcher (§4.F) switches on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as MetadataDocument;

/// Conversation target a `CryptoMessage` is addressed to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageRecipient {
    Nickname { name: String },
    PersonalMessage,
    Channel { name: String },
    Broadcast,
}

/// Delivery-state values a persisted message can carry / transition through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    #[default]
    Sending,
    Sent,
    Received,
    Delivered,
    Read,
    Failed,
}

/// Control-message subtypes (never persisted as `EncryptedMessage`; see §4.F).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageFlags {
    FriendshipStateRequest {
        metadata: MetadataDocument,
    },
    DeliveryStateChange {
        shared_id: String,
        state: DeliveryState,
    },
    EditMessage {
        shared_id: String,
        text: String,
    },
    EditMessageMetadata {
        shared_id: String,
        key: String,
        reaction: String,
    },
    CommunicationSynchronization {
        shared_id: String,
    },
    ContactCreated,
    AddContacts {
        contacts: Vec<String>,
    },
    RevokeMessage {
        shared_id: String,
    },
    DccSymmetricKey {
        #[serde(with = "serde_bytes")]
        key: Vec<u8>,
    },
    /// Anything this build doesn't recognize by name; forwarded verbatim to
    /// the generic local-nudge receiver hook rather than rejected.
    Unknown {
        name: String,
        metadata: MetadataDocument,
    },
}

/// Whether a `CryptoMessage` carries ordinary content or a control flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageType {
    Normal,
    Control { flags: MessageFlags },
}

/// Platform push-notification hint; opaque to the engine beyond this tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PushType {
    #[default]
    None,
    Alert,
    Silent,
    Voip,
}

/// The plaintext unit handed to the ratchet for encryption (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoMessage {
    pub text: String,
    pub sent_date: DateTime<Utc>,
    pub recipient: MessageRecipient,
    pub metadata: MetadataDocument,
    #[serde(with = "serde_bytes")]
    pub transport_info: Vec<u8>,
    pub message_type: MessageType,
    pub push_type: PushType,
}

impl CryptoMessage {
    pub fn is_control(&self) -> bool {
        matches!(self.message_type, MessageType::Control { .. })
    }
}
