//! On-wire envelope (spec.md §6.5): opaque ratcheted ciphertext plus a
//! header identifying which keys were used, wrapped in an Ed25519
//! signature. Mirrors the shape of `dl_proto::envelope::Envelope` but keeps
//! only the fields the specification calls out — the server-routing
//! metadata (sender/recipient ids, timestamps) travels alongside as
//! `SignedRatchetMessageMetadata`, not inside the signed envelope itself.

use ratchet_core::DhRatchetHeader;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header identifying the keys a `RatchetMessage` was encrypted against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatchetHeader {
    pub remote_public_long_term_key: [u8; 32],
    pub remote_public_one_time_key: Option<[u8; 32]>,
    #[serde(with = "serde_bytes")]
    pub remote_kyber1024_public_key: Vec<u8>,
    pub curve_one_time_key_id: Option<Uuid>,
    pub kyber_one_time_key_id: Option<Uuid>,
    pub dh_ratchet: DhRatchetHeader,
}

/// Opaque ciphertext plus the header describing the keys used to seal it.
/// `kyber_ciphertext` is only present on the session-initiating message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatchetMessage {
    pub header: RatchetHeader,
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "serde_bytes", default, skip_serializing_if = "Option::is_none")]
    pub kyber_ciphertext: Option<Vec<u8>>,
}

/// `RatchetMessage` plus an Ed25519 signature over its encoded bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedRatchetMessage {
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

/// Transport-facing metadata accompanying a `SignedRatchetMessage`; never
/// part of the signed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedRatchetMessageMetadata {
    pub recipient_secret_name: String,
    pub recipient_device_id: Uuid,
    pub recipient_tag: Option<String>,
    #[serde(with = "serde_bytes")]
    pub transport_info: Vec<u8>,
    pub shared_message_id: Uuid,
}
