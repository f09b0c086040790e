//! `SessionContext` (spec.md §3): the process-wide, single-writer record
//! holding this device's identity and private key material. Wrapped in a
//! single-writer cell per the design notes (§9 "Global mutable state"):
//! all writers go through the serialized executor, readers see a
//! consistent snapshot.

use chrono::{DateTime, Utc};
use ratchet_core::keys::{StoredKyberOneTimeKey, StoredOneTimeKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `sessionUser` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUser {
    pub secret_name: String,
    pub device_id: Uuid,
    pub device_keys: DeviceKeys,
}

/// `deviceKeys` (spec.md §3): this device's full private key material.
#[derive(Clone, Serialize, Deserialize)]
pub struct DeviceKeys {
    pub private_long_term_key: [u8; 32],
    pub private_signing_key: [u8; 32],
    pub private_one_time_keys: Vec<StoredOneTimeKey>,
    pub private_kyber_one_time_keys: Vec<StoredKyberOneTimeKey>,
    pub final_kyber_private_key: StoredKyberOneTimeKey,
}

impl DeviceKeys {
    /// Pop the most recently generated one-time Curve25519 key, if any.
    pub fn take_latest_one_time_key(&mut self) -> Option<StoredOneTimeKey> {
        self.private_one_time_keys.pop()
    }

    /// Pop the most recently generated Kyber one-time key; caller falls
    /// back to `final_kyber_private_key` when this returns `None`.
    pub fn take_latest_kyber_one_time_key(&mut self) -> Option<StoredKyberOneTimeKey> {
        self.private_kyber_one_time_keys.pop()
    }

    /// Remove a consumed one-time key by id from the private sequence
    /// (part of `removeUsedKeys`, §4.E.1).
    pub fn remove_one_time_key(&mut self, id: Uuid) {
        self.private_one_time_keys.retain(|k| k.id != id);
    }

    pub fn remove_kyber_one_time_key(&mut self, id: Uuid) {
        self.private_kyber_one_time_keys.retain(|k| k.id != id);
    }
}

/// Signed public one-time key entry, as published in a `UserConfiguration`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPublicOneTimeKey {
    pub id: Uuid,
    pub public: Vec<u8>,
    pub signature: Vec<u8>,
}

/// `lastUserConfiguration` (spec.md §3): the cached, published bundle this
/// device last saw from the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfiguration {
    pub secret_name: String,
    pub signing_public_key: [u8; 32],
    pub long_term_public_key: [u8; 32],
    pub signed_public_one_time_keys: Vec<SignedPublicOneTimeKey>,
    pub signed_public_kyber_one_time_keys: Vec<SignedPublicOneTimeKey>,
    pub verified_devices: Vec<Uuid>,
    pub signature: Vec<u8>,
    pub updated_at: DateTime<Utc>,
}

impl UserConfiguration {
    /// Drop the one-time key entry with this id, as required after a
    /// first-contact outbound consumes it (spec.md §8 scenario 1).
    pub fn drop_one_time_key(&mut self, id: Uuid) {
        self.signed_public_one_time_keys.retain(|k| k.id != id);
    }

    pub fn drop_kyber_one_time_key(&mut self, id: Uuid) {
        self.signed_public_kyber_one_time_keys.retain(|k| k.id != id);
    }
}

/// A symmetric key handed over via a `DccSymmetricKey` control message
/// (spec.md §4.F), stashed for out-of-band file transfer with one peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DccKey {
    pub sender_secret_name: String,
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

/// The process-wide session context. Accessed only through
/// [`SessionContextCell`]; never cloned into job handlers as mutable state
/// (design note §9 "Recursive self session reference").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_user: SessionUser,
    pub last_user_configuration: Option<UserConfiguration>,
    #[serde(default)]
    pub dcc_keys: Vec<DccKey>,
}

impl std::fmt::Debug for DeviceKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKeys")
            .field("private_one_time_keys", &self.private_one_time_keys.len())
            .field(
                "private_kyber_one_time_keys",
                &self.private_kyber_one_time_keys.len(),
            )
            .finish_non_exhaustive()
    }
}

/// Single-writer cell around the process-wide [`SessionContext`]. All
/// mutation happens from the serialized executor (§4.A); readers obtain a
/// cloned snapshot so they never observe a torn write.
#[derive(Clone)]
pub struct SessionContextCell {
    inner: std::sync::Arc<parking_lot::RwLock<Option<SessionContext>>>,
}

impl SessionContextCell {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Arc::new(parking_lot::RwLock::new(None)),
        }
    }

    pub fn set(&self, ctx: SessionContext) {
        *self.inner.write() = Some(ctx);
    }

    pub fn get(&self) -> Option<SessionContext> {
        self.inner.read().clone()
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut SessionContext) -> R) -> Option<R> {
        let mut guard = self.inner.write();
        guard.as_mut().map(f)
    }
}

impl Default for SessionContextCell {
    fn default() -> Self {
        Self::new()
    }
}
