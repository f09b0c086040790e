//! Session Identity Resolver (spec.md §4.C): discovery, verification, and
//! lifecycle of per-peer-device identities, including stale pruning.
//! Grounded in `dl_crypto::identity`'s key-bundle shapes and the teacher's
//! read-modify-write-through-the-store pattern.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    context::UserConfiguration,
    error::EngineError,
    traits::SessionTransport,
};

/// Props for a [`SessionIdentity`] (spec.md §3); the opaque `state` blob is
/// owned by `ratchet-core` and never inspected here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionIdentityProps {
    pub secret_name: String,
    pub device_id: Uuid,
    pub session_context_id: i64,
    pub public_long_term_key: [u8; 32],
    pub public_signing_key: [u8; 32],
    pub remote_one_time_key: Option<[u8; 32]>,
    pub remote_kyber_key: Option<Vec<u8>>,
    pub device_name: Option<String>,
    pub is_master_device: bool,
    #[serde(with = "serde_bytes_opt")]
    pub state: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

impl SessionIdentityProps {
    /// Invariant from spec.md §3: `state == nil` implies the next
    /// encrypt/decrypt must run the initialization path.
    pub fn is_uninitialized(&self) -> bool {
        self.state.is_none()
    }
}

mod serde_bytes_opt {
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serde_bytes::serialize(bytes, s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let opt: Option<serde_bytes::ByteBuf> = serde::Deserialize::deserialize(d)?;
        Ok(opt.map(|b| b.into_vec()))
    }
}

/// Canonical bytes a `UserConfiguration.signature` is computed over: every
/// field except the signature itself, in declaration order.
pub(crate) fn configuration_signing_payload(configuration: &UserConfiguration) -> Vec<u8> {
    #[derive(Serialize)]
    struct SigningView<'a> {
        secret_name: &'a str,
        signing_public_key: &'a [u8; 32],
        long_term_public_key: &'a [u8; 32],
        signed_public_one_time_keys: &'a [crate::context::SignedPublicOneTimeKey],
        signed_public_kyber_one_time_keys: &'a [crate::context::SignedPublicOneTimeKey],
        verified_devices: &'a [Uuid],
        updated_at: DateTime<Utc>,
    }

    let view = SigningView {
        secret_name: &configuration.secret_name,
        signing_public_key: &configuration.signing_public_key,
        long_term_public_key: &configuration.long_term_public_key,
        signed_public_one_time_keys: &configuration.signed_public_one_time_keys,
        signed_public_kyber_one_time_keys: &configuration.signed_public_kyber_one_time_keys,
        verified_devices: &configuration.verified_devices,
        updated_at: configuration.updated_at,
    };
    serde_json::to_vec(&view).expect("SigningView is always serializable")
}

/// Verify `configuration.signature` against its own declared
/// `signing_public_key` (spec.md §4.C step 2). The engine never trusts a
/// transport to have done this already.
fn verify_configuration_signature(configuration: &UserConfiguration) -> Result<(), EngineError> {
    let verifying_key = VerifyingKey::from_bytes(&configuration.signing_public_key)
        .map_err(|_| EngineError::InvalidSignature)?;
    let signature = Signature::from_slice(&configuration.signature)
        .map_err(|_| EngineError::InvalidSignature)?;
    let payload = configuration_signing_payload(configuration);
    verifying_key
        .verify(&payload, &signature)
        .map_err(|_| EngineError::InvalidSignature)
}

/// Allocate a uniformly random positive 63-bit session context id, retrying
/// on collision within the current refresh batch (spec.md §4.C step 4;
/// cross-batch collisions are an accepted, documented open question).
fn allocate_session_context_id(used_this_batch: &mut HashSet<i64>) -> i64 {
    loop {
        let candidate: i64 = rand::thread_rng().gen_range(1..=i64::MAX);
        if used_this_batch.insert(candidate) {
            return candidate;
        }
    }
}

/// `refreshIdentities(secretName) -> [SessionIdentity]` (spec.md §4.C).
///
/// `stored` is every currently-persisted identity (already decrypted) for
/// any peer; this function filters, augments with newly-discovered
/// verified devices, and prunes stale ones, returning the final set for
/// `secretName`.
pub async fn refresh_identities(
    transport: &dyn SessionTransport,
    secret_name: &str,
    my_secret_name: &str,
    my_device_id: Uuid,
    mut stored: Vec<SessionIdentityProps>,
    mut create_identity: impl FnMut(&UserConfiguration, i64) -> SessionIdentityProps,
) -> Result<Vec<SessionIdentityProps>, EngineError> {
    // Step 1: filter to this peer, plus our own sibling devices.
    let is_relevant = |p: &SessionIdentityProps| {
        p.secret_name == secret_name || (p.secret_name == my_secret_name && p.device_id != my_device_id)
    };
    stored.retain(is_relevant);

    // Step 2+3: fetch authoritative configuration and verify its signature
    // against its own declared signing key before trusting anything in it.
    let configuration = transport
        .find_configuration(secret_name)
        .await
        .map_err(EngineError::Transport)?;
    verify_configuration_signature(&configuration)?;

    let verified: HashSet<Uuid> = configuration.verified_devices.iter().copied().collect();

    // Step 4: create identities for newly-verified devices.
    let mut used_ids: HashSet<i64> = stored.iter().map(|p| p.session_context_id).collect();
    let already_known: HashSet<Uuid> = stored.iter().map(|p| p.device_id).collect();

    for device_id in &verified {
        if *device_id == my_device_id || already_known.contains(device_id) {
            continue;
        }
        let session_context_id = allocate_session_context_id(&mut used_ids);
        let new_identity = create_identity(&configuration, session_context_id);
        stored.push(new_identity);
    }

    // Step 5: prune stale identities whose device is no longer verified.
    stored.retain(|p| verified.contains(&p.device_id) || (p.secret_name == my_secret_name));

    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::tests::FakeTransport;

    fn props(secret_name: &str, device_id: Uuid, session_context_id: i64) -> SessionIdentityProps {
        SessionIdentityProps {
            secret_name: secret_name.into(),
            device_id,
            session_context_id,
            public_long_term_key: [0u8; 32],
            public_signing_key: [0u8; 32],
            remote_one_time_key: None,
            remote_kyber_key: None,
            device_name: None,
            is_master_device: false,
            state: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn discovers_new_verified_device_and_prunes_stale_one() {
        let bob_new_device = Uuid::new_v4();
        let bob_old_device = Uuid::new_v4();
        let my_device = Uuid::new_v4();

        let transport = FakeTransport::with_verified_devices("bob", vec![bob_new_device]);
        let stored = vec![props("bob", bob_old_device, 1)];

        let result = refresh_identities(
            &transport,
            "bob",
            "me",
            my_device,
            stored,
            |_cfg, session_context_id| props("bob", bob_new_device, session_context_id),
        )
        .await
        .unwrap();

        let device_ids: HashSet<Uuid> = result.iter().map(|p| p.device_id).collect();
        assert!(device_ids.contains(&bob_new_device));
        assert!(!device_ids.contains(&bob_old_device));
    }

    #[tokio::test]
    async fn no_duplicate_device_id_pairs_after_refresh() {
        let bob_device = Uuid::new_v4();
        let my_device = Uuid::new_v4();
        let transport = FakeTransport::with_verified_devices("bob", vec![bob_device]);
        let stored = vec![props("bob", bob_device, 1)];

        let result = refresh_identities(
            &transport,
            "bob",
            "me",
            my_device,
            stored,
            |_cfg, session_context_id| props("bob", bob_device, session_context_id),
        )
        .await
        .unwrap();

        assert_eq!(result.len(), 1);
    }
}
