//! Hybrid X3DH-like handshake: classical Curve25519 triple-DH mixed with an
//! ML-KEM-1024 encapsulation, feeding the Double Ratchet's initial root key.
//! Structured after `dl_crypto::x3dh`, extended with the post-quantum KEM
//! leg per spec.md §1/§3.

use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::{error::RatchetError, kdf, keys::KyberDecapsulationKey};

/// Remote peer's published key material, as resolved by the driver from
/// `SessionIdentity` (and, on the decrypt path, from the wire header).
pub struct RemoteKeyMaterial<'a> {
    pub long_term: &'a X25519Public,
    pub one_time: Option<&'a X25519Public>,
    /// ML-KEM-1024 encapsulation (public) key bytes — either a one-time
    /// Kyber key or the peer's `finalKyberPrivateKey` fallback's public half.
    pub kyber_public: &'a [u8],
}

/// Our own key material for this handshake, as resolved by the driver from
/// `SessionContext.deviceKeys`.
pub struct LocalKeyMaterial<'a> {
    pub long_term: &'a StaticSecret,
    pub one_time: Option<&'a StaticSecret>,
    pub kyber_decapsulation: Option<&'a KyberDecapsulationKey>,
}

/// Output of the initiator (sender) side of the handshake.
pub struct SenderHandshake {
    pub shared_key: [u8; 32],
    /// Fresh ephemeral Curve25519 keypair; becomes our first Double Ratchet
    /// sending key and is carried in the wire header.
    pub ratchet_secret: StaticSecret,
    pub ratchet_public: X25519Public,
    /// ML-KEM-1024 ciphertext, carried in the wire header so the recipient
    /// can decapsulate and reconstruct the shared secret.
    pub kyber_ciphertext: Vec<u8>,
}

/// Alice's side: she has Bob's published bundle (long-term + optional
/// one-time Curve25519 keys, and a Kyber-1024 public key).
pub fn initiate(
    local: &LocalKeyMaterial,
    remote: &RemoteKeyMaterial,
) -> Result<SenderHandshake, RatchetError> {
    let ratchet_secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let ratchet_public = X25519Public::from(&ratchet_secret);

    let mut dh_concat = Vec::with_capacity(128);
    // DH1 = our long-term x their long-term
    dh_concat.extend_from_slice(local.long_term.diffie_hellman(remote.long_term).as_bytes());
    // DH2 = our fresh ratchet key x their long-term
    dh_concat.extend_from_slice(ratchet_secret.diffie_hellman(remote.long_term).as_bytes());
    if let Some(remote_one_time) = remote.one_time {
        // DH3 = our long-term x their one-time
        dh_concat.extend_from_slice(local.long_term.diffie_hellman(remote_one_time).as_bytes());
        // DH4 = our fresh ratchet key x their one-time
        dh_concat.extend_from_slice(ratchet_secret.diffie_hellman(remote_one_time).as_bytes());
    }

    let (kyber_ciphertext, kyber_shared_secret) = crate::keys::kyber_encapsulate(remote.kyber_public)?;

    let shared_key = kdf::hybrid_handshake_key(&dh_concat, &kyber_shared_secret)?;
    dh_concat.zeroize();

    Ok(SenderHandshake {
        shared_key,
        ratchet_secret,
        ratchet_public,
        kyber_ciphertext,
    })
}

/// Bob's side: he reconstructs the shared key from Alice's header, using
/// whichever of his own one-time keys (if any) she claims to have used.
pub fn respond(
    local: &LocalKeyMaterial,
    sender_long_term: &X25519Public,
    sender_ratchet_public: &X25519Public,
    kyber_ciphertext: &[u8],
) -> Result<[u8; 32], RatchetError> {
    let mut dh_concat = Vec::with_capacity(128);
    dh_concat.extend_from_slice(local.long_term.diffie_hellman(sender_long_term).as_bytes());
    dh_concat.extend_from_slice(local.long_term.diffie_hellman(sender_ratchet_public).as_bytes());
    if let Some(my_one_time) = local.one_time {
        dh_concat.extend_from_slice(my_one_time.diffie_hellman(sender_long_term).as_bytes());
        dh_concat.extend_from_slice(my_one_time.diffie_hellman(sender_ratchet_public).as_bytes());
    }

    let decapsulation_key = local
        .kyber_decapsulation
        .ok_or_else(|| RatchetError::InvalidKey("no Kyber decapsulation key available".into()))?;
    let kyber_shared_secret = crate::keys::kyber_decapsulate(decapsulation_key, kyber_ciphertext)?;

    let shared_key = kdf::hybrid_handshake_key(&dh_concat, &kyber_shared_secret)?;
    dh_concat.zeroize();
    Ok(shared_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{KyberKeyPair, LongTermKeyPair, OneTimeKeyPair};

    #[test]
    fn hybrid_handshake_roundtrip_without_one_time_keys() {
        let alice_lt = LongTermKeyPair::generate();
        let bob_lt = LongTermKeyPair::generate();
        let bob_kyber = KyberKeyPair::generate();

        let alice_local = LocalKeyMaterial {
            long_term: &alice_lt.static_secret(),
            one_time: None,
            kyber_decapsulation: None,
        };
        let remote = RemoteKeyMaterial {
            long_term: &bob_lt.public,
            one_time: None,
            kyber_public: &bob_kyber.public_bytes(),
        };

        let sender = initiate(&alice_local, &remote).expect("initiate");

        let bob_local = LocalKeyMaterial {
            long_term: &bob_lt.static_secret(),
            one_time: None,
            kyber_decapsulation: Some(&bob_kyber.decapsulation_key),
        };
        let bob_shared_key = respond(
            &bob_local,
            &alice_lt.public,
            &sender.ratchet_public,
            &sender.kyber_ciphertext,
        )
        .expect("respond");

        assert_eq!(sender.shared_key, bob_shared_key);
    }

    #[test]
    fn hybrid_handshake_roundtrip_with_one_time_keys() {
        let alice_lt = LongTermKeyPair::generate();
        let bob_lt = LongTermKeyPair::generate();
        let bob_otk = OneTimeKeyPair::generate();
        let bob_kyber = KyberKeyPair::generate();

        let alice_local = LocalKeyMaterial {
            long_term: &alice_lt.static_secret(),
            one_time: None,
            kyber_decapsulation: None,
        };
        let remote = RemoteKeyMaterial {
            long_term: &bob_lt.public,
            one_time: Some(&bob_otk.public),
            kyber_public: &bob_kyber.public_bytes(),
        };

        let sender = initiate(&alice_local, &remote).expect("initiate");

        let bob_otk_secret = bob_otk.static_secret();
        let bob_local = LocalKeyMaterial {
            long_term: &bob_lt.static_secret(),
            one_time: Some(&bob_otk_secret),
            kyber_decapsulation: Some(&bob_kyber.decapsulation_key),
        };
        let bob_shared_key = respond(
            &bob_local,
            &alice_lt.public,
            &sender.ratchet_public,
            &sender.kyber_ciphertext,
        )
        .expect("respond");

        assert_eq!(sender.shared_key, bob_shared_key);
    }
}
