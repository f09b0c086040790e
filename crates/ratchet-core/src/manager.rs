//! `RatchetStateManager`: the external ratchet primitive spec.md §1 treats
//! as a callable library. We define the trait as the boundary the engine
//! programs against, and ship one concrete implementation (hybrid
//! classical/PQ handshake + Double Ratchet) so the workspace runs end to
//! end on its own.

use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use crate::{
    aead,
    error::RatchetError,
    handshake::{self, LocalKeyMaterial, RemoteKeyMaterial},
    ratchet::{DhRatchetHeader, RatchetState},
};

/// A ratchet message ready for the wire: the DH ratchet header plus the
/// sealed ciphertext. The handshake-only fields are populated solely on the
/// very first outbound message of a new session.
pub struct RatchetCiphertext {
    pub header: DhRatchetHeader,
    pub sealed: Vec<u8>,
    pub kyber_ciphertext: Option<Vec<u8>>,
}

/// Everything the driver needs to start a brand-new outbound session:
/// opaque state to persist plus the first ciphertext to send.
pub struct NewSession {
    pub state: Vec<u8>,
    pub ciphertext: RatchetCiphertext,
}

/// The boundary the engine programs against. Implementations own wire
/// format details for the handshake legs; the engine only ever sees opaque
/// `state` bytes that it persists via `SessionStore`.
pub trait RatchetStateManager: Send + Sync {
    fn start_outbound_session(
        &self,
        local: &LocalKeyMaterial,
        remote: &RemoteKeyMaterial,
        peer_long_term: &X25519Public,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<NewSession, RatchetError>;

    fn start_inbound_session(
        &self,
        local: &LocalKeyMaterial,
        our_long_term_secret: &StaticSecret,
        our_long_term_public: &X25519Public,
        sender_long_term: &X25519Public,
        sender_ratchet_public: &X25519Public,
        kyber_ciphertext: &[u8],
        header: &DhRatchetHeader,
        sealed: &[u8],
        aad: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), RatchetError>;

    fn encrypt(
        &self,
        state: &[u8],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<(Vec<u8>, RatchetCiphertext), RatchetError>;

    fn decrypt(
        &self,
        state: &[u8],
        header: &DhRatchetHeader,
        sealed: &[u8],
        aad: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), RatchetError>;
}

/// The hybrid classical/post-quantum implementation of [`RatchetStateManager`].
#[derive(Default)]
pub struct HybridRatchetManager;

impl HybridRatchetManager {
    pub fn new() -> Self {
        Self
    }
}

impl RatchetStateManager for HybridRatchetManager {
    fn start_outbound_session(
        &self,
        local: &LocalKeyMaterial,
        remote: &RemoteKeyMaterial,
        peer_long_term: &X25519Public,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<NewSession, RatchetError> {
        let sender = handshake::initiate(local, remote)?;

        let mut ratchet = RatchetState::init_sender(
            sender.shared_key,
            sender.ratchet_secret,
            sender.ratchet_public,
            peer_long_term,
        )?;

        let (header, mk) = ratchet.encrypt_step()?;
        let sealed = aead::encrypt(&mk, plaintext, aad)?;
        let state = ratchet.to_bytes()?;

        Ok(NewSession {
            state,
            ciphertext: RatchetCiphertext {
                header,
                sealed,
                kyber_ciphertext: Some(sender.kyber_ciphertext),
            },
        })
    }

    fn start_inbound_session(
        &self,
        local: &LocalKeyMaterial,
        our_long_term_secret: &StaticSecret,
        our_long_term_public: &X25519Public,
        sender_long_term: &X25519Public,
        sender_ratchet_public: &X25519Public,
        kyber_ciphertext: &[u8],
        header: &DhRatchetHeader,
        sealed: &[u8],
        aad: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), RatchetError> {
        let shared_key = handshake::respond(
            local,
            sender_long_term,
            sender_ratchet_public,
            kyber_ciphertext,
        )?;

        let our_secret_bytes = our_long_term_secret.to_bytes();
        let mut ratchet = RatchetState::init_recipient(
            shared_key,
            StaticSecret::from(our_secret_bytes),
            *our_long_term_public,
        );

        let mk = ratchet.decrypt_step(header)?;
        let plaintext = aead::decrypt(&mk, sealed, aad)?;
        let state = ratchet.to_bytes()?;
        Ok((state, plaintext))
    }

    fn encrypt(
        &self,
        state: &[u8],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<(Vec<u8>, RatchetCiphertext), RatchetError> {
        let mut ratchet = RatchetState::from_bytes(state)?;
        let (header, mk) = ratchet.encrypt_step()?;
        let sealed = aead::encrypt(&mk, plaintext, aad)?;
        let new_state = ratchet.to_bytes()?;
        Ok((
            new_state,
            RatchetCiphertext {
                header,
                sealed,
                kyber_ciphertext: None,
            },
        ))
    }

    fn decrypt(
        &self,
        state: &[u8],
        header: &DhRatchetHeader,
        sealed: &[u8],
        aad: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), RatchetError> {
        let mut ratchet = RatchetState::from_bytes(state)?;
        let mk = ratchet.decrypt_step(header)?;
        let plaintext = aead::decrypt(&mk, sealed, aad)?;
        let new_state = ratchet.to_bytes()?;
        Ok((new_state, plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{KyberKeyPair, LongTermKeyPair};

    #[test]
    fn full_session_lifecycle_through_manager() {
        let manager = HybridRatchetManager::new();

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

        let aad = b"session-aad";
        let new_session = manager
            .start_outbound_session(&alice_local, &remote, &bob_lt.public, b"hello bob", aad)
            .expect("start_outbound_session");

        let bob_local = LocalKeyMaterial {
            long_term: &bob_lt.static_secret(),
            one_time: None,
            kyber_decapsulation: Some(&bob_kyber.decapsulation_key),
        };
        let (bob_state, plaintext) = manager
            .start_inbound_session(
                &bob_local,
                &bob_lt.static_secret(),
                &bob_lt.public,
                &alice_lt.public,
                &X25519Public::from(new_session.ciphertext.header.dh_pub),
                new_session
                    .ciphertext
                    .kyber_ciphertext
                    .as_ref()
                    .expect("kyber ciphertext present on first message"),
                &new_session.ciphertext.header,
                &new_session.ciphertext.sealed,
                aad,
            )
            .expect("start_inbound_session");
        assert_eq!(plaintext, b"hello bob");

        let (_bob_state2, ct) = manager
            .encrypt(&bob_state, b"hi alice", aad)
            .expect("bob encrypt");

        let (_alice_state2, received) = manager
            .decrypt(&new_session.state, &ct.header, &ct.sealed, aad)
            .expect("alice decrypt bob's reply");
        assert_eq!(received, b"hi alice");
    }
}
