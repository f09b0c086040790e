//! Double Ratchet with DH ratchet steps, seeded by the hybrid handshake's
//! shared key. Adapted from the teacher's `dl_crypto::ratchet` — same state
//! separation (root key / sending chain / receiving chain / message keys)
//! and the same skipped-key bound, just seeded from a PQ-mixed root key
//! instead of a plain X3DH one.

use std::collections::HashMap;

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::{error::RatchetError, kdf};

/// Maximum number of skipped message keys retained per chain.
const MAX_SKIP: u64 = 1000;

/// Sent alongside every ciphertext so the recipient can advance their ratchet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhRatchetHeader {
    pub dh_pub: [u8; 32],
    pub n: u64,
    pub pn: u64,
}

/// Opaque Double Ratchet state. Serialized and handed to the caller as the
/// `state` blob on `SessionIdentity` (spec.md §3); never inspected outside
/// this crate.
#[derive(Serialize, Deserialize)]
pub struct RatchetState {
    root_key: [u8; 32],

    dh_send_secret: [u8; 32],
    dh_send_pub: [u8; 32],
    send_ck: [u8; 32],
    pub send_n: u64,

    dh_recv_pub: Option<[u8; 32]>,
    recv_ck: [u8; 32],
    pub recv_n: u64,
    pub prev_send_n: u64,

    skipped_keys: HashMap<([u8; 32], u64), [u8; 32]>,
}

impl Drop for RatchetState {
    fn drop(&mut self) {
        self.root_key.zeroize();
        self.dh_send_secret.zeroize();
        self.send_ck.zeroize();
        self.recv_ck.zeroize();
        for (_, mk) in self.skipped_keys.iter_mut() {
            mk.zeroize();
        }
    }
}

impl RatchetState {
    /// Initiator (sender) side, after a successful hybrid handshake.
    /// `peer_initial_dh_pub` is the peer's long-term key, playing the role
    /// Signal's signed prekey plays: a stable key the peer published in
    /// advance, used as their ratchet key until they perform their own
    /// first DH turn.
    pub fn init_sender(
        shared_key: [u8; 32],
        our_ratchet_secret: StaticSecret,
        our_ratchet_pub: X25519Public,
        peer_initial_dh_pub: &X25519Public,
    ) -> Result<Self, RatchetError> {
        let dh_output = our_ratchet_secret.diffie_hellman(peer_initial_dh_pub);
        let (new_rk, new_ck) = kdf::kdf_rk(&shared_key, dh_output.as_bytes())?;

        Ok(Self {
            root_key: new_rk,
            dh_send_secret: our_ratchet_secret.to_bytes(),
            dh_send_pub: our_ratchet_pub.to_bytes(),
            send_ck: new_ck,
            send_n: 0,
            dh_recv_pub: Some(peer_initial_dh_pub.to_bytes()),
            recv_ck: [0u8; 32],
            recv_n: 0,
            prev_send_n: 0,
            skipped_keys: HashMap::new(),
        })
    }

    /// Recipient side, after a successful hybrid handshake. `our_initial_secret`
    /// is whichever stable key we published that the sender DH'd against
    /// (our long-term key) — we have not yet performed a DH ratchet turn.
    pub fn init_recipient(
        shared_key: [u8; 32],
        our_initial_secret: StaticSecret,
        our_initial_pub: X25519Public,
    ) -> Self {
        Self {
            root_key: shared_key,
            dh_send_secret: our_initial_secret.to_bytes(),
            dh_send_pub: our_initial_pub.to_bytes(),
            send_ck: [0u8; 32],
            send_n: 0,
            dh_recv_pub: None,
            recv_ck: [0u8; 32],
            recv_n: 0,
            prev_send_n: 0,
            skipped_keys: HashMap::new(),
        }
    }

    pub fn our_ratchet_pub(&self) -> X25519Public {
        X25519Public::from(self.dh_send_pub)
    }

    /// Derive the next sending message key and the header to attach.
    pub fn encrypt_step(&mut self) -> Result<(DhRatchetHeader, [u8; 32]), RatchetError> {
        let (new_ck, mk) = kdf::kdf_ck(&self.send_ck)?;
        self.send_ck = new_ck;
        let header = DhRatchetHeader {
            dh_pub: self.dh_send_pub,
            n: self.send_n,
            pn: self.prev_send_n,
        };
        self.send_n += 1;
        Ok((header, mk))
    }

    /// Derive the message key for an inbound header, performing a DH
    /// ratchet turn if the peer has advanced to a new ratchet key.
    pub fn decrypt_step(&mut self, header: &DhRatchetHeader) -> Result<[u8; 32], RatchetError> {
        let peer_dh = X25519Public::from(header.dh_pub);

        if let Some(mk) = self.skipped_keys.remove(&(header.dh_pub, header.n)) {
            return Ok(mk);
        }

        let need_dh_ratchet = match self.dh_recv_pub {
            Some(current) => current != header.dh_pub,
            None => true,
        };

        if need_dh_ratchet {
            if self.dh_recv_pub.is_some() {
                self.skip_message_keys(header.pn)?;
            }

            self.dh_recv_pub = Some(header.dh_pub);

            let dh_recv_output = StaticSecret::from(self.dh_send_secret).diffie_hellman(&peer_dh);
            let (new_rk, new_recv_ck) = kdf::kdf_rk(&self.root_key, dh_recv_output.as_bytes())?;
            self.root_key = new_rk;
            self.recv_ck = new_recv_ck;
            self.recv_n = 0;

            self.prev_send_n = self.send_n;
            self.send_n = 0;
            let new_dh = StaticSecret::random_from_rng(OsRng);
            self.dh_send_pub = X25519Public::from(&new_dh).to_bytes();
            let dh_send_output = new_dh.diffie_hellman(&peer_dh);
            let (new_rk2, new_send_ck) = kdf::kdf_rk(&self.root_key, dh_send_output.as_bytes())?;
            self.root_key = new_rk2;
            self.send_ck = new_send_ck;
            self.dh_send_secret = new_dh.to_bytes();
        }

        self.skip_message_keys(header.n)?;

        let (new_ck, mk) = kdf::kdf_ck(&self.recv_ck)?;
        self.recv_ck = new_ck;
        self.recv_n += 1;

        Ok(mk)
    }

    fn skip_message_keys(&mut self, until: u64) -> Result<(), RatchetError> {
        if until < self.recv_n {
            return Ok(());
        }
        let skip_count = until - self.recv_n;
        if skip_count > MAX_SKIP {
            return Err(RatchetError::TooManySkipped(skip_count));
        }

        let dh_pub = self.dh_recv_pub.unwrap_or([0u8; 32]);
        while self.recv_n < until {
            let (new_ck, mk) = kdf::kdf_ck(&self.recv_ck)?;
            self.recv_ck = new_ck;
            self.skipped_keys.insert((dh_pub, self.recv_n), mk);
            self.recv_n += 1;
        }

        while self.skipped_keys.len() > MAX_SKIP as usize {
            if let Some(key) = self.skipped_keys.keys().next().cloned() {
                if let Some(mut mk) = self.skipped_keys.remove(&key) {
                    mk.zeroize();
                }
            }
        }

        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RatchetError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| RatchetError::StateSerialization(e.to_string()))?;
        Ok(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RatchetError> {
        ciborium::from_reader(bytes).map_err(|e| RatchetError::StateSerialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_pair() -> ([u8; 32], StaticSecret, X25519Public) {
        let shared_key = [7u8; 32];
        let bob_initial = StaticSecret::random_from_rng(OsRng);
        let bob_initial_pub = X25519Public::from(&bob_initial);
        (shared_key, bob_initial, bob_initial_pub)
    }

    #[test]
    fn full_ratchet_roundtrip() {
        let (shared_key, bob_initial, bob_initial_pub) = seed_pair();

        let alice_ratchet_secret = StaticSecret::random_from_rng(OsRng);
        let alice_ratchet_pub = X25519Public::from(&alice_ratchet_secret);

        let mut alice = RatchetState::init_sender(
            shared_key,
            alice_ratchet_secret,
            alice_ratchet_pub,
            &bob_initial_pub,
        )
        .unwrap();
        let mut bob = RatchetState::init_recipient(shared_key, bob_initial, bob_initial_pub);

        for _ in 0..3 {
            let (header, mk_alice) = alice.encrypt_step().unwrap();
            let mk_bob = bob.decrypt_step(&header).unwrap();
            assert_eq!(mk_alice, mk_bob);
        }

        for _ in 0..2 {
            let (header, mk_bob) = bob.encrypt_step().unwrap();
            let mk_alice = alice.decrypt_step(&header).unwrap();
            assert_eq!(mk_bob, mk_alice);
        }

        let (header, mk_a) = alice.encrypt_step().unwrap();
        let mk_b = bob.decrypt_step(&header).unwrap();
        assert_eq!(mk_a, mk_b);
    }

    #[test]
    fn out_of_order_messages_use_skipped_keys() {
        let (shared_key, bob_initial, bob_initial_pub) = seed_pair();
        let alice_ratchet_secret = StaticSecret::random_from_rng(OsRng);
        let alice_ratchet_pub = X25519Public::from(&alice_ratchet_secret);

        let mut alice = RatchetState::init_sender(
            shared_key,
            alice_ratchet_secret,
            alice_ratchet_pub,
            &bob_initial_pub,
        )
        .unwrap();
        let mut bob = RatchetState::init_recipient(shared_key, bob_initial, bob_initial_pub);

        let (h0, mk0) = alice.encrypt_step().unwrap();
        let (h1, mk1) = alice.encrypt_step().unwrap();
        let (h2, mk2) = alice.encrypt_step().unwrap();

        assert_eq!(mk2, bob.decrypt_step(&h2).unwrap());
        assert_eq!(mk0, bob.decrypt_step(&h0).unwrap());
        assert_eq!(mk1, bob.decrypt_step(&h1).unwrap());
    }

    #[test]
    fn state_roundtrips_through_serialization() {
        let (shared_key, bob_initial, bob_initial_pub) = seed_pair();
        let mut bob = RatchetState::init_recipient(shared_key, bob_initial, bob_initial_pub);
        let bytes = bob.to_bytes().unwrap();
        let mut restored = RatchetState::from_bytes(&bytes).unwrap();

        let alice_ratchet_secret = StaticSecret::random_from_rng(OsRng);
        let alice_ratchet_pub = X25519Public::from(&alice_ratchet_secret);
        let mut alice = RatchetState::init_sender(
            shared_key,
            alice_ratchet_secret,
            alice_ratchet_pub,
            &bob_initial_pub,
        )
        .unwrap();

        let (header, mk_alice) = alice.encrypt_step().unwrap();
        let mk_bob = restored.decrypt_step(&header).unwrap();
        assert_eq!(mk_alice, mk_bob);
        let _ = bob.encrypt_step();
    }
}
