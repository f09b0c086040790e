//! Hybrid classical/post-quantum Double Ratchet primitive.
//!
//! Exposes a [`manager::RatchetStateManager`] trait as the boundary the
//! engine crate programs against, backed by [`manager::HybridRatchetManager`]:
//! a Curve25519 triple-DH handshake mixed with an ML-KEM-1024 encapsulation,
//! feeding a standard Double Ratchet chain (HKDF root/chain keys, XChaCha20-
//! Poly1305 message sealing).

pub mod aead;
pub mod error;
pub mod handshake;
pub mod kdf;
pub mod keys;
pub mod manager;
pub mod ratchet;

pub use error::RatchetError;
pub use handshake::{LocalKeyMaterial, RemoteKeyMaterial, SenderHandshake};
pub use keys::{
    decapsulation_key_from_bytes, KyberKeyPair, LongTermKeyPair, OneTimeKeyPair,
    StoredKyberOneTimeKey, StoredOneTimeKey,
};
pub use manager::{HybridRatchetManager, NewSession, RatchetCiphertext, RatchetStateManager};
pub use ratchet::{DhRatchetHeader, RatchetState};
