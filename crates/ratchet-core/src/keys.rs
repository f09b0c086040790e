//! Key material: long-term identity keys, one-time Curve25519 prekeys, and
//! one-time ML-KEM-1024 prekeys. Mirrors `dl_crypto::identity`'s keypair
//! shapes, extended with the post-quantum KEM leg the spec's hybrid
//! handshake requires.

use ml_kem::{
    kem::{Decapsulate, Encapsulate},
    EncodedSizeUser, KemCore, MlKem1024,
};
use rand::rngs::OsRng;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::error::RatchetError;

pub type KyberDecapsulationKey = <MlKem1024 as KemCore>::DecapsulationKey;
pub type KyberEncapsulationKey = <MlKem1024 as KemCore>::EncapsulationKey;

/// The device's long-term Curve25519 and Ed25519 keypairs.
/// `privateLongTermKey` / `privateSigningKey` in spec.md's SessionContext.
#[derive(ZeroizeOnDrop)]
pub struct LongTermKeyPair {
    #[zeroize(skip)]
    pub public: X25519Public,
    secret: [u8; 32],
}

impl LongTermKeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);
        Self {
            public,
            secret: secret.to_bytes(),
        }
    }

    pub fn from_bytes(secret: [u8; 32]) -> Self {
        let public = X25519Public::from(&StaticSecret::from(secret));
        Self { public, secret }
    }

    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret
    }

    pub fn static_secret(&self) -> StaticSecret {
        StaticSecret::from(self.secret)
    }
}

/// One-time Curve25519 prekey: `privateOneTimeKeys[i]` in spec.md §3.
/// Each carries a UUID so the driver and transport can name it in
/// `removeUsedKeys` / the wire header's `curveOneTimeKeyId`.
pub struct OneTimeKeyPair {
    pub id: Uuid,
    pub public: X25519Public,
    secret: [u8; 32],
}

impl OneTimeKeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);
        Self {
            id: Uuid::new_v4(),
            public,
            secret: secret.to_bytes(),
        }
    }

    pub fn static_secret(&self) -> StaticSecret {
        StaticSecret::from(self.secret)
    }

    pub fn generate_batch(count: usize) -> Vec<Self> {
        (0..count).map(|_| Self::generate()).collect()
    }
}

/// One-time ML-KEM-1024 prekey: `privateKyberOneTimeKeys[i]` in spec.md §3.
pub struct KyberKeyPair {
    pub id: Uuid,
    pub encapsulation_key: KyberEncapsulationKey,
    pub decapsulation_key: KyberDecapsulationKey,
}

impl KyberKeyPair {
    pub fn generate() -> Self {
        Self::generate_with_rng(&mut OsRng)
    }

    pub fn generate_with_rng(rng: &mut impl CryptoRngCore) -> Self {
        let (decapsulation_key, encapsulation_key) = MlKem1024::generate(rng);
        Self {
            id: Uuid::new_v4(),
            encapsulation_key,
            decapsulation_key,
        }
    }

    pub fn generate_batch(count: usize) -> Vec<Self> {
        let mut rng = OsRng;
        (0..count)
            .map(|_| Self::generate_with_rng(&mut rng))
            .collect()
    }

    pub fn public_bytes(&self) -> Vec<u8> {
        self.encapsulation_key.as_bytes().to_vec()
    }

    pub fn decapsulation_key_bytes(&self) -> Vec<u8> {
        self.decapsulation_key.as_bytes().to_vec()
    }
}

/// Reconstruct a decapsulation key from the bytes persisted in a
/// [`StoredKyberOneTimeKey`]. Used on the recipient path, where the one-time
/// key was generated and stored ahead of time rather than held in memory.
pub fn decapsulation_key_from_bytes(bytes: &[u8]) -> Result<KyberDecapsulationKey, RatchetError> {
    let dk_bytes = ml_kem::Encoded::<KyberDecapsulationKey>::try_from(bytes)
        .map_err(|_| RatchetError::InvalidKey("malformed Kyber-1024 decapsulation key".into()))?;
    Ok(KyberDecapsulationKey::from_bytes(&dk_bytes))
}

/// Encapsulate against a peer's published ML-KEM-1024 public key, producing
/// the ciphertext to embed in the wire header plus our shared secret.
pub fn kyber_encapsulate(
    peer_encapsulation_key_bytes: &[u8],
) -> Result<(Vec<u8>, [u8; 32]), RatchetError> {
    let ek_bytes = ml_kem::Encoded::<KyberEncapsulationKey>::try_from(peer_encapsulation_key_bytes)
        .map_err(|_| RatchetError::InvalidKey("malformed Kyber-1024 public key".into()))?;
    let ek = KyberEncapsulationKey::from_bytes(&ek_bytes);
    let (ciphertext, shared_secret) = ek
        .encapsulate(&mut OsRng)
        .map_err(|e| RatchetError::Encapsulation(format!("{e:?}")))?;
    let mut ss = [0u8; 32];
    ss.copy_from_slice(&shared_secret[..32]);
    Ok((ciphertext.to_vec(), ss))
}

/// Decapsulate a ciphertext produced by [`kyber_encapsulate`] using our
/// private decapsulation key.
pub fn kyber_decapsulate(
    decapsulation_key: &KyberDecapsulationKey,
    ciphertext: &[u8],
) -> Result<[u8; 32], RatchetError> {
    let ct = ml_kem::Ciphertext::<MlKem1024>::try_from(ciphertext)
        .map_err(|_| RatchetError::InvalidKey("malformed Kyber-1024 ciphertext".into()))?;
    let shared_secret = decapsulation_key
        .decapsulate(&ct)
        .map_err(|e| RatchetError::Decapsulation(format!("{e:?}")))?;
    let mut ss = [0u8; 32];
    ss.copy_from_slice(&shared_secret[..32]);
    Ok(ss)
}

/// Serializable, storage-friendly view of the keys the engine persists
/// inside `SessionContext.deviceKeys`. Secret material is kept as plain
/// bytes here because the *engine's* encrypted model layer is responsible
/// for encryption at rest; this type is only ever handled after the
/// surrounding blob has been decrypted.
#[derive(Serialize, Deserialize, Clone)]
pub struct StoredOneTimeKey {
    pub id: Uuid,
    pub scalar: [u8; 32],
}

#[derive(Serialize, Deserialize, Clone)]
pub struct StoredKyberOneTimeKey {
    pub id: Uuid,
    #[serde(with = "serde_bytes")]
    pub secret: Vec<u8>,
}
