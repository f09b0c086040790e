//! HKDF-based key derivation helpers shared by the handshake and ratchet
//! chain steps. Mirrors the teacher's `dl_crypto::kdf` split between
//! root-key derivation (mixes a DH/KEM output into the chain) and
//! chain-key derivation (advances one chain, peels off a message key).

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::RatchetError;

/// KDF_RK: root key derivation from a DH or hybrid KEM output.
/// Returns (new_root_key, new_chain_key).
pub fn kdf_rk(rk: &[u8; 32], ikm: &[u8]) -> Result<([u8; 32], [u8; 32]), RatchetError> {
    let hk = Hkdf::<Sha256>::new(Some(rk), ikm);
    let mut new_rk = [0u8; 32];
    let mut ck = [0u8; 32];
    hk.expand(b"ratchet-core-rk", &mut new_rk)
        .map_err(|e| RatchetError::KeyDerivation(e.to_string()))?;
    hk.expand(b"ratchet-core-ck", &mut ck)
        .map_err(|e| RatchetError::KeyDerivation(e.to_string()))?;
    Ok((new_rk, ck))
}

/// KDF_CK: chain key -> (next_chain_key, message_key), via HMAC per the
/// Signal Double Ratchet spec.
pub fn kdf_ck(ck: &[u8; 32]) -> Result<([u8; 32], [u8; 32]), RatchetError> {
    type HmacSha256 = Hmac<Sha256>;

    let mut mac_ck = HmacSha256::new_from_slice(ck)
        .map_err(|e| RatchetError::KeyDerivation(e.to_string()))?;
    mac_ck.update(&[0x01]);
    let new_ck: [u8; 32] = mac_ck.finalize().into_bytes().into();

    let mut mac_mk = HmacSha256::new_from_slice(ck)
        .map_err(|e| RatchetError::KeyDerivation(e.to_string()))?;
    mac_mk.update(&[0x02]);
    let mk: [u8; 32] = mac_mk.finalize().into_bytes().into();

    Ok((new_ck, mk))
}

/// Hybrid X3DH-like root key derivation: mixes the classical DH outputs and
/// the ML-KEM shared secret into one initial root key, domain-separated
/// from plain DH-only derivations by the fixed `0xFF` padding prefix
/// (matching the teacher's X3DH info-string convention).
pub fn hybrid_handshake_key(dh_concat: &[u8], kem_shared_secret: &[u8]) -> Result<[u8; 32], RatchetError> {
    let mut ikm = vec![0xFFu8; 32];
    ikm.extend_from_slice(dh_concat);
    ikm.extend_from_slice(kem_shared_secret);

    let hk = Hkdf::<Sha256>::new(Some(&[0u8; 32]), &ikm);
    let mut sk = [0u8; 32];
    hk.expand(b"ratchet-core-hybrid-x3dh-v1", &mut sk)
        .map_err(|e| RatchetError::KeyDerivation(e.to_string()))?;
    Ok(sk)
}
