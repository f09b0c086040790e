//! XChaCha20-Poly1305 AEAD wrapper, matching `dl_crypto::aead`'s
//! nonce-prefixed-ciphertext convention.

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    XChaCha20Poly1305, XNonce,
};

use crate::error::RatchetError;

/// Encrypt `plaintext` under `key`, returning `nonce || ciphertext || tag`.
pub fn encrypt(key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, RatchetError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ct = cipher
        .encrypt(
            &nonce,
            chacha20poly1305::aead::Payload { msg: plaintext, aad },
        )
        .map_err(|_| RatchetError::AeadEncrypt)?;

    let mut out = Vec::with_capacity(nonce.len() + ct.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Decrypt a value produced by [`encrypt`].
pub fn decrypt(key: &[u8; 32], sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, RatchetError> {
    if sealed.len() < 24 {
        return Err(RatchetError::AeadDecrypt);
    }
    let (nonce_bytes, ct) = sealed.split_at(24);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(nonce, chacha20poly1305::aead::Payload { msg: ct, aad })
        .map_err(|_| RatchetError::AeadDecrypt)
}
