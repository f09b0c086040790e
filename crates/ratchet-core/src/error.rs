use thiserror::Error;

#[derive(Debug, Error)]
pub enum RatchetError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("signature verification failed")]
    SignatureVerification,

    #[error("AEAD encryption failed")]
    AeadEncrypt,

    #[error("AEAD decryption failed (authentication tag mismatch)")]
    AeadDecrypt,

    #[error("post-quantum encapsulation failed: {0}")]
    Encapsulation(String),

    #[error("post-quantum decapsulation failed: {0}")]
    Decapsulation(String),

    #[error("ratchet has not been initialized for this identity")]
    NotInitialized,

    #[error("too many skipped messages in one chain ({0} > limit)")]
    TooManySkipped(u64),

    #[error("initial message has not been received yet")]
    InitialMessageNotReceived,

    #[error("state serialization error: {0}")]
    StateSerialization(String),
}
