use thiserror::Error;

/// Error taxonomy by kind, not by name (spec.md §7): setup errors fail fast,
/// persistent-data and cryptographic errors poison their job, protocol-
/// ordering errors stash for retry, transport errors surface to the runner.
#[derive(Debug, Error)]
pub enum EngineError {
    // -- Setup --
    #[error("session context has not been initialized")]
    SessionNotInitialized,
    #[error("database has not been initialized")]
    DatabaseNotInitialized,
    #[error("transport has not been initialized")]
    TransportNotInitialized,

    // -- Persistent-data --
    #[error("failed to decrypt stored props")]
    DecryptFailed,
    #[error("failed to encrypt props for storage")]
    EncryptFailed,
    #[error("stored props do not match the expected schema")]
    SchemaMismatch,
    #[error("no session identity for device {0}")]
    MissingSessionIdentity(uuid::Uuid),
    #[error("no communication found for the given recipient")]
    MissingCommunication,

    // -- Cryptographic --
    #[error(transparent)]
    Ratchet(#[from] ratchet_core::RatchetError),
    #[error("signed ratchet message failed signature verification")]
    InvalidSignature,

    // -- Protocol-ordering --
    #[error("initial message has not been received yet; task stashed")]
    InitialMessageNotReceived,

    // -- Transport / store (opaque, user-defined) --
    #[error("transport error: {0}")]
    Transport(String),
    #[error("store error: {0}")]
    Store(String),

    // -- Wire encoding --
    #[error(transparent)]
    Proto(#[from] session_proto::ProtoError),

    // -- State invariants --
    #[error("invalid one-time key id referenced: {0}")]
    InvalidKeyId(uuid::Uuid),
    #[error("props error: {0}")]
    PropsError(String),
}

impl EngineError {
    /// Jobs failing with one of these are permanently deleted (poisoned);
    /// see spec.md §4.D step 6 and §8 "Poison".
    pub fn is_poison(&self) -> bool {
        matches!(
            self,
            EngineError::MissingSessionIdentity(_)
                | EngineError::Ratchet(ratchet_core::RatchetError::AeadDecrypt)
                | EngineError::InvalidSignature
        )
    }

    /// Inbound decrypt failures caused by the peer skipping ahead before
    /// their initial message arrived are not errors — they stash (§4.E.2
    /// step 6).
    pub fn is_stash(&self) -> bool {
        matches!(self, EngineError::InitialMessageNotReceived)
    }
}
