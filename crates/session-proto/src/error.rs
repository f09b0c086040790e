use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("failed to encode value: {0}")]
    Encode(String),
    #[error("failed to decode value: {0}")]
    Decode(String),
}
