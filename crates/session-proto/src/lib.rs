//! Wire-level types shared between the session engine and its transport:
//! the plaintext `CryptoMessage` and the signed ratchet envelope that
//! carries it once encrypted.

pub mod codec;
pub mod error;
pub mod message;
pub mod ratchet_message;

pub use error::ProtoError;
pub use message::{CryptoMessage, DeliveryState, MessageFlags, MessageRecipient, MessageType, PushType};
pub use ratchet_message::{
    RatchetHeader, RatchetMessage, SignedRatchetMessage, SignedRatchetMessageMetadata,
};
