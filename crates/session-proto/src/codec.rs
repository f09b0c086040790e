//! Self-describing binary codec for wire types (spec.md §6.5 allows any
//! such format; this build uses CBOR via `ciborium` in place of the
//! original's BSON).

use serde::{de::DeserializeOwned, Serialize};

use crate::error::ProtoError;

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtoError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| ProtoError::Encode(e.to_string()))?;
    Ok(buf)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtoError> {
    ciborium::from_reader(bytes).map_err(|e| ProtoError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CryptoMessage, MessageRecipient, MessageType, PushType};
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn crypto_message_roundtrips() {
        let msg = CryptoMessage {
            text: "hi".into(),
            sent_date: Utc::now(),
            recipient: MessageRecipient::Nickname { name: "bob".into() },
            metadata: json!({ "k": "v" }),
            transport_info: vec![1, 2, 3],
            message_type: MessageType::Normal,
            push_type: PushType::Alert,
        };

        let bytes = encode(&msg).expect("encode");
        let decoded: CryptoMessage = decode(&bytes).expect("decode");
        assert_eq!(decoded.text, msg.text);
        assert_eq!(decoded.recipient, msg.recipient);
        assert_eq!(decoded.transport_info, msg.transport_info);
    }
}
