//! Encrypted Model Layer (spec.md §4.B): a generic "decrypt → mutate →
//! re-encrypt" envelope over stored records. Grounded in the teacher's
//! per-column AEAD encryption (`dl_store`'s `*_enc` row fields) and
//! `dl_crypto::aead`, generalized into one reusable envelope type instead
//! of one encrypted column per record kind.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::EngineError;

/// A record as persisted by `SessionStore`: an opaque AEAD-sealed blob.
/// The database symmetric key never leaves this module.
#[derive(Debug, Clone)]
pub struct EncryptedBlob {
    pub id: uuid::Uuid,
    pub sealed: Vec<u8>,
}

impl EncryptedBlob {
    pub fn seal<T: Serialize>(
        id: uuid::Uuid,
        db_key: &[u8; 32],
        value: &T,
    ) -> Result<Self, EngineError> {
        let plaintext = serde_json::to_vec(value).map_err(|_| EngineError::EncryptFailed)?;
        let sealed = ratchet_core::aead::encrypt(db_key, &plaintext, id.as_bytes())
            .map_err(|_| EngineError::EncryptFailed)?;
        Ok(Self { id, sealed })
    }

    /// Decrypt into a typed, in-memory view. Per spec.md §4.B, a decrypt
    /// failure is reported as "no props", never a panic.
    pub fn open<T: DeserializeOwned>(&self, db_key: &[u8; 32]) -> Option<Decrypted<T>> {
        let plaintext = ratchet_core::aead::decrypt(db_key, &self.sealed, self.id.as_bytes()).ok()?;
        let props: T = serde_json::from_slice(&plaintext).ok()?;
        Some(Decrypted {
            id: self.id,
            props,
        })
    }
}

/// The in-memory, decrypted view of a record. `T` is the record's typed
/// props (e.g. `SessionIdentityProps`, `CommunicationProps`).
#[derive(Debug, Clone)]
pub struct Decrypted<T> {
    pub id: uuid::Uuid,
    pub props: T,
}

impl<T: Serialize + Clone> Decrypted<T> {
    /// `props(key) -> Option<T>`
    pub fn props(&self) -> T {
        self.props.clone()
    }

    /// `updateProps(key, T) -> EncryptedBlob'`
    pub fn update_props(&mut self, db_key: &[u8; 32], new_props: T) -> Result<EncryptedBlob, EngineError> {
        self.props = new_props;
        EncryptedBlob::seal(self.id, db_key, &self.props)
    }
}

/// `updatePropsMetadata(key, bytes, field) -> T'`: merge a raw metadata
/// document into one field of an already-decrypted model, re-sealing it.
/// Used by the dispatcher's `editMessageMetadata` control path (§4.F) to
/// merge per-sender reactions without decoding the whole props type twice.
pub fn update_props_metadata<T, F>(
    decrypted: &mut Decrypted<T>,
    db_key: &[u8; 32],
    mutate: F,
) -> Result<EncryptedBlob, EngineError>
where
    T: Serialize + Clone,
    F: FnOnce(&mut T),
{
    mutate(&mut decrypted.props);
    EncryptedBlob::seal(decrypted.id, db_key, &decrypted.props)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Props {
        count: u32,
        name: String,
    }

    #[test]
    fn seal_and_open_roundtrips() {
        let key = [9u8; 32];
        let id = uuid::Uuid::new_v4();
        let props = Props {
            count: 1,
            name: "alice".into(),
        };
        let blob = EncryptedBlob::seal(id, &key, &props).unwrap();
        let decrypted: Decrypted<Props> = blob.open(&key).expect("should decrypt");
        assert_eq!(decrypted.props, props);
    }

    #[test]
    fn open_with_wrong_key_returns_none_not_panic() {
        let key = [9u8; 32];
        let wrong_key = [1u8; 32];
        let id = uuid::Uuid::new_v4();
        let props = Props {
            count: 1,
            name: "alice".into(),
        };
        let blob = EncryptedBlob::seal(id, &key, &props).unwrap();
        assert!(blob.open::<Props>(&wrong_key).is_none());
    }

    #[test]
    fn update_props_reseals_with_new_value() {
        let key = [3u8; 32];
        let id = uuid::Uuid::new_v4();
        let props = Props {
            count: 1,
            name: "alice".into(),
        };
        let blob = EncryptedBlob::seal(id, &key, &props).unwrap();
        let mut decrypted: Decrypted<Props> = blob.open(&key).unwrap();
        let new_blob = decrypted
            .update_props(&key, Props { count: 2, name: "alice".into() })
            .unwrap();
        let reopened: Decrypted<Props> = new_blob.open(&key).unwrap();
        assert_eq!(reopened.props.count, 2);
    }
}
