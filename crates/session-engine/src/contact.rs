//! Contact model (spec.md §3 persistent store surface; §4.F
//! `friendshipStateRequest`/`addContacts` control paths). A contact is the
//! per-peer friendship record the dispatcher creates or updates off the
//! Friendship State Machine (§4.G).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    friendship::FriendshipMetadata,
    model::{Decrypted, EncryptedBlob},
};

/// Props for a persisted contact, keyed by the peer's `secretName`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactProps {
    pub secret_name: String,
    pub friendship: FriendshipMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContactProps {
    pub fn new(secret_name: String) -> Self {
        let now = Utc::now();
        Self {
            secret_name,
            friendship: FriendshipMetadata::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Scan already-fetched contact blobs for one matching `secret_name`,
/// decrypting each in turn — the same find-by-scan idiom
/// `ratchet_driver::find_identity_by_device` uses for identities.
pub fn find_contact(
    blobs: &[EncryptedBlob],
    db_key: &[u8; 32],
    secret_name: &str,
) -> Option<Decrypted<ContactProps>> {
    blobs
        .iter()
        .filter_map(|blob| blob.open::<ContactProps>(db_key))
        .find(|d| d.props.secret_name == secret_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_contact_matches_by_secret_name() {
        let key = [7u8; 32];
        let bob = ContactProps::new("bob".to_string());
        let blob = EncryptedBlob::seal(uuid::Uuid::new_v4(), &key, &bob).unwrap();

        let found = find_contact(&[blob], &key, "bob").expect("bob is present");
        assert_eq!(found.props.secret_name, "bob");
        assert!(find_contact(&[], &key, "bob").is_none());
    }
}
