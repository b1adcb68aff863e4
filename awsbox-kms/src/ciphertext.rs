//! Self-describing ciphertext envelope
//!
//! Layout:
//!
//! ```text
//! magic(1) | key_id_len(1) | key_id | version_index(4 BE) |
//! nonce(12) | aad_hash(32) | ciphertext || tag(16)
//! ```
//!
//! The blob alone identifies the key and material version used at encrypt
//! time; callers never supply them out of band. The leading magic byte
//! versions the envelope itself.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const MAGIC: u8 = 0x01;

pub const NONCE_LEN: usize = 12;
pub const AAD_HASH_LEN: usize = 32;
pub const TAG_LEN: usize = 16;

#[derive(Debug, PartialEq, Eq)]
pub struct CiphertextBlob {
    pub key_id: String,
    pub version_index: u32,
    pub nonce: [u8; NONCE_LEN],
    pub aad_hash: [u8; AAD_HASH_LEN],
    /// Ciphertext with the GCM tag appended.
    pub ciphertext: Vec<u8>,
}

impl CiphertextBlob {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            2 + self.key_id.len() + 4 + NONCE_LEN + AAD_HASH_LEN + self.ciphertext.len(),
        );
        out.push(MAGIC);
        out.push(self.key_id.len() as u8);
        out.extend_from_slice(self.key_id.as_bytes());
        out.extend_from_slice(&self.version_index.to_be_bytes());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.aad_hash);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse a blob. `None` for anything that is not a well-formed
    /// envelope of the current version.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let (&magic, rest) = bytes.split_first()?;
        if magic != MAGIC {
            return None;
        }
        let (&key_id_len, rest) = rest.split_first()?;
        let key_id_len = key_id_len as usize;
        if rest.len() < key_id_len + 4 + NONCE_LEN + AAD_HASH_LEN + TAG_LEN {
            return None;
        }

        let (key_id, rest) = rest.split_at(key_id_len);
        let key_id = std::str::from_utf8(key_id).ok()?.to_string();
        let (version, rest) = rest.split_at(4);
        let version_index = u32::from_be_bytes(version.try_into().ok()?);
        let (nonce, rest) = rest.split_at(NONCE_LEN);
        let (aad_hash, ciphertext) = rest.split_at(AAD_HASH_LEN);

        Some(Self {
            key_id,
            version_index,
            nonce: nonce.try_into().ok()?,
            aad_hash: aad_hash.try_into().ok()?,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// Canonical byte encoding of an encryption context, used both as GCM AAD
/// and, hashed, inside the blob. BTreeMap ordering makes it stable across
/// callers.
pub fn canonical_context(context: &BTreeMap<String, String>) -> Vec<u8> {
    serde_json::to_vec(context).expect("string map serializes")
}

pub fn context_hash(context: &BTreeMap<String, String>) -> [u8; AAD_HASH_LEN] {
    Sha256::digest(canonical_context(context)).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob() -> CiphertextBlob {
        CiphertextBlob {
            key_id: "f3b3b1c2-aaaa-bbbb-cccc-000000000001".to_string(),
            version_index: 3,
            nonce: [7; NONCE_LEN],
            aad_hash: [9; AAD_HASH_LEN],
            ciphertext: vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17],
        }
    }

    #[test]
    fn test_round_trip() {
        let original = blob();
        let decoded = CiphertextBlob::decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_rejects_wrong_magic() {
        let mut bytes = blob().encode();
        bytes[0] = 0x02;
        assert!(CiphertextBlob::decode(&bytes).is_none());
    }

    #[test]
    fn test_rejects_truncation() {
        let bytes = blob().encode();
        for len in 0..bytes.len() - TAG_LEN {
            assert!(
                CiphertextBlob::decode(&bytes[..len]).is_none(),
                "accepted a {}-byte prefix",
                len
            );
        }
    }

    #[test]
    fn test_context_hash_is_order_independent() {
        let mut a = BTreeMap::new();
        a.insert("user".to_string(), "1".to_string());
        a.insert("app".to_string(), "web".to_string());

        let mut b = BTreeMap::new();
        b.insert("app".to_string(), "web".to_string());
        b.insert("user".to_string(), "1".to_string());

        assert_eq!(context_hash(&a), context_hash(&b));
    }

    #[test]
    fn test_context_hash_distinguishes_values() {
        let mut a = BTreeMap::new();
        a.insert("user".to_string(), "1".to_string());
        let mut b = BTreeMap::new();
        b.insert("user".to_string(), "2".to_string());

        assert_ne!(context_hash(&a), context_hash(&b));
        assert_ne!(context_hash(&a), context_hash(&BTreeMap::new()));
    }
}
