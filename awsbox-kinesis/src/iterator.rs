//! Shard iterator tokens
//!
//! Iterators are stateless capability tokens: a JSON payload naming the
//! stream, shard, and read position, signed with a per-process HMAC secret
//! so clients cannot forge a cursor into another stream. Wire form is
//! `base64url(payload) "." base64url(tag)`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Validity window for an issued iterator, in seconds.
pub const ITERATOR_TTL_SECS: i64 = 300;

#[derive(Debug, Serialize, Deserialize)]
pub struct IteratorPayload {
    pub stream_name: String,
    pub shard_id: String,
    /// Next sequence number to read, as a decimal string.
    pub sequence_number: String,
    /// Unix seconds at issue time.
    pub issued_at: i64,
}

impl IteratorPayload {
    pub fn sequence(&self) -> Option<u128> {
        self.sequence_number.parse().ok()
    }
}

pub fn sign(secret: &[u8], payload: &IteratorPayload) -> String {
    let body = serde_json::to_vec(payload).expect("iterator payload serializes");
    let mut mac = HmacSha256::new_from_slice(secret).expect("any key length is valid");
    mac.update(&body);
    let tag = mac.finalize().into_bytes();

    format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(&body),
        URL_SAFE_NO_PAD.encode(tag)
    )
}

/// Decode and authenticate a token. Returns `None` for anything malformed
/// or carrying a bad signature; expiry is the caller's check.
pub fn verify(secret: &[u8], token: &str) -> Option<IteratorPayload> {
    let (body_b64, tag_b64) = token.split_once('.')?;
    let body = URL_SAFE_NO_PAD.decode(body_b64).ok()?;
    let tag = URL_SAFE_NO_PAD.decode(tag_b64).ok()?;

    let mut mac = HmacSha256::new_from_slice(secret).expect("any key length is valid");
    mac.update(&body);
    mac.verify_slice(&tag).ok()?;

    serde_json::from_slice(&body).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> IteratorPayload {
        IteratorPayload {
            stream_name: "s".to_string(),
            shard_id: "shardId-000000000000".to_string(),
            sequence_number: "42".to_string(),
            issued_at: 1_700_000_000,
        }
    }

    #[test]
    fn test_round_trip() {
        let secret = b"test-secret";
        let token = sign(secret, &payload());

        let decoded = verify(secret, &token).unwrap();
        assert_eq!(decoded.stream_name, "s");
        assert_eq!(decoded.sequence(), Some(42));
        assert_eq!(decoded.issued_at, 1_700_000_000);
    }

    #[test]
    fn test_tampered_token_rejected() {
        let secret = b"test-secret";
        let token = sign(secret, &payload());

        let other = IteratorPayload {
            stream_name: "other".to_string(),
            ..payload()
        };
        let forged_body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&other).unwrap());
        let tag = token.split_once('.').unwrap().1;

        assert!(verify(secret, &format!("{}.{}", forged_body, tag)).is_none());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = sign(b"secret-a", &payload());
        assert!(verify(b"secret-b", &token).is_none());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(verify(b"secret", "not-a-token").is_none());
        assert!(verify(b"secret", "a.b").is_none());
        assert!(verify(b"secret", "").is_none());
    }
}
