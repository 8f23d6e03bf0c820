//! Salted token hashes: `sha256$<salt-hex>$<digest-hex>`.
//!
//! The digest is HMAC-SHA256 over the full token string keyed by a random
//! 16-byte salt.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

const SCHEME: &str = "sha256";
const SALT_LEN: usize = 16;

type HmacSha256 = Hmac<Sha256>;

fn digest(token: &str, salt: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(salt).expect("HMAC can take key of any size");
    mac.update(token.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Hash a token under a fresh random salt.
pub fn hash_token(token: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    hash_token_with_salt(token, &salt)
}

pub fn hash_token_with_salt(token: &str, salt: &[u8]) -> String {
    format!("{}${}${}", SCHEME, hex::encode(salt), hex::encode(digest(token, salt)))
}

/// Recompute under the stored salt and compare in constant time.
/// Malformed stored values never match.
pub fn verify_token_hash(token: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some(scheme), Some(salt_hex), Some(digest_hex)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if scheme != SCHEME {
        return false;
    }
    let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(digest_hex)) else {
        return false;
    };

    let actual = digest(token, &salt);
    actual.len() == expected.len() && bool::from(actual.ct_eq(&expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_format() {
        let hashed = hash_token("abc.def.ghi");
        let parts: Vec<&str> = hashed.split('$').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "sha256");
        assert_eq!(parts[1].len(), SALT_LEN * 2);
        assert_eq!(parts[2].len(), 64);
        assert!(!hashed.contains("abc.def.ghi"));
    }

    #[test]
    fn test_salts_differ_per_hash() {
        assert_ne!(hash_token("token"), hash_token("token"));
    }

    #[test]
    fn test_verify_roundtrip_and_mismatch() {
        let stored = hash_token("token-a");
        assert!(verify_token_hash("token-a", &stored));
        assert!(!verify_token_hash("token-b", &stored));
    }

    #[test]
    fn test_deterministic_with_fixed_salt() {
        let salt = [7u8; SALT_LEN];
        assert_eq!(hash_token_with_salt("t", &salt), hash_token_with_salt("t", &salt));
    }

    #[test]
    fn test_malformed_stored_hash_never_matches() {
        assert!(!verify_token_hash("t", ""));
        assert!(!verify_token_hash("t", "sha256$zz$00"));
        assert!(!verify_token_hash("t", "md5$00$00"));
        let stored = hash_token("t");
        let truncated = &stored[..stored.len() - 2];
        assert!(!verify_token_hash("t", truncated));
    }
}
