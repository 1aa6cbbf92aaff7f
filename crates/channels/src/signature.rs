//! 企业微信 callback signature: SHA1 over the sorted concatenation of
//! token, timestamp, nonce and the encrypted payload, hex encoded.

use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

pub fn compute_signature(token: &str, timestamp: &str, nonce: &str, payload: &str) -> String {
    let mut parts = [token, timestamp, nonce, payload];
    parts.sort_unstable();

    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Constant-time comparison against the recomputed signature. Hex case is ignored.
pub fn verify_signature(
    signature: &str,
    token: &str,
    timestamp: &str,
    nonce: &str,
    payload: &str,
) -> bool {
    let expected = compute_signature(token, timestamp, nonce, payload);
    let given = signature.trim().to_ascii_lowercase();
    expected.as_bytes().ct_eq(given.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha1_known_value() {
        // sorted ["", "", "", "abc"] concatenates to "abc"
        assert_eq!(
            compute_signature("abc", "", "", ""),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_known_vector() {
        // "0" < "a" < "b" < "c"  =>  "0abc"
        assert_eq!(
            compute_signature("c", "a", "b", "0"),
            "a8addbc99f8b3f51d2adbceb605d650b9a8940e2"
        );
    }

    #[test]
    fn test_argument_order_is_irrelevant() {
        let a = compute_signature("token", "1700000000", "nonce", "payload");
        let b = compute_signature("payload", "nonce", "token", "1700000000");
        let c = compute_signature("nonce", "payload", "1700000000", "token");
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn test_any_byte_change_changes_signature() {
        let base = compute_signature("token", "1700000000", "nonce", "payload");
        assert_ne!(base, compute_signature("tokem", "1700000000", "nonce", "payload"));
        assert_ne!(base, compute_signature("token", "1700000001", "nonce", "payload"));
        assert_ne!(base, compute_signature("token", "1700000000", "Nonce", "payload"));
        assert_ne!(base, compute_signature("token", "1700000000", "nonce", "payloae"));
    }

    #[test]
    fn test_verify() {
        let sig = compute_signature("token", "1700000000", "nonce", "payload");
        assert!(verify_signature(&sig, "token", "1700000000", "nonce", "payload"));
        assert!(verify_signature(&sig.to_uppercase(), "token", "1700000000", "nonce", "payload"));
        assert!(!verify_signature(&sig, "token", "1700000000", "nonce", "payload2"));
        assert!(!verify_signature(&sig[..39], "token", "1700000000", "nonce", "payload"));
        assert!(!verify_signature("", "token", "1700000000", "nonce", "payload"));
    }
}
