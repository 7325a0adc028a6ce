use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Streams `bundle_bytes` through HMAC-SHA256 keyed by the build-embedded
/// base64 `key`, base64-encodes the digest, and compares it to `expected`
/// (the manifest's `signature` field). A single flipped bit anywhere in
/// `bundle_bytes` changes the digest (§8 property).
#[must_use]
pub fn verify_signature(key_base64: &str, bundle_bytes: &[u8], expected_base64: &str) -> bool {
    let Ok(key) = base64::engine::general_purpose::STANDARD.decode(key_base64) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(&key) else {
        return false;
    };
    mac.update(bundle_bytes);
    let digest = mac.finalize().into_bytes();
    let actual_base64 = base64::engine::general_purpose::STANDARD.encode(digest);
    actual_base64 == expected_base64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> String {
        base64::engine::general_purpose::STANDARD.encode(b"test-signing-key-0123456789abcdef")
    }

    fn sign(key_base64: &str, bytes: &[u8]) -> String {
        let key = base64::engine::general_purpose::STANDARD.decode(key_base64).unwrap();
        let mut mac = HmacSha256::new_from_slice(&key).unwrap();
        mac.update(bytes);
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    #[test]
    fn matching_signature_verifies() {
        let k = key();
        let bytes = b"bundle contents go here";
        let sig = sign(&k, bytes);
        assert!(verify_signature(&k, bytes, &sig));
    }

    #[test]
    fn single_bit_flip_changes_signature() {
        let k = key();
        let mut bytes = b"bundle contents go here".to_vec();
        let sig = sign(&k, &bytes);
        bytes[0] ^= 0x01;
        assert!(!verify_signature(&k, &bytes, &sig));
    }
}
