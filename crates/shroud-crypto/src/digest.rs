//! SHA-256 integrity digest over mirror plaintext.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of the plaintext JSON.
pub fn digest(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        assert_eq!(
            digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_digest_is_deterministic() {
        assert_eq!(digest(r#"{"a":1}"#), digest(r#"{"a":1}"#));
        assert_ne!(digest(r#"{"a":1}"#), digest(r#"{"a":2}"#));
    }
}
