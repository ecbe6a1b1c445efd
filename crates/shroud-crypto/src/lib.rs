//! Crypto service — AES-GCM sealing of mirror payloads, SHA-256 audit digests.
//!
//! The GCM tag is the security boundary: any change to ciphertext, nonce or
//! tag fails decryption. The SHA-256 digest is a secondary, human-auditable
//! checksum stored next to the ciphertext and is verified in addition to the
//! tag, never instead of it.

pub mod cipher;
pub mod digest;

pub use cipher::{CryptoService, Sealed, KEY_LENGTHS, NONCE_LENGTH, TAG_LENGTH};
pub use digest::digest;
