//! AES-GCM encryption of mirror payloads.

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::Aead;
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::info;

use shroud_core::{Error, Result};

type Aes192Gcm = AesGcm<Aes192, U12>;

/// Accepted raw key lengths in bytes (AES-128, AES-192, AES-256).
pub const KEY_LENGTHS: [usize; 3] = [16, 24, 32];
/// GCM nonce length in bytes (96 bits), fresh per encryption.
pub const NONCE_LENGTH: usize = 12;
/// GCM authentication tag length in bytes (128 bits), appended to ciphertext.
pub const TAG_LENGTH: usize = 16;

enum Cipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

/// Ciphertext (with tag) and nonce, both Base64.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: String,
    pub nonce: String,
}

/// Process-wide crypto service. Read-only after construction.
pub struct CryptoService {
    cipher: Cipher,
    key_bits: usize,
}

impl std::fmt::Debug for CryptoService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoService")
            .field("key_bits", &self.key_bits)
            .finish_non_exhaustive()
    }
}

impl CryptoService {
    /// Build from an externally provisioned Base64 key.
    pub fn from_base64_key(encoded: &str) -> Result<Self> {
        let raw = BASE64
            .decode(encoded.trim().as_bytes())
            .map_err(|e| Error::Config(format!("erasure key is not valid Base64: {}", e)))?;
        Self::from_key_bytes(&raw)
    }

    /// Build from raw key bytes. Length must be 16, 24 or 32.
    pub fn from_key_bytes(raw: &[u8]) -> Result<Self> {
        let bad_key = |_| Error::Config("erasure key rejected by cipher".into());
        let cipher = match raw.len() {
            16 => Cipher::Aes128(Aes128Gcm::new_from_slice(raw).map_err(bad_key)?),
            24 => Cipher::Aes192(Aes192Gcm::new_from_slice(raw).map_err(bad_key)?),
            32 => Cipher::Aes256(Aes256Gcm::new_from_slice(raw).map_err(bad_key)?),
            n => {
                return Err(Error::Config(format!(
                    "erasure key must decode to 16, 24 or 32 bytes, got {}",
                    n
                )))
            }
        };
        let key_bits = raw.len() * 8;
        info!("Crypto service ready: AES-{}-GCM", key_bits);
        Ok(Self { cipher, key_bits })
    }

    /// Fresh random 256-bit key, Base64-encoded.
    pub fn generate_key() -> String {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        BASE64.encode(key)
    }

    pub fn key_bits(&self) -> usize {
        self.key_bits
    }

    /// Encrypt plaintext JSON under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<Sealed> {
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let data = plaintext.as_bytes();

        let ciphertext = match &self.cipher {
            Cipher::Aes128(c) => c.encrypt(nonce, data),
            Cipher::Aes192(c) => c.encrypt(nonce, data),
            Cipher::Aes256(c) => c.encrypt(nonce, data),
        }
        .map_err(|_| Error::Internal("encryption failed".into()))?;

        Ok(Sealed {
            ciphertext: BASE64.encode(ciphertext),
            nonce: BASE64.encode(nonce_bytes),
        })
    }

    /// Decrypt and authenticate. Any alteration is an `AuthenticationFailure`.
    pub fn decrypt(&self, ciphertext: &str, nonce: &str) -> Result<String> {
        let tampered = |what: &str| Error::AuthenticationFailure(what.to_string());

        let nonce_raw = BASE64
            .decode(nonce.as_bytes())
            .map_err(|_| tampered("nonce is not valid Base64"))?;
        if nonce_raw.len() != NONCE_LENGTH {
            return Err(tampered("nonce has wrong length"));
        }
        let data = BASE64
            .decode(ciphertext.as_bytes())
            .map_err(|_| tampered("ciphertext is not valid Base64"))?;
        if data.len() < TAG_LENGTH {
            return Err(tampered("ciphertext shorter than tag"));
        }

        let nonce = Nonce::from_slice(&nonce_raw);
        let plaintext = match &self.cipher {
            Cipher::Aes128(c) => c.decrypt(nonce, data.as_slice()),
            Cipher::Aes192(c) => c.decrypt(nonce, data.as_slice()),
            Cipher::Aes256(c) => c.decrypt(nonce, data.as_slice()),
        }
        .map_err(|_| tampered("authentication tag mismatch"))?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::Internal("decrypted payload is not UTF-8".into()))
    }

    /// SHA-256 hex digest of the plaintext.
    pub fn digest(&self, plaintext: &str) -> String {
        crate::digest::digest(plaintext)
    }
}
