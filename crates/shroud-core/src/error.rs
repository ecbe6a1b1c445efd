//! Error types for Shroud.
//!
//! Messages carry subject keys, table names and row ids only. Field values
//! never appear in an error.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Integrity failure: {0}")]
    IntegrityFailure(String),

    #[error("Authentication failure: {0}")]
    AuthenticationFailure(String),

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported value: {0}")]
    UnsupportedValue(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for both tamper signals: digest mismatch and cipher tag mismatch.
    pub fn is_tamper(&self) -> bool {
        matches!(self, Error::IntegrityFailure(_) | Error::AuthenticationFailure(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tamper_kinds() {
        assert!(Error::IntegrityFailure("x".into()).is_tamper());
        assert!(Error::AuthenticationFailure("x".into()).is_tamper());
        assert!(!Error::NotFound("x".into()).is_tamper());
        assert!(!Error::ConcurrencyConflict("x".into()).is_tamper());
    }
}
