//! Data types for mirror and audit rows.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Encrypted snapshot of one masked row.
///
/// Existence means: this row is currently masked and recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorRecord {
    pub schema: String,
    pub table: String,
    pub id: String,
    pub subject_key: String,
    /// Base64 AES-GCM ciphertext with tag.
    pub encrypted_payload: String,
    /// Base64 96-bit nonce.
    pub nonce: String,
    /// Hex SHA-256 of the plaintext payload.
    pub integrity_digest: String,
}

/// Audited action kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Erase,
    Restore,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Erase => "ERASE",
            AuditAction::Restore => "RESTORE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ERASE" => Some(AuditAction::Erase),
            "RESTORE" => Some(AuditAction::Restore),
            _ => None,
        }
    }

    /// Value of the erased flag recorded with this action.
    pub fn erased_flag(&self) -> bool {
        matches!(self, AuditAction::Erase)
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the append-only audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub subject_key: String,
    pub action: AuditAction,
    pub erased: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_unit: Option<String>,
    pub operator_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<NaiveDateTime>,
}
