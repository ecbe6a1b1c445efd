//! Commands, reports and the command state machine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use shroud_core::Operator;
use shroud_store::AuditRecord;

/// Erase a subject's governed rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EraseCommand {
    pub subject_key: String,
    /// Target ids per table. Ids listed under a parent table also select
    /// that parent's child rows.
    #[serde(default)]
    pub table_ids: BTreeMap<String, Vec<String>>,
    pub operator: Operator,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub doc_ref: Option<String>,
}

impl EraseCommand {
    pub fn new(subject_key: impl Into<String>, operator: Operator) -> Self {
        Self {
            subject_key: subject_key.into(),
            table_ids: BTreeMap::new(),
            operator,
            reason: None,
            doc_ref: None,
        }
    }

    pub fn with_ids<I, S>(mut self, table: impl Into<String>, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.table_ids
            .entry(table.into())
            .or_default()
            .extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_doc_ref(mut self, doc_ref: impl Into<String>) -> Self {
        self.doc_ref = Some(doc_ref.into());
        self
    }

    /// Ids supplied for `table` (case-insensitive), if any.
    pub fn ids_for(&self, table: &str) -> Option<&[String]> {
        self.table_ids
            .iter()
            .find(|(t, _)| t.eq_ignore_ascii_case(table))
            .map(|(_, ids)| ids.as_slice())
    }
}

/// Restore every mirrored row of a subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreCommand {
    pub subject_key: String,
    pub operator: Operator,
    #[serde(default)]
    pub reason: Option<String>,
    /// Abort instead of reporting when a row was unmasked out of band.
    #[serde(default)]
    pub fail_on_conflict: bool,
}

impl RestoreCommand {
    pub fn new(subject_key: impl Into<String>, operator: Operator) -> Self {
        Self {
            subject_key: subject_key.into(),
            operator,
            reason: None,
            fail_on_conflict: false,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn fail_on_conflict(mut self, fail: bool) -> Self {
        self.fail_on_conflict = fail;
        self
    }
}

/// Lifecycle of one command. `Failed` is reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandState {
    Started,
    PerRuleProcessing,
    Audited,
    Done,
    Failed,
}

impl CommandState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandState::Started => "STARTED",
            CommandState::PerRuleProcessing => "PER_RULE_PROCESSING",
            CommandState::Audited => "AUDITED",
            CommandState::Done => "DONE",
            CommandState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for CommandState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-table erase counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableErase {
    pub schema: String,
    pub table: String,
    pub mirrored: usize,
    pub masked: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EraseReport {
    pub command_id: String,
    pub subject_key: String,
    pub state: CommandState,
    pub tables: Vec<TableErase>,
    /// `None` when nothing was masked and no audit row was written.
    pub audit_id: Option<i64>,
}

impl EraseReport {
    pub fn mirrored(&self) -> usize {
        self.tables.iter().map(|t| t.mirrored).sum()
    }

    pub fn masked(&self) -> usize {
        self.tables.iter().map(|t| t.masked).sum()
    }

    pub fn is_noop(&self) -> bool {
        self.audit_id.is_none()
    }
}

/// Per-table restore counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRestore {
    pub schema: String,
    pub table: String,
    pub restored: usize,
}

/// A row whose writeback found it already unmasked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowConflict {
    pub schema: String,
    pub table: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub command_id: String,
    pub subject_key: String,
    pub state: CommandState,
    pub tables: Vec<TableRestore>,
    pub conflicts: Vec<RowConflict>,
    /// `None` when the subject had no mirrored rows.
    pub audit_id: Option<i64>,
}

impl RestoreReport {
    pub fn restored(&self) -> usize {
        self.tables.iter().map(|t| t.restored).sum()
    }

    /// No row was written back. Conflicts may still be listed.
    pub fn is_noop(&self) -> bool {
        self.audit_id.is_none()
    }
}

/// What is currently held for a subject.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStatus {
    pub subject_key: String,
    pub mirrored_rows: i64,
    pub audit: Vec<AuditRecord>,
}
