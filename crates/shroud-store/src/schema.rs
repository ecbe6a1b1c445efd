//! Database schema SQL for the mirror and audit tables.

/// Encrypted per-row snapshots. Unique per (schema, table, id).
pub const MIRROR_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS erasure_mirror (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    target_schema TEXT NOT NULL,
    target_table TEXT NOT NULL,
    target_id TEXT NOT NULL,
    subject_key TEXT NOT NULL,
    encrypted_payload TEXT NOT NULL,
    nonce TEXT NOT NULL,
    integrity_digest TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT,
    UNIQUE (target_schema, target_table, target_id)
);

CREATE INDEX IF NOT EXISTS idx_mirror_subject ON erasure_mirror(subject_key);
"#;

/// Append-only audit trail.
pub const AUDIT_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS erasure_audit (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    target_schema TEXT,
    target_table TEXT,
    target_id TEXT,
    subject_key TEXT NOT NULL,
    action TEXT NOT NULL CHECK (action IN ('ERASE', 'RESTORE')),
    erased INTEGER NOT NULL,
    doc_ref TEXT,
    reason TEXT,
    operator_name TEXT,
    operator_origin TEXT,
    operator_unit TEXT,
    operator_id TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_audit_subject ON erasure_audit(subject_key);
"#;

/// Triggers that make the audit table append-only.
pub const AUDIT_TRIGGERS_SQL: &str = r#"
CREATE TRIGGER IF NOT EXISTS erasure_audit_no_update BEFORE UPDATE ON erasure_audit BEGIN
    SELECT RAISE(ABORT, 'erasure_audit is append-only');
END;

CREATE TRIGGER IF NOT EXISTS erasure_audit_no_delete BEFORE DELETE ON erasure_audit BEGIN
    SELECT RAISE(ABORT, 'erasure_audit is append-only');
END;
"#;
