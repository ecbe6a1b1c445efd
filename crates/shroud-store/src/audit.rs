//! Audit Store: append-only record of erase and restore actions.
//!
//! Only inserts and reads are exposed. The table itself rejects UPDATE and
//! DELETE through triggers.

use rusqlite::{params, Connection, Row};
use tracing::{info, warn};

use shroud_core::normalize::parse_timestamp;
use shroud_core::{Operator, Result};

use crate::sqlite::db_err;
use crate::types::{AuditAction, AuditRecord};

/// Record a completed erase of a subject. Returns the audit row id.
pub fn record_erase(
    conn: &Connection,
    subject_key: &str,
    doc_ref: Option<&str>,
    reason: Option<&str>,
    operator: &Operator,
) -> Result<i64> {
    insert(conn, AuditAction::Erase, subject_key, doc_ref, reason, operator)
}

/// Record a completed restore of a subject. Returns the audit row id.
pub fn record_restore(
    conn: &Connection,
    subject_key: &str,
    reason: Option<&str>,
    operator: &Operator,
) -> Result<i64> {
    insert(conn, AuditAction::Restore, subject_key, None, reason, operator)
}

fn insert(
    conn: &Connection,
    action: AuditAction,
    subject_key: &str,
    doc_ref: Option<&str>,
    reason: Option<&str>,
    operator: &Operator,
) -> Result<i64> {
    conn.prepare_cached(
        "INSERT INTO erasure_audit
            (subject_key, action, erased, doc_ref, reason,
             operator_name, operator_origin, operator_unit, operator_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .map_err(db_err)?
    .execute(params![
        subject_key,
        action.as_str(),
        action.erased_flag(),
        doc_ref,
        reason,
        operator.name,
        operator.origin,
        operator.unit,
        operator.id,
    ])
    .map_err(db_err)?;
    let id = conn.last_insert_rowid();
    info!(
        "Audit {} recorded for subject {} by operator {} (audit id {})",
        action, subject_key, operator.id, id
    );
    Ok(id)
}

/// A subject's audit trail, oldest first.
pub fn list_by_subject(conn: &Connection, subject_key: &str) -> Result<Vec<AuditRecord>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT id, target_schema, target_table, target_id, subject_key, action, erased,
                    doc_ref, reason, operator_name, operator_origin, operator_unit,
                    operator_id, created_at
             FROM erasure_audit WHERE subject_key = ?1 ORDER BY id",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![subject_key], row_to_record)
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(db_err)?;
    Ok(rows.into_iter().flatten().collect())
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<Option<AuditRecord>> {
    let id: i64 = row.get(0)?;
    let action_text: String = row.get(5)?;
    let Some(action) = AuditAction::parse(&action_text) else {
        warn!("Audit row {} has unknown action, skipping", id);
        return Ok(None);
    };
    let created_at: Option<String> = row.get(13)?;
    Ok(Some(AuditRecord {
        id,
        target_schema: row.get(1)?,
        target_table: row.get(2)?,
        target_id: row.get(3)?,
        subject_key: row.get(4)?,
        action,
        erased: row.get(6)?,
        doc_ref: row.get(7)?,
        reason: row.get(8)?,
        operator_name: row.get(9)?,
        operator_origin: row.get(10)?,
        operator_unit: row.get(11)?,
        operator_id: row.get(12)?,
        created_at: created_at.as_deref().and_then(parse_timestamp),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteStore;

    fn operator() -> Operator {
        Operator::new("op-1")
            .with_name("Dana")
            .with_origin("10.0.0.8")
            .with_unit("North")
    }

    #[test]
    fn test_record_and_list() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .with_connection(|c| {
                record_erase(c, "C00123", Some("DOC-9"), Some("request"), &operator())?;
                record_restore(c, "C00123", Some("appeal"), &operator())?;
                record_erase(c, "OTHER", None, None, &Operator::new("op-2"))
            })
            .unwrap();

        let trail = store
            .with_connection(|c| list_by_subject(c, "C00123"))
            .unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].action, AuditAction::Erase);
        assert!(trail[0].erased);
        assert_eq!(trail[0].doc_ref.as_deref(), Some("DOC-9"));
        assert_eq!(trail[0].operator_origin.as_deref(), Some("10.0.0.8"));
        assert!(trail[0].created_at.is_some());
        assert!(trail[0].target_table.is_none());
        assert_eq!(trail[1].action, AuditAction::Restore);
        assert!(!trail[1].erased);
        assert!(trail[1].doc_ref.is_none());
    }

    #[test]
    fn test_audit_rows_are_immutable() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .with_connection(|c| record_erase(c, "S", None, None, &operator()))
            .unwrap();

        let update = store.with_connection(|c| {
            c.execute("UPDATE erasure_audit SET reason = 'edited'", [])
                .map_err(db_err)
        });
        assert!(update.is_err());
        let delete = store.with_connection(|c| {
            c.execute("DELETE FROM erasure_audit", []).map_err(db_err)
        });
        assert!(delete.is_err());

        let trail = store.with_connection(|c| list_by_subject(c, "S")).unwrap();
        assert_eq!(trail.len(), 1);
        assert!(trail[0].reason.is_none());
    }
}
