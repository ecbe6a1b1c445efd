//! Mirror Store: encrypted per-row snapshots of masked rows.

use rusqlite::{params, params_from_iter, Connection};
use tracing::debug;

use shroud_core::Result;

use crate::sqlite::db_err;
use crate::types::MirrorRecord;

/// Insert or replace the snapshot for `(schema, table, id)`.
///
/// Re-erasing the same row overwrites the previous snapshot instead of
/// adding a second one.
pub fn upsert(conn: &Connection, record: &MirrorRecord) -> Result<()> {
    conn.prepare_cached(
        "INSERT INTO erasure_mirror
            (target_schema, target_table, target_id, subject_key,
             encrypted_payload, nonce, integrity_digest)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (target_schema, target_table, target_id) DO UPDATE SET
            subject_key = excluded.subject_key,
            encrypted_payload = excluded.encrypted_payload,
            nonce = excluded.nonce,
            integrity_digest = excluded.integrity_digest,
            updated_at = CURRENT_TIMESTAMP",
    )
    .map_err(db_err)?
    .execute(params![
        record.schema,
        record.table,
        record.id,
        record.subject_key,
        record.encrypted_payload,
        record.nonce,
        record.integrity_digest,
    ])
    .map_err(db_err)?;
    Ok(())
}

/// Snapshots for a subject within `schema`, restricted to `tables`.
///
/// Table names compare case-insensitively. Ordered by table, then id.
pub fn find_by_subject(
    conn: &Connection,
    subject_key: &str,
    schema: &str,
    tables: &[&str],
) -> Result<Vec<MirrorRecord>> {
    if tables.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT target_schema, target_table, target_id, subject_key,
                encrypted_payload, nonce, integrity_digest
         FROM erasure_mirror
         WHERE subject_key = ? AND target_schema = ? COLLATE NOCASE
           AND target_table COLLATE NOCASE IN ({})
         ORDER BY target_table, target_id",
        vec!["?"; tables.len()].join(", ")
    );
    let params = [subject_key, schema]
        .into_iter()
        .chain(tables.iter().copied());
    let mut stmt = conn.prepare_cached(&sql).map_err(db_err)?;
    let records = stmt
        .query_map(params_from_iter(params), |row| {
            Ok(MirrorRecord {
                schema: row.get(0)?,
                table: row.get(1)?,
                id: row.get(2)?,
                subject_key: row.get(3)?,
                encrypted_payload: row.get(4)?,
                nonce: row.get(5)?,
                integrity_digest: row.get(6)?,
            })
        })
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(db_err)?;
    debug!(
        "Found {} mirror rows for subject {} in schema {}",
        records.len(),
        subject_key,
        schema
    );
    Ok(records)
}

/// Number of snapshots held for a subject across all tables.
pub fn count_by_subject(conn: &Connection, subject_key: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM erasure_mirror WHERE subject_key = ?1",
        params![subject_key],
        |row| row.get(0),
    )
    .map_err(db_err)
}

/// Drop every snapshot of a subject.
pub fn delete_by_subject(conn: &Connection, subject_key: &str) -> Result<usize> {
    conn.execute(
        "DELETE FROM erasure_mirror WHERE subject_key = ?1",
        params![subject_key],
    )
    .map_err(db_err)
}

/// Drop a subject's snapshots for the given tables of one schema only.
pub fn delete_by_subject_in(
    conn: &Connection,
    subject_key: &str,
    schema: &str,
    tables: &[&str],
) -> Result<usize> {
    if tables.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "DELETE FROM erasure_mirror
         WHERE subject_key = ? AND target_schema = ? COLLATE NOCASE
           AND target_table COLLATE NOCASE IN ({})",
        vec!["?"; tables.len()].join(", ")
    );
    let params = [subject_key, schema]
        .into_iter()
        .chain(tables.iter().copied());
    conn.execute(&sql, params_from_iter(params)).map_err(db_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteStore;

    fn record(table: &str, id: &str, subject: &str, payload: &str) -> MirrorRecord {
        MirrorRecord {
            schema: "main".into(),
            table: table.into(),
            id: id.into(),
            subject_key: subject.into(),
            encrypted_payload: payload.into(),
            nonce: "bm9uY2U=".into(),
            integrity_digest: "00".into(),
        }
    }

    #[test]
    fn test_upsert_is_idempotent_per_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .with_connection(|c| {
                upsert(c, &record("T1", "r1", "S1", "first"))?;
                upsert(c, &record("T1", "r1", "S1", "second"))?;
                upsert(c, &record("T1", "r2", "S1", "other"))
            })
            .unwrap();

        let found = store
            .with_connection(|c| find_by_subject(c, "S1", "main", &["T1"]))
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, "r1");
        assert_eq!(found[0].encrypted_payload, "second");
        assert_eq!(store.with_connection(|c| count_by_subject(c, "S1")).unwrap(), 2);
    }

    #[test]
    fn test_find_restricts_tables_and_schema() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .with_connection(|c| {
                upsert(c, &record("T1", "r1", "S1", "a"))?;
                upsert(c, &record("T2", "r1", "S1", "b"))?;
                upsert(c, &record("T1", "r9", "S2", "c"))
            })
            .unwrap();

        let only_t2 = store
            .with_connection(|c| find_by_subject(c, "S1", "MAIN", &["t2"]))
            .unwrap();
        assert_eq!(only_t2.len(), 1);
        assert_eq!(only_t2[0].table, "T2");

        let other_schema = store
            .with_connection(|c| find_by_subject(c, "S1", "legacy", &["T1", "T2"]))
            .unwrap();
        assert!(other_schema.is_empty());

        let none = store
            .with_connection(|c| find_by_subject(c, "S1", "main", &[]))
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_delete_by_subject() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .with_connection(|c| {
                upsert(c, &record("T1", "r1", "S1", "a"))?;
                upsert(c, &record("T2", "r2", "S1", "b"))?;
                upsert(c, &record("T1", "r3", "S2", "c"))
            })
            .unwrap();

        let removed = store
            .with_connection(|c| delete_by_subject_in(c, "S1", "main", &["T1"]))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.with_connection(|c| count_by_subject(c, "S1")).unwrap(), 1);

        let removed = store
            .with_connection(|c| delete_by_subject(c, "S1"))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.with_connection(|c| count_by_subject(c, "S1")).unwrap(), 0);
        assert_eq!(store.with_connection(|c| count_by_subject(c, "S2")).unwrap(), 1);
    }
}
