//! SQLite store handle: connection, schema bootstrap, transactions.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::schema::{AUDIT_SCHEMA_SQL, AUDIT_TRIGGERS_SQL, MIRROR_SCHEMA_SQL};
use shroud_core::{Error, Result};
use shroud_rules::quote_ident;

/// Database file name inside the data directory.
pub const DB_FILE_NAME: &str = "shroud.db";

pub(crate) fn db_err(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

/// SQLite store holding the governed tables, the mirror and the audit trail.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open or create the store.
    ///
    /// `db_dir` is the directory (e.g., `data/db/`). The file will be `db_dir/shroud.db`.
    pub fn open(db_dir: impl AsRef<Path>) -> Result<Self> {
        let db_dir = db_dir.as_ref();
        std::fs::create_dir_all(db_dir)?;
        let db_path = db_dir.join(DB_FILE_NAME);

        let conn = Connection::open(&db_path).map_err(db_err)?;
        Self::configure(&conn, true)?;
        Self::init_schema(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        let mirrored = store.with_connection(|c| {
            c.query_row("SELECT COUNT(*) FROM erasure_mirror", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(db_err)
        })?;
        info!(
            "SqliteStore initialized: {} mirrored rows, path={}",
            mirrored,
            db_dir.join(DB_FILE_NAME).display()
        );
        Ok(store)
    }

    /// In-memory store, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::configure(&conn, false)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    fn configure(conn: &Connection, wal: bool) -> Result<()> {
        if wal {
            conn.execute_batch("PRAGMA journal_mode = WAL;")
                .map_err(db_err)?;
        }
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(db_err)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        let full_schema = format!(
            "{}\n{}\n{}",
            MIRROR_SCHEMA_SQL, AUDIT_SCHEMA_SQL, AUDIT_TRIGGERS_SQL
        );
        conn.execute_batch(&full_schema)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Attach another database file so rules can address `name.table`.
    pub fn attach_schema(&self, name: &str, path: impl AsRef<Path>) -> Result<()> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::Config(format!("invalid schema name: {:?}", name)));
        }
        let path = path.as_ref().to_string_lossy().to_string();
        let conn = self.conn.lock();
        conn.execute(
            &format!("ATTACH DATABASE ?1 AS {}", quote_ident(name)),
            params![path],
        )
        .map_err(db_err)?;
        debug!("Attached schema {} from {}", name, path);
        Ok(())
    }

    /// Run `f` against the connection outside any explicit transaction.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside one immediate transaction: commit on `Ok`, roll back on `Err`.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;
        match f(&tx) {
            Ok(value) => {
                tx.commit().map_err(db_err)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback() {
                    warn!("Rollback failed: {}", rb);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn count(store: &SqliteStore, sql: &str) -> i64 {
        store
            .with_connection(|c| c.query_row(sql, [], |r| r.get(0)).map_err(db_err))
            .unwrap()
    }

    #[test]
    fn test_open_creates_schema() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path()).unwrap();
        assert!(store.db_path().unwrap().ends_with(DB_FILE_NAME));
        assert_eq!(count(&store, "SELECT COUNT(*) FROM erasure_mirror"), 0);
        assert_eq!(count(&store, "SELECT COUNT(*) FROM erasure_audit"), 0);

        // Reopen is idempotent.
        drop(store);
        SqliteStore::open(dir.path()).unwrap();
    }

    #[test]
    fn test_transaction_commits_and_rolls_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .with_connection(|c| {
                c.execute_batch("CREATE TABLE t (v INTEGER);").map_err(db_err)
            })
            .unwrap();

        store
            .with_transaction(|tx| {
                tx.execute("INSERT INTO t VALUES (1)", []).map_err(db_err)?;
                Ok(())
            })
            .unwrap();

        let failed: Result<()> = store.with_transaction(|tx| {
            tx.execute("INSERT INTO t VALUES (2)", []).map_err(db_err)?;
            Err(Error::Internal("boom".into()))
        });
        assert!(failed.is_err());
        assert_eq!(count(&store, "SELECT COUNT(*) FROM t"), 1);
    }

    #[test]
    fn test_attach_schema() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        store.attach_schema("legacy", dir.path().join("legacy.db")).unwrap();
        store
            .with_connection(|c| {
                c.execute_batch("CREATE TABLE \"legacy\".\"T\" (ID TEXT);")
                    .map_err(db_err)
            })
            .unwrap();
        assert_eq!(count(&store, "SELECT COUNT(*) FROM \"legacy\".\"T\""), 0);

        assert!(matches!(
            store.attach_schema("x; DROP", dir.path().join("y.db")),
            Err(Error::Config(_))
        ));
    }
}
