//! Shroud Store — SQLite-backed row access, mirror store and audit store.
//!
//! The row, mirror and audit operations are free functions over a
//! `rusqlite::Connection` so one `Transaction` (which derefs to a
//! connection) can carry a whole erase or restore command.

pub mod audit;
pub mod mirror;
pub mod rows;
pub mod schema;
pub mod sqlite;
pub mod types;

pub use rows::{OverrideContext, WritebackOutcome};
pub use sqlite::SqliteStore;
pub use types::*;
