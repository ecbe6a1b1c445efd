//! Row Access Layer: rule-driven reads and updates against governed tables.
//!
//! Table and column names are taken only from validated [`EraseRule`]s; every
//! value travels as a bound parameter.

use std::collections::HashSet;

use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection};
use tracing::{debug, warn};

use shroud_core::{
    column_key, to_storage_type, Error, FieldMap, Operator, Result, RowSnapshot, RowValue,
    StorageValue,
};
use shroud_rules::{quote_ident, EraseRule, OverrideParam, OverrideValue};

use crate::sqlite::db_err;

/// Values bound for `:param` overrides.
#[derive(Debug, Clone, Copy)]
pub struct OverrideContext<'a> {
    operator: &'a Operator,
    reason: Option<&'a str>,
}

impl<'a> OverrideContext<'a> {
    pub fn new(operator: &'a Operator, reason: Option<&'a str>) -> Self {
        Self { operator, reason }
    }

    fn bind(&self, param: OverrideParam) -> Value {
        let text = match param {
            OverrideParam::OperatorId => Some(self.operator.id.as_str()),
            OverrideParam::OperatorName => self.operator.name.as_deref(),
            OverrideParam::Origin => self.operator.origin.as_deref(),
            OverrideParam::Reason => self.reason,
        };
        text.map_or(Value::Null, |s| Value::Text(s.to_string()))
    }
}

/// Result of writing mirrored values back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WritebackOutcome {
    pub restored: usize,
    /// Ids whose update matched no masked row.
    pub conflicts: Vec<String>,
}

// ----------------------------------------------------------------
// Reads
// ----------------------------------------------------------------

/// Translate parent ids into the keys a child rule filters on.
///
/// Without a lookup the parent ids are the keys. With one, the keys are
/// `SELECT DISTINCT dest FROM lookup WHERE source IN (parent ids)`.
pub fn resolve_parent_keys(
    conn: &Connection,
    rule: &EraseRule,
    parent_ids: &[String],
    batch_size: usize,
) -> Result<Vec<String>> {
    let parent_ids = dedup(parent_ids);
    let (Some(lookup), Some(lookup_table)) = (rule.lookup(), rule.qualified_lookup_table()) else {
        return Ok(parent_ids);
    };

    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for chunk in parent_ids.chunks(batch_size.max(1)) {
        let sql = format!(
            "SELECT DISTINCT {dest} FROM {table} WHERE {src} IN ({marks}) AND {dest} IS NOT NULL",
            dest = quote_ident(&lookup.dest_column),
            table = lookup_table,
            src = quote_ident(&lookup.source_column),
            marks = placeholders(chunk.len()),
        );
        let mut stmt = conn.prepare_cached(&sql).map_err(db_err)?;
        let mut rows = stmt.query(params_from_iter(chunk.iter())).map_err(db_err)?;
        while let Some(row) = rows.next().map_err(db_err)? {
            let value = read_value(&lookup.dest_column, row.get_ref(0).map_err(db_err)?)?;
            if let Some(key) = value.as_id() {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
        }
    }
    debug!(
        "Resolved {} parent ids to {} keys via {}",
        parent_ids.len(),
        keys.len(),
        lookup.table
    );
    Ok(keys)
}

/// Unmasked rows whose primary key is in `ids`. Missing ids are omitted.
pub fn load_by_ids(
    conn: &Connection,
    rule: &EraseRule,
    ids: &[String],
    batch_size: usize,
) -> Result<Vec<RowSnapshot>> {
    load_where(conn, rule, rule.id_column(), &dedup(ids), batch_size)
}

/// Unmasked child rows reachable from `parent_ids`, after key remapping.
pub fn load_by_parent_ids(
    conn: &Connection,
    rule: &EraseRule,
    parent_ids: &[String],
    batch_size: usize,
) -> Result<Vec<RowSnapshot>> {
    let fk = parent_fk(rule)?;
    let keys = resolve_parent_keys(conn, rule, parent_ids, batch_size)?;
    load_where(conn, rule, fk, &keys, batch_size)
}

fn load_where(
    conn: &Connection,
    rule: &EraseRule,
    filter_column: &str,
    keys: &[String],
    batch_size: usize,
) -> Result<Vec<RowSnapshot>> {
    let mut columns = vec![quote_ident(rule.id_column())];
    columns.extend(rule.whitelist().iter().map(|c| quote_ident(c)));

    let mut out = Vec::new();
    for chunk in keys.chunks(batch_size.max(1)) {
        let sql = format!(
            "SELECT {cols} FROM {table} WHERE {filter} IN ({marks}) AND {unmasked} ORDER BY {id}",
            cols = columns.join(", "),
            table = rule.qualified_table(),
            filter = quote_ident(filter_column),
            marks = placeholders(chunk.len()),
            unmasked = unmasked_guard(rule),
            id = quote_ident(rule.id_column()),
        );
        let mut stmt = conn.prepare_cached(&sql).map_err(db_err)?;
        let mut rows = stmt.query(params_from_iter(chunk.iter())).map_err(db_err)?;
        while let Some(row) = rows.next().map_err(db_err)? {
            let id = read_value(rule.id_column(), row.get_ref(0).map_err(db_err)?)?
                .as_id()
                .ok_or_else(|| {
                    Error::Database(format!("{} row with NULL primary key", rule.label()))
                })?;
            let mut fields = FieldMap::with_capacity(rule.whitelist().len());
            for (i, column) in rule.whitelist().iter().enumerate() {
                let value = read_value(column, row.get_ref(i + 1).map_err(db_err)?)
                    .map_err(|e| match e {
                        Error::UnsupportedValue(msg) => Error::UnsupportedValue(format!(
                            "{} (table {}, id {})",
                            msg,
                            rule.label(),
                            id
                        )),
                        other => other,
                    })?;
                fields.insert(column.clone(), value);
            }
            out.push(RowSnapshot { id, fields });
        }
    }
    debug!("Loaded {} rows from {}", out.len(), rule.label());
    Ok(out)
}

// ----------------------------------------------------------------
// Masking
// ----------------------------------------------------------------

/// Mask unmasked rows by primary key. Returns the affected-row count.
pub fn mask_by_ids(
    conn: &Connection,
    rule: &EraseRule,
    ids: &[String],
    ctx: &OverrideContext<'_>,
    batch_size: usize,
) -> Result<usize> {
    mask_where(conn, rule, rule.id_column(), &dedup(ids), ctx, batch_size)
}

/// Mask unmasked child rows reachable from `parent_ids`.
pub fn mask_by_parent(
    conn: &Connection,
    rule: &EraseRule,
    parent_ids: &[String],
    ctx: &OverrideContext<'_>,
    batch_size: usize,
) -> Result<usize> {
    let fk = parent_fk(rule)?;
    let keys = resolve_parent_keys(conn, rule, parent_ids, batch_size)?;
    mask_where(conn, rule, fk, &keys, ctx, batch_size)
}

fn mask_where(
    conn: &Connection,
    rule: &EraseRule,
    filter_column: &str,
    keys: &[String],
    ctx: &OverrideContext<'_>,
    batch_size: usize,
) -> Result<usize> {
    let mut set = SetClause::default();
    for column in rule.whitelist() {
        let key = column_key(column);
        match rule
            .erase_overrides()
            .iter()
            .find(|(c, _)| column_key(c) == key)
        {
            Some((_, value)) => set.push_override(column, value, ctx),
            None => set.push_null(column),
        }
    }
    for (column, value) in rule.erase_overrides() {
        if !rule.whitelists(column) {
            set.push_override(column, value, ctx);
        }
    }
    set.push_value(rule.mask_flag_column(), Value::Integer(1));

    let mut affected = 0;
    for chunk in keys.chunks(batch_size.max(1)) {
        let sql = format!(
            "UPDATE {table} SET {set} WHERE {filter} IN ({marks}) AND {unmasked}",
            table = rule.qualified_table(),
            set = set.sql(),
            filter = quote_ident(filter_column),
            marks = placeholders(chunk.len()),
            unmasked = unmasked_guard(rule),
        );
        let params = set
            .params
            .iter()
            .cloned()
            .chain(chunk.iter().map(|k| Value::Text(k.clone())));
        affected += conn
            .prepare_cached(&sql)
            .map_err(db_err)?
            .execute(params_from_iter(params))
            .map_err(db_err)?;
    }
    debug!("Masked {} rows in {}", affected, rule.label());
    Ok(affected)
}

// ----------------------------------------------------------------
// Writeback
// ----------------------------------------------------------------

/// Write mirrored values back onto rows that are still masked.
///
/// Each update is guarded by `flag = 1`; a row unmasked in the meantime is
/// left alone and reported in [`WritebackOutcome::conflicts`].
pub fn writeback(
    conn: &Connection,
    rule: &EraseRule,
    rows: &[RowSnapshot],
    ctx: &OverrideContext<'_>,
) -> Result<WritebackOutcome> {
    let mut outcome = WritebackOutcome::default();
    for row in rows {
        let mut set = SetClause::default();
        for column in rule.whitelist() {
            if rule.restore_overridden(column) {
                continue;
            }
            if let Some(raw) = row.fields.get_ci(column) {
                let typed = to_storage_type(column, raw, rule.date_columns(), rule.int_columns());
                set.push_value(column, storage_to_sql(typed));
            }
        }
        for (column, value) in rule.restore_overrides() {
            set.push_override(column, value, ctx);
        }
        set.push_value(rule.mask_flag_column(), Value::Integer(0));

        let sql = format!(
            "UPDATE {table} SET {set} WHERE {id} = ? AND {flag} = 1",
            table = rule.qualified_table(),
            set = set.sql(),
            id = quote_ident(rule.id_column()),
            flag = quote_ident(rule.mask_flag_column()),
        );
        let params = set
            .params
            .into_iter()
            .chain(std::iter::once(Value::Text(row.id.clone())));
        let changed = conn
            .prepare_cached(&sql)
            .map_err(db_err)?
            .execute(params_from_iter(params))
            .map_err(db_err)?;
        if changed == 0 {
            warn!(
                "Writeback to {} id {} matched no masked row",
                rule.label(),
                row.id
            );
            outcome.conflicts.push(row.id.clone());
        } else {
            outcome.restored += changed;
        }
    }
    Ok(outcome)
}

// ----------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------

#[derive(Default)]
struct SetClause {
    assignments: Vec<String>,
    params: Vec<Value>,
}

impl SetClause {
    fn push_null(&mut self, column: &str) {
        self.assignments.push(format!("{} = NULL", quote_ident(column)));
    }

    fn push_value(&mut self, column: &str, value: Value) {
        self.assignments.push(format!("{} = ?", quote_ident(column)));
        self.params.push(value);
    }

    fn push_override(&mut self, column: &str, value: &OverrideValue, ctx: &OverrideContext<'_>) {
        match value {
            OverrideValue::Null => self.push_null(column),
            OverrideValue::Now => self
                .assignments
                .push(format!("{} = CURRENT_TIMESTAMP", quote_ident(column))),
            OverrideValue::Literal(v) => self.push_value(column, row_value_to_sql(v)),
            OverrideValue::Param(p) => self.push_value(column, ctx.bind(*p)),
        }
    }

    fn sql(&self) -> String {
        self.assignments.join(", ")
    }
}

fn parent_fk(rule: &EraseRule) -> Result<&str> {
    rule.parent()
        .map(|p| p.fk_column.as_str())
        .ok_or_else(|| Error::Config(format!("rule {} has no parent linkage", rule.label())))
}

fn unmasked_guard(rule: &EraseRule) -> String {
    let flag = quote_ident(rule.mask_flag_column());
    format!("({flag} IS NULL OR {flag} <> 1)")
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn dedup(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

/// Convert a column value read from SQLite. BLOBs cannot be mirrored as JSON.
pub(crate) fn read_value(column: &str, value: ValueRef<'_>) -> Result<RowValue> {
    match value {
        ValueRef::Null => Ok(RowValue::Null),
        ValueRef::Integer(i) => Ok(RowValue::Integer(i)),
        ValueRef::Real(r) => Ok(RowValue::Real(r)),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|s| RowValue::Text(s.to_string()))
            .map_err(|_| Error::UnsupportedValue(format!("column {} holds non-UTF-8 text", column))),
        ValueRef::Blob(_) => Err(Error::UnsupportedValue(format!(
            "column {} holds a BLOB",
            column
        ))),
    }
}

fn row_value_to_sql(value: &RowValue) -> Value {
    match value {
        RowValue::Null => Value::Null,
        RowValue::Bool(b) => Value::Integer(i64::from(*b)),
        RowValue::Integer(i) => Value::Integer(*i),
        RowValue::Real(r) => Value::Real(*r),
        RowValue::Text(s) => Value::Text(s.clone()),
    }
}

fn storage_to_sql(value: StorageValue) -> Value {
    match value {
        StorageValue::Null => Value::Null,
        StorageValue::Integer(i) => Value::Integer(i),
        StorageValue::Real(r) => Value::Real(r),
        StorageValue::Text(s) => Value::Text(s),
        StorageValue::Date(d) => Value::Text(StorageValue::date_text(&d)),
        StorageValue::Timestamp(ts) => Value::Text(StorageValue::timestamp_text(&ts)),
    }
}
