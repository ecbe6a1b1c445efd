//! The plaintext payload sealed into each mirror row.

use serde::{Deserialize, Serialize};

use shroud_core::{Error, FieldMap, Result, RowSnapshot};
use shroud_store::MirrorRecord;

/// `{schema, table, idColumn, id, fields}` of one masked row.
///
/// Serialization is canonical: fixed key order, fields in whitelist order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MirrorEnvelope {
    pub schema: String,
    pub table: String,
    pub id_column: String,
    pub id: String,
    pub fields: FieldMap,
}

impl MirrorEnvelope {
    pub fn new(schema: &str, table: &str, id_column: &str, row: RowSnapshot) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
            id_column: id_column.to_string(),
            id: row.id,
            fields: row.fields,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an authenticated payload and check it belongs to `record`.
    ///
    /// A payload that decrypts but names a different row was moved between
    /// mirror rows and is treated as an integrity failure.
    pub fn open(plaintext: &str, record: &MirrorRecord) -> Result<Self> {
        // serde_json messages can quote payload text, so only the position is kept.
        let envelope: Self = serde_json::from_str(plaintext).map_err(|e| {
            Error::IntegrityFailure(format!(
                "mirror payload for {}.{} id {} is not a valid envelope (line {}, column {})",
                record.schema,
                record.table,
                record.id,
                e.line(),
                e.column()
            ))
        })?;
        let matches = envelope.schema.eq_ignore_ascii_case(&record.schema)
            && envelope.table.eq_ignore_ascii_case(&record.table)
            && envelope.id == record.id;
        if !matches {
            return Err(Error::IntegrityFailure(format!(
                "mirror payload identity does not match row {}.{} id {}",
                record.schema, record.table, record.id
            )));
        }
        Ok(envelope)
    }

    pub fn into_snapshot(self) -> RowSnapshot {
        RowSnapshot {
            id: self.id,
            fields: self.fields,
        }
    }
}
