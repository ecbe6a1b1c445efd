//! Generic row values read from and written back to governed tables.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single column value in its generic (JSON-mirrorable) form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl RowValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RowValue::Null)
    }

    /// Render as a row identifier. Ids are carried as strings end to end.
    pub fn as_id(&self) -> Option<String> {
        match self {
            RowValue::Null => None,
            RowValue::Bool(b) => Some(if *b { "1".into() } else { "0".into() }),
            RowValue::Integer(i) => Some(i.to_string()),
            RowValue::Real(r) => Some(r.to_string()),
            RowValue::Text(s) => Some(s.clone()),
        }
    }

    /// Short type label, safe to log.
    pub fn kind(&self) -> &'static str {
        match self {
            RowValue::Null => "null",
            RowValue::Bool(_) => "bool",
            RowValue::Integer(_) => "integer",
            RowValue::Real(_) => "real",
            RowValue::Text(_) => "text",
        }
    }
}

impl From<&str> for RowValue {
    fn from(value: &str) -> Self {
        RowValue::Text(value.to_string())
    }
}

impl From<String> for RowValue {
    fn from(value: String) -> Self {
        RowValue::Text(value)
    }
}

impl From<i64> for RowValue {
    fn from(value: i64) -> Self {
        RowValue::Integer(value)
    }
}

impl From<bool> for RowValue {
    fn from(value: bool) -> Self {
        RowValue::Bool(value)
    }
}

/// Normalize a column name for loose matching: strip non-alphanumerics, uppercase.
///
/// `birth_date`, `BirthDate` and `BIRTH-DATE` all map to `BIRTHDATE`.
pub fn column_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_uppercase())
        .collect()
}

/// Ordered column → value mapping.
///
/// Serializes as a JSON object in insertion order, which for loaded rows is
/// the rule's whitelist order. Deserialization keeps the payload's order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    entries: Vec<(String, RowValue)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Insert or replace a value under an exact column name.
    pub fn insert(&mut self, column: impl Into<String>, value: RowValue) {
        let column = column.into();
        match self.entries.iter_mut().find(|(c, _)| *c == column) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((column, value)),
        }
    }

    /// Exact-name lookup.
    pub fn get(&self, column: &str) -> Option<&RowValue> {
        self.entries
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    /// Lookup ignoring case and punctuation (see [`column_key`]).
    pub fn get_ci(&self, column: &str) -> Option<&RowValue> {
        if let Some(v) = self.get(column) {
            return Some(v);
        }
        let wanted = column_key(column);
        self.entries
            .iter()
            .find(|(c, _)| column_key(c) == wanted)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RowValue)> {
        self.entries.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(c, _)| c.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, RowValue)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (String, RowValue)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (c, v) in iter {
            map.insert(c, v);
        }
        map
    }
}

impl Serialize for FieldMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (column, value) in &self.entries {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FieldMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldMapVisitor;

        impl<'de> Visitor<'de> for FieldMapVisitor {
            type Value = FieldMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of column names to scalar values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<FieldMap, A::Error> {
                let mut map = FieldMap::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((column, value)) = access.next_entry::<String, RowValue>()? {
                    map.insert(column, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(FieldMapVisitor)
    }
}

/// One governed row: its primary key plus its whitelisted fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowSnapshot {
    pub id: String,
    pub fields: FieldMap,
}
