//! Identity of the operator issuing an erase or restore.

use serde::{Deserialize, Serialize};

/// Who performed an action, and from where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operator {
    /// Stable operator id; stamped into audited rows and restore overrides.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Network origin (e.g. client address).
    #[serde(default)]
    pub origin: Option<String>,
    /// Branch or organisational unit.
    #[serde(default)]
    pub unit: Option<String>,
}

impl Operator {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            origin: None,
            unit: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}
