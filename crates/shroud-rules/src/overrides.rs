//! Override values applied when masking or restoring a row.

use serde_json::Value;

use shroud_core::{Error, Result, RowValue};

/// Placeholder for the current database timestamp.
pub const NOW_PLACEHOLDER: &str = "${NOW}";

/// Operator-supplied values an override may bind by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverrideParam {
    /// `:operator`: operator id.
    OperatorId,
    /// `:operatorName`: operator display name.
    OperatorName,
    /// `:origin`: operator network origin.
    Origin,
    /// `:reason`: free-text reason of the command.
    Reason,
}

impl OverrideParam {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            ":operator" | ":operatorId" => Some(Self::OperatorId),
            ":operatorName" => Some(Self::OperatorName),
            ":origin" => Some(Self::Origin),
            ":reason" => Some(Self::Reason),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::OperatorId => ":operator",
            Self::OperatorName => ":operatorName",
            Self::Origin => ":origin",
            Self::Reason => ":reason",
        }
    }
}

/// What a column is set to instead of the default.
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideValue {
    Null,
    Literal(RowValue),
    /// `CURRENT_TIMESTAMP` evaluated by the database.
    Now,
    Param(OverrideParam),
}

impl OverrideValue {
    /// Parse a declarative override: `null`, `"${NOW}"`, `":param"`, or a scalar literal.
    pub fn parse(column: &str, raw: &Value) -> Result<Self> {
        match raw {
            Value::Null => Ok(Self::Null),
            Value::String(s) if s == NOW_PLACEHOLDER => Ok(Self::Now),
            Value::String(s) if s.starts_with(':') => OverrideParam::from_name(s)
                .map(Self::Param)
                .ok_or_else(|| {
                    Error::Config(format!(
                        "override for column {} names unknown parameter {}",
                        column, s
                    ))
                }),
            Value::Bool(_) | Value::Number(_) | Value::String(_) => {
                let literal: RowValue = serde_json::from_value(raw.clone())?;
                Ok(Self::Literal(literal))
            }
            Value::Array(_) | Value::Object(_) => Err(Error::Config(format!(
                "override for column {} must be a scalar",
                column
            ))),
        }
    }

    pub fn literal(value: impl Into<RowValue>) -> Self {
        Self::Literal(value.into())
    }
}
