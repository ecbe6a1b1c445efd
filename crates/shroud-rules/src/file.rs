//! Declarative rule file format (`erase-rules.json`).

use serde::{Deserialize, Serialize};

use shroud_core::Result;

use crate::overrides::OverrideValue;
use crate::rule::{EraseRule, DEFAULT_ID_COLUMN, DEFAULT_SCHEMA};

/// Top-level rule file. Rule order is evaluation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleFile {
    pub rules: Vec<RuleSpec>,
}

/// One rule as written by an operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuleSpec {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub table: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    pub mask_flag_column: String,
    #[serde(default)]
    pub parent_table: Option<String>,
    #[serde(default)]
    pub parent_fk_column: Option<String>,
    #[serde(default)]
    pub lookup_table: Option<String>,
    #[serde(default)]
    pub lookup_source_column: Option<String>,
    #[serde(default)]
    pub lookup_dest_column: Option<String>,
    pub whitelist: Vec<String>,
    #[serde(default)]
    pub date_columns: Vec<String>,
    #[serde(default)]
    pub int_columns: Vec<String>,
    /// Declaration order is kept and becomes SET-clause order.
    #[serde(default)]
    pub erase_overrides: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub restore_overrides: serde_json::Map<String, serde_json::Value>,
}

fn default_schema() -> String {
    DEFAULT_SCHEMA.into()
}

fn default_id_column() -> String {
    DEFAULT_ID_COLUMN.into()
}

impl RuleSpec {
    pub fn build(&self) -> Result<EraseRule> {
        let mut builder = EraseRule::builder(self.table.clone())
            .schema(self.schema.clone())
            .id_column(self.id_column.clone())
            .mask_flag(self.mask_flag_column.clone())
            .parent_table(self.parent_table.clone())
            .parent_fk_column(self.parent_fk_column.clone())
            .lookup_parts(
                self.lookup_table.clone(),
                self.lookup_source_column.clone(),
                self.lookup_dest_column.clone(),
            )
            .whitelist(self.whitelist.iter().cloned())
            .date_columns(self.date_columns.iter().cloned())
            .int_columns(self.int_columns.iter().cloned());

        for (column, raw) in &self.erase_overrides {
            builder = builder.erase_override(column.clone(), OverrideValue::parse(column, raw)?);
        }
        for (column, raw) in &self.restore_overrides {
            builder =
                builder.restore_override(column.clone(), OverrideValue::parse(column, raw)?);
        }
        builder.build()
    }
}

impl RuleFile {
    pub fn build_rules(&self) -> Result<Vec<EraseRule>> {
        self.rules.iter().map(RuleSpec::build).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overrides::OverrideParam;
    use crate::RuleRegistry;
    use shroud_core::{Error, RowValue};

    const SAMPLE: &str = r#"{
      "rules": [
        {
          "table": "FAMILY_MEMBER",
          "maskFlagColumn": "IS_ERASED",
          "parentTable": "CASE_FILE",
          "parentFkColumn": "FAMILY_CARD_NO",
          "lookupTable": "CASE_FILE",
          "lookupSourceColumn": "CARD_NO",
          "lookupDestColumn": "FAMILY_CARD_NO",
          "whitelist": ["FULL_NAME", "BIRTH_DATE"],
          "dateColumns": ["BIRTH_DATE"]
        },
        {
          "table": "CASE_FILE",
          "idColumn": "CASE_ID",
          "maskFlagColumn": "IS_ERASED",
          "whitelist": ["FULL_NAME", "PHONE", "MODIFIED_BY"],
          "eraseOverrides": { "FULL_NAME": "***", "ERASED_AT": "${NOW}" },
          "restoreOverrides": { "MODIFIED_BY": ":operator", "ERASED_AT": null }
        }
      ]
    }"#;

    #[test]
    fn test_parse_sample() {
        let reg = RuleRegistry::from_json_str(SAMPLE).unwrap();
        assert_eq!(reg.len(), 2);

        let child = reg.get("FAMILY_MEMBER").unwrap();
        assert!(child.is_child());
        assert_eq!(child.schema(), "main");
        assert_eq!(child.id_column(), "ID");

        let case = reg.get("CASE_FILE").unwrap();
        assert_eq!(case.id_column(), "CASE_ID");
        assert!(case
            .erase_overrides()
            .contains(&("FULL_NAME".to_string(), OverrideValue::Literal(RowValue::from("***")))));
        assert!(case
            .erase_overrides()
            .contains(&("ERASED_AT".to_string(), OverrideValue::Now)));
        assert!(case.restore_overrides().contains(&(
            "MODIFIED_BY".to_string(),
            OverrideValue::Param(OverrideParam::OperatorId)
        )));
        assert!(case.restore_overridden("MODIFIED_BY"));
    }

    #[test]
    fn test_overrides_keep_declaration_order() {
        let text = r#"{"rules":[{
            "table": "T",
            "maskFlagColumn": "F",
            "whitelist": ["ZETA", "ALPHA"],
            "eraseOverrides": { "ZETA": "z", "MID": "${NOW}", "ALPHA": "a" },
            "restoreOverrides": { "UPDATED_BY": ":operator", "NOTE": null }
        }]}"#;
        let reg = RuleRegistry::from_json_str(text).unwrap();
        let rule = reg.get("T").unwrap();
        let erase: Vec<&str> = rule.erase_overrides().iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(erase, ["ZETA", "MID", "ALPHA"]);
        let restore: Vec<&str> = rule
            .restore_overrides()
            .iter()
            .map(|(c, _)| c.as_str())
            .collect();
        assert_eq!(restore, ["UPDATED_BY", "NOTE"]);
    }

    #[test]
    fn test_unknown_field_is_config_error() {
        let text = r#"{"rules":[{"table":"T","maskFlagColumn":"F","whitelist":["A"],"colour":1}]}"#;
        assert!(matches!(RuleRegistry::from_json_str(text), Err(Error::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("erase-rules.json");
        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(RuleRegistry::from_json_file(&path).unwrap().len(), 2);

        let missing = RuleRegistry::from_json_file(dir.path().join("nope.json"));
        assert!(matches!(missing, Err(Error::Config(_))));
    }
}
