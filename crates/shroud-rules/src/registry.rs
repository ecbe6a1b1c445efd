//! Ordered, immutable collection of erase rules.

use std::path::Path;

use tracing::{info, warn};

use shroud_core::{Error, Result};

use crate::file::RuleFile;
use crate::rule::EraseRule;

/// The rule registry. Built once at startup; safe to share across threads.
#[derive(Debug, Clone)]
pub struct RuleRegistry {
    rules: Vec<EraseRule>,
}

impl RuleRegistry {
    /// Validate ordering and uniqueness, then freeze.
    ///
    /// Ordering invariant: a rule that remaps keys through lookup table `L`
    /// must come before any rule that masks the lookup's source or dest
    /// column in `L`, or the mapping would be gone when it is needed.
    pub fn new(rules: Vec<EraseRule>) -> Result<Self> {
        for (i, rule) in rules.iter().enumerate() {
            if let Some(dup) = rules[..i]
                .iter()
                .find(|r| same_table(r, rule.schema(), rule.table()))
            {
                return Err(Error::Config(format!(
                    "duplicate rule for table {}",
                    dup.label()
                )));
            }
        }

        for (i, rule) in rules.iter().enumerate() {
            let Some(lookup) = rule.lookup() else {
                continue;
            };
            for (j, other) in rules.iter().enumerate() {
                if !same_table(other, rule.schema(), &lookup.table) {
                    continue;
                }
                let masks_mapping = other.whitelists(&lookup.source_column)
                    || other.whitelists(&lookup.dest_column);
                if masks_mapping && j < i {
                    return Err(Error::Config(format!(
                        "rule {} masks lookup columns needed by later rule {}",
                        other.label(),
                        rule.label()
                    )));
                }
            }
        }

        for rule in &rules {
            if let Some(parent) = rule.parent() {
                if !rules
                    .iter()
                    .any(|r| same_table(r, rule.schema(), &parent.table))
                {
                    warn!(
                        "Rule {} has ungoverned parent table {}; ids must be supplied for it directly",
                        rule.label(),
                        parent.table
                    );
                }
            }
        }

        info!("Rule registry initialized: {} rules", rules.len());
        Ok(Self { rules })
    }

    /// Load a declarative rule file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read rule file {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let file: RuleFile = serde_json::from_str(text)
            .map_err(|e| Error::Config(format!("malformed rule file: {}", e)))?;
        Self::new(file.build_rules()?)
    }

    /// Rules in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = &EraseRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rule by table name (case-insensitive), any schema.
    pub fn get(&self, table: &str) -> Option<&EraseRule> {
        self.rules
            .iter()
            .find(|r| r.table().eq_ignore_ascii_case(table))
    }

    /// Rule by schema and table name (case-insensitive).
    pub fn get_in(&self, schema: &str, table: &str) -> Option<&EraseRule> {
        self.rules.iter().find(|r| same_table(r, schema, table))
    }

    /// Distinct schemas in first-seen order.
    pub fn schemas(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for rule in &self.rules {
            if !out.iter().any(|s| s.eq_ignore_ascii_case(rule.schema())) {
                out.push(rule.schema());
            }
        }
        out
    }

    /// Governed table names within a schema, in registry order.
    pub fn tables_in(&self, schema: &str) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| r.schema().eq_ignore_ascii_case(schema))
            .map(|r| r.table())
            .collect()
    }
}

fn same_table(rule: &EraseRule, schema: &str, table: &str) -> bool {
    rule.schema().eq_ignore_ascii_case(schema) && rule.table().eq_ignore_ascii_case(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(table: &str, whitelist: &[&str]) -> EraseRule {
        EraseRule::builder(table)
            .mask_flag("IS_ERASED")
            .whitelist(whitelist.iter().copied())
            .build()
            .unwrap()
    }

    fn mapped_child() -> EraseRule {
        EraseRule::builder("FAMILY_MEMBER")
            .mask_flag("IS_ERASED")
            .whitelist(["FULL_NAME"])
            .parent("CASE_FILE", "FAMILY_CARD_NO")
            .lookup("CASE_FILE", "CARD_NO", "FAMILY_CARD_NO")
            .build()
            .unwrap()
    }

    #[test]
    fn test_lookup_by_table() {
        let reg = RuleRegistry::new(vec![rule("PERSON", &["NAME"]), rule("ADDRESS", &["LINE1"])])
            .unwrap();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.get("person").unwrap().table(), "PERSON");
        assert!(reg.get_in("MAIN", "address").is_some());
        assert!(reg.get_in("other", "ADDRESS").is_none());
        assert!(reg.get("missing").is_none());
        assert_eq!(reg.tables_in("main"), vec!["PERSON", "ADDRESS"]);
        assert_eq!(reg.schemas(), vec!["main"]);
    }

    #[test]
    fn test_rejects_duplicates() {
        let err = RuleRegistry::new(vec![rule("PERSON", &["NAME"]), rule("person", &["X"])])
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_lookup_ordering_enforced() {
        // The case file masks the family card number the child maps through.
        let parent = rule("CASE_FILE", &["FULL_NAME", "FAMILY_CARD_NO"]);

        let err = RuleRegistry::new(vec![parent.clone(), mapped_child()]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let reg = RuleRegistry::new(vec![mapped_child(), parent]).unwrap();
        let order: Vec<_> = reg.iter().map(|r| r.table()).collect();
        assert_eq!(order, vec!["FAMILY_MEMBER", "CASE_FILE"]);
    }

    #[test]
    fn test_lookup_ordering_irrelevant_when_mapping_not_masked() {
        let parent = rule("CASE_FILE", &["FULL_NAME"]);
        assert!(RuleRegistry::new(vec![parent, mapped_child()]).is_ok());
    }
}
