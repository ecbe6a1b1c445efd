//! The per-table erase rule and its builder.

use once_cell::sync::Lazy;
use regex::Regex;

use shroud_core::{column_key, Error, Result};

use crate::overrides::OverrideValue;

/// Schema used when a rule does not name one.
pub const DEFAULT_SCHEMA: &str = "main";
/// Primary-key column used when a rule does not name one.
pub const DEFAULT_ID_COLUMN: &str = "ID";

static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").unwrap());

/// Double-quote a validated identifier for SQL.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident)
}

fn check_ident(what: &str, ident: &str) -> Result<()> {
    if IDENT_RE.is_match(ident) {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid {} identifier: {:?}", what, ident)))
    }
}

/// Child linkage: rows are selected by `fk_column IN (parent ids)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub table: String,
    pub fk_column: String,
}

/// Key remapping: parent ids are translated through `table` before filtering.
///
/// `SELECT dest_column FROM table WHERE source_column IN (parent ids)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLookup {
    pub table: String,
    pub source_column: String,
    pub dest_column: String,
}

/// Immutable erase rule for one governed table.
#[derive(Debug, Clone)]
pub struct EraseRule {
    schema: String,
    table: String,
    id_column: String,
    mask_flag_column: String,
    parent: Option<ParentLink>,
    lookup: Option<KeyLookup>,
    whitelist: Vec<String>,
    date_columns: Vec<String>,
    int_columns: Vec<String>,
    erase_overrides: Vec<(String, OverrideValue)>,
    restore_overrides: Vec<(String, OverrideValue)>,
}

impl EraseRule {
    pub fn builder(table: impl Into<String>) -> EraseRuleBuilder {
        EraseRuleBuilder::new(table)
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn mask_flag_column(&self) -> &str {
        &self.mask_flag_column
    }

    pub fn parent(&self) -> Option<&ParentLink> {
        self.parent.as_ref()
    }

    pub fn lookup(&self) -> Option<&KeyLookup> {
        self.lookup.as_ref()
    }

    /// A child rule resolves its rows through a parent's ids.
    pub fn is_child(&self) -> bool {
        self.parent.is_some()
    }

    pub fn whitelist(&self) -> &[String] {
        &self.whitelist
    }

    pub fn date_columns(&self) -> &[String] {
        &self.date_columns
    }

    pub fn int_columns(&self) -> &[String] {
        &self.int_columns
    }

    pub fn erase_overrides(&self) -> &[(String, OverrideValue)] {
        &self.erase_overrides
    }

    pub fn restore_overrides(&self) -> &[(String, OverrideValue)] {
        &self.restore_overrides
    }

    /// Whether `column` receives its restore value from `restore_overrides`.
    pub fn restore_overridden(&self, column: &str) -> bool {
        let key = column_key(column);
        self.restore_overrides
            .iter()
            .any(|(c, _)| column_key(c) == key)
    }

    /// Whether `column` is whitelisted (loose match).
    pub fn whitelists(&self, column: &str) -> bool {
        let key = column_key(column);
        self.whitelist.iter().any(|c| column_key(c) == key)
    }

    /// `"schema"."table"`.
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    /// `"schema"."lookup_table"` when a lookup is declared.
    pub fn qualified_lookup_table(&self) -> Option<String> {
        self.lookup
            .as_ref()
            .map(|l| format!("{}.{}", quote_ident(&self.schema), quote_ident(&l.table)))
    }

    /// Short label for logs: `schema.table`.
    pub fn label(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

/// Builder for [`EraseRule`]. Validation happens once, in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct EraseRuleBuilder {
    schema: String,
    table: String,
    id_column: String,
    mask_flag_column: Option<String>,
    parent_table: Option<String>,
    parent_fk_column: Option<String>,
    lookup_table: Option<String>,
    lookup_source_column: Option<String>,
    lookup_dest_column: Option<String>,
    whitelist: Vec<String>,
    date_columns: Vec<String>,
    int_columns: Vec<String>,
    erase_overrides: Vec<(String, OverrideValue)>,
    restore_overrides: Vec<(String, OverrideValue)>,
}

impl EraseRuleBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            schema: DEFAULT_SCHEMA.to_string(),
            table: table.into(),
            id_column: DEFAULT_ID_COLUMN.to_string(),
            mask_flag_column: None,
            parent_table: None,
            parent_fk_column: None,
            lookup_table: None,
            lookup_source_column: None,
            lookup_dest_column: None,
            whitelist: Vec::new(),
            date_columns: Vec::new(),
            int_columns: Vec::new(),
            erase_overrides: Vec::new(),
            restore_overrides: Vec::new(),
        }
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    pub fn mask_flag(mut self, column: impl Into<String>) -> Self {
        self.mask_flag_column = Some(column.into());
        self
    }

    pub fn parent(mut self, table: impl Into<String>, fk_column: impl Into<String>) -> Self {
        self.parent_table = Some(table.into());
        self.parent_fk_column = Some(fk_column.into());
        self
    }

    pub fn parent_table(mut self, table: Option<String>) -> Self {
        self.parent_table = table;
        self
    }

    pub fn parent_fk_column(mut self, column: Option<String>) -> Self {
        self.parent_fk_column = column;
        self
    }

    pub fn lookup(
        mut self,
        table: impl Into<String>,
        source_column: impl Into<String>,
        dest_column: impl Into<String>,
    ) -> Self {
        self.lookup_table = Some(table.into());
        self.lookup_source_column = Some(source_column.into());
        self.lookup_dest_column = Some(dest_column.into());
        self
    }

    pub fn lookup_parts(
        mut self,
        table: Option<String>,
        source_column: Option<String>,
        dest_column: Option<String>,
    ) -> Self {
        self.lookup_table = table;
        self.lookup_source_column = source_column;
        self.lookup_dest_column = dest_column;
        self
    }

    pub fn whitelist<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.whitelist.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn date_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.date_columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn int_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.int_columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn erase_override(mut self, column: impl Into<String>, value: OverrideValue) -> Self {
        self.erase_overrides.push((column.into(), value));
        self
    }

    pub fn restore_override(mut self, column: impl Into<String>, value: OverrideValue) -> Self {
        self.restore_overrides.push((column.into(), value));
        self
    }

    /// Validate and freeze the rule.
    pub fn build(self) -> Result<EraseRule> {
        let table = self.table;
        let ctx = |msg: String| Error::Config(format!("rule {}: {}", table, msg));

        check_ident("schema", &self.schema)?;
        check_ident("table", &table)?;
        check_ident("id column", &self.id_column)?;

        let mask_flag_column = self
            .mask_flag_column
            .ok_or_else(|| ctx("mask flag column is required".into()))?;
        check_ident("mask flag column", &mask_flag_column)?;

        let mut whitelist: Vec<String> = Vec::with_capacity(self.whitelist.len());
        for column in self.whitelist {
            check_ident("whitelist column", &column)?;
            if whitelist.iter().any(|c| column_key(c) == column_key(&column)) {
                return Err(ctx(format!("column {} whitelisted twice", column)));
            }
            whitelist.push(column);
        }
        if whitelist.is_empty() {
            return Err(ctx("whitelist is empty".into()));
        }
        let in_whitelist = |c: &str| whitelist.iter().any(|w| column_key(w) == column_key(c));
        if in_whitelist(&self.id_column) {
            return Err(ctx("id column cannot be whitelisted".into()));
        }
        if in_whitelist(&mask_flag_column) {
            return Err(ctx("mask flag column cannot be whitelisted".into()));
        }

        for c in self.date_columns.iter().chain(self.int_columns.iter()) {
            if !in_whitelist(c) {
                return Err(ctx(format!("typed column {} is not whitelisted", c)));
            }
        }

        let parent = match (self.parent_table, self.parent_fk_column) {
            (Some(t), Some(fk)) => {
                check_ident("parent table", &t)?;
                check_ident("parent fk column", &fk)?;
                Some(ParentLink {
                    table: t,
                    fk_column: fk,
                })
            }
            (None, None) => None,
            _ => {
                return Err(ctx(
                    "parent table and parent fk column must be set together".into(),
                ))
            }
        };

        let lookup = match (
            self.lookup_table,
            self.lookup_source_column,
            self.lookup_dest_column,
        ) {
            (Some(t), Some(src), Some(dst)) => {
                if parent.is_none() {
                    return Err(ctx("key lookup requires a parent linkage".into()));
                }
                check_ident("lookup table", &t)?;
                check_ident("lookup source column", &src)?;
                check_ident("lookup dest column", &dst)?;
                Some(KeyLookup {
                    table: t,
                    source_column: src,
                    dest_column: dst,
                })
            }
            (None, None, None) => None,
            _ => {
                return Err(ctx(
                    "lookup table, source column and dest column must be set together".into(),
                ))
            }
        };

        for (column, _) in self.erase_overrides.iter().chain(self.restore_overrides.iter()) {
            check_ident("override column", column)?;
            if column_key(column) == column_key(&mask_flag_column) {
                return Err(ctx(format!(
                    "override on mask flag column {} is not allowed",
                    column
                )));
            }
            if column_key(column) == column_key(&self.id_column) {
                return Err(ctx("override on id column is not allowed".into()));
            }
        }

        Ok(EraseRule {
            schema: self.schema,
            table,
            id_column: self.id_column,
            mask_flag_column,
            parent,
            lookup,
            whitelist,
            date_columns: self.date_columns,
            int_columns: self.int_columns,
            erase_overrides: self.erase_overrides,
            restore_overrides: self.restore_overrides,
        })
    }
}
