//! Erase rules: which columns of which tables are governed, and how.
//!
//! Rules are immutable once built. Every table and column name that ends up
//! in generated SQL comes from a validated rule, never from request input;
//! values are always bound as parameters.

pub mod file;
pub mod overrides;
pub mod registry;
pub mod rule;

pub use file::{RuleFile, RuleSpec};
pub use overrides::{OverrideParam, OverrideValue};
pub use registry::RuleRegistry;
pub use rule::{quote_ident, EraseRule, EraseRuleBuilder, KeyLookup, ParentLink, DEFAULT_SCHEMA};
