//! Shroud Core — errors, configuration, generic row values, value normalization.

pub mod config;
pub mod error;
pub mod normalize;
pub mod operator;
pub mod value;

pub use config::{DataPaths, ShroudConfig};
pub use error::{Error, Result};
pub use normalize::{to_storage_type, StorageValue};
pub use operator::Operator;
pub use value::{column_key, FieldMap, RowSnapshot, RowValue};
