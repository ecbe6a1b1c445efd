//! Configuration and data directory management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Environment variable holding the Base64 erasure key.
pub const ERASURE_KEY_VAR: &str = "SHROUD_ERASURE_KEY";
/// Environment variable overriding the rule file location.
pub const RULES_FILE_VAR: &str = "SHROUD_RULES_FILE";
/// Environment variable overriding the IN-list chunk size.
pub const BATCH_SIZE_VAR: &str = "SHROUD_BATCH_SIZE";

/// Default number of ids bound per IN-list round-trip.
pub const DEFAULT_BATCH_SIZE: usize = 1000;
/// Upper bound for the chunk size; stays under SQLite's bound-parameter limit.
pub const MAX_BATCH_SIZE: usize = 30_000;

/// Paths to all Shroud data files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// SQLite database directory (`data/db/`).
    pub db_dir: PathBuf,
    /// Declarative erase rules (`data/erase-rules.json`).
    pub rules_file: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let paths = Self {
            db_dir: root.join("db"),
            rules_file: root.join("erase-rules.json"),
            root,
        };
        std::fs::create_dir_all(&paths.db_dir)?;
        Ok(paths)
    }
}

/// Top-level Shroud configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct ShroudConfig {
    /// Data directory paths.
    pub data_paths: DataPaths,
    /// Base64 symmetric key. Decoded and length-checked by the crypto service.
    #[serde(skip)]
    pub erasure_key: Option<String>,
    /// Ids per IN-list round-trip.
    pub batch_size: usize,
}

impl std::fmt::Debug for ShroudConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShroudConfig")
            .field("data_paths", &self.data_paths)
            .field(
                "erasure_key",
                &self.erasure_key.as_ref().map(|_| "<redacted>"),
            )
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl ShroudConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env(data_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        Self::from_lookup(data_dir, |name| std::env::var(name).ok())
    }

    /// Create configuration from an arbitrary variable source.
    pub fn from_lookup(
        data_dir: impl AsRef<Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> std::io::Result<Self> {
        let mut data_paths = DataPaths::new(data_dir)?;
        if let Some(rules) = lookup(RULES_FILE_VAR).filter(|s| !s.trim().is_empty()) {
            data_paths.rules_file = PathBuf::from(rules);
        }

        let batch_size = match lookup(BATCH_SIZE_VAR) {
            Some(raw) => raw.trim().parse::<usize>().unwrap_or_else(|_| {
                warn!(
                    "{} is not a number ({:?}), using {}",
                    BATCH_SIZE_VAR, raw, DEFAULT_BATCH_SIZE
                );
                DEFAULT_BATCH_SIZE
            }),
            None => DEFAULT_BATCH_SIZE,
        }
        .clamp(1, MAX_BATCH_SIZE);

        let erasure_key = lookup(ERASURE_KEY_VAR)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        Ok(Self {
            data_paths,
            erasure_key,
            batch_size,
        })
    }

    /// The configured key, or a configuration error when absent.
    pub fn require_key(&self) -> crate::Result<&str> {
        self.erasure_key.as_deref().ok_or_else(|| {
            crate::Error::Config(format!("{} is not set", ERASURE_KEY_VAR))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let env = vars(&[]);
        let config = ShroudConfig::from_lookup(dir.path(), |k| env.get(k).cloned()).unwrap();
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert!(config.erasure_key.is_none());
        assert!(config.data_paths.db_dir.exists());
        assert_eq!(config.data_paths.rules_file, dir.path().join("erase-rules.json"));
        assert!(matches!(config.require_key(), Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_overrides_and_clamp() {
        let dir = tempfile::tempdir().unwrap();
        let env = vars(&[
            (ERASURE_KEY_VAR, "  c2VjcmV0  "),
            (BATCH_SIZE_VAR, "999999"),
            (RULES_FILE_VAR, "/etc/shroud/rules.json"),
        ]);
        let config = ShroudConfig::from_lookup(dir.path(), |k| env.get(k).cloned()).unwrap();
        assert_eq!(config.batch_size, MAX_BATCH_SIZE);
        assert_eq!(config.require_key().unwrap(), "c2VjcmV0");
        assert_eq!(config.data_paths.rules_file, PathBuf::from("/etc/shroud/rules.json"));
    }

    #[test]
    fn test_unparsable_batch_size_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let env = vars(&[(BATCH_SIZE_VAR, "abc")]);
        let config = ShroudConfig::from_lookup(dir.path(), |k| env.get(k).cloned()).unwrap();
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);

        let env = vars(&[(BATCH_SIZE_VAR, " 0 ")]);
        let config = ShroudConfig::from_lookup(dir.path(), |k| env.get(k).cloned()).unwrap();
        assert_eq!(config.batch_size, 1);
    }

    #[test]
    fn test_debug_redacts_key() {
        let dir = tempfile::tempdir().unwrap();
        let env = vars(&[(ERASURE_KEY_VAR, "c2VjcmV0")]);
        let config = ShroudConfig::from_lookup(dir.path(), |k| env.get(k).cloned()).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("c2VjcmV0"));
        assert!(rendered.contains("<redacted>"));
    }
}
