//! Storage manager configuration
//!
//! Loaded once when the manager is constructed and shared read-only by every
//! operation afterwards.

use crate::error::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default upper bound for a schema file (16 MiB)
pub const DEFAULT_MAX_SCHEMA_SIZE: u64 = 16 * 1024 * 1024;

/// Storage manager configuration
///
/// # Examples
///
/// ```
/// use tilestore::StorageConfig;
///
/// let config: StorageConfig = toml::from_str("sync_writes = false").unwrap();
/// assert!(!config.sync_writes);
/// assert_eq!(config.max_schema_size, tilestore::core::config::DEFAULT_MAX_SCHEMA_SIZE);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Flush schema files, markers and handle data to disk before reporting success
    pub sync_writes: bool,

    /// Schema files larger than this are rejected before they are read
    pub max_schema_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            sync_writes: true,
            max_schema_size: DEFAULT_MAX_SCHEMA_SIZE,
        }
    }
}

impl StorageConfig {
    /// Load configuration from a TOML file
    ///
    /// Missing keys take their default value.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            StorageError::Config(format!("cannot read '{}': {}", path.display(), e))
        })?;
        let config: StorageConfig = toml::from_str(&text).map_err(|e| {
            StorageError::Config(format!("cannot parse '{}': {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.max_schema_size == 0 {
            return Err(StorageError::Config(
                "max_schema_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Disable synchronous writes (tests, scratch data)
    pub fn without_sync(mut self) -> Self {
        self.sync_writes = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = StorageConfig::default();
        assert!(config.sync_writes);
        assert_eq!(config.max_schema_size, DEFAULT_MAX_SCHEMA_SIZE);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_schema_size = 4096").unwrap();

        let config = StorageConfig::load(file.path()).unwrap();
        assert_eq!(config.max_schema_size, 4096);
        assert!(config.sync_writes);
    }

    #[test]
    fn test_load_rejects_zero_limit() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_schema_size = 0").unwrap();

        let err = StorageConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = StorageConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[test]
    fn test_load_malformed_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sync_writes = \"maybe\"").unwrap();

        assert!(StorageConfig::load(file.path()).is_err());
    }
}
