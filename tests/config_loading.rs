//! Configuration file handling through the manager

use std::io::Write;
use tempfile::{NamedTempFile, TempDir};
use tilestore::{ErrorKind, StorageConfig, StorageManager};

#[test]
fn test_manager_reads_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "sync_writes = false").unwrap();
    writeln!(file, "max_schema_size = 4096").unwrap();

    let manager = StorageManager::new(Some(file.path()));
    assert!(!manager.config().sync_writes);
    assert_eq!(manager.config().max_schema_size, 4096);
}

#[test]
fn test_manager_falls_back_on_bad_config() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "sync_writes = \"sometimes\"").unwrap();

    let manager = StorageManager::new(Some(file.path()));
    assert_eq!(manager.config(), &StorageConfig::default());
}

#[test]
fn test_zero_schema_limit_is_config_error() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "max_schema_size = 0").unwrap();

    let err = StorageConfig::load(file.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    // the manager still comes up, with defaults
    let manager = StorageManager::new(Some(file.path()));
    assert_eq!(manager.config().max_schema_size, StorageConfig::default().max_schema_size);
}

#[test]
fn test_fallback_manager_is_usable() {
    let temp = TempDir::new().unwrap();
    let manager = StorageManager::new(Some(temp.path().join("missing.toml").as_path()));

    let ws = temp.path().join("ws");
    manager.workspace_create(&ws).unwrap();
    assert!(ws.join("__tiledb_workspace.tdb").is_file());
}
