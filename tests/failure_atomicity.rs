//! Partial and corrupt container tests
//!
//! A container whose creation did not complete must never load as a valid
//! array or metadata object.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tilestore::{
    ArrayMode, Attribute, Datatype, Dimension, ErrorKind, MetadataMode, Schema, StorageConfig,
    StorageManager,
};

const ARRAY_MARKER: &str = "__tiledb_array.tdb";
const ARRAY_SCHEMA: &str = "__array_schema.tdb";
const METADATA_SCHEMA: &str = "__metadata_schema.tdb";

fn setup() -> (TempDir, StorageManager, PathBuf) {
    let temp = TempDir::new().unwrap();
    let manager = StorageManager::with_config(StorageConfig::default().without_sync());
    let ws = temp.path().join("ws");
    manager.workspace_create(&ws).unwrap();
    (temp, manager, ws)
}

fn create_array(manager: &StorageManager, dir: &Path) {
    let schema = Schema::array(
        dir.to_string_lossy(),
        vec![Attribute::new("a", Datatype::UInt8)],
        vec![Dimension::new("i", 0, 99)],
    )
    .unwrap();
    manager.array_create(&schema).unwrap();
}

/// Helper: Truncate file to specific size
fn truncate_file(path: &Path, size: u64) {
    let file = OpenOptions::new().write(true).open(path).unwrap();
    file.set_len(size).unwrap();
}

#[test]
fn test_directory_without_marker_is_not_found() {
    let (_temp, manager, ws) = setup();
    let dir = ws.join("half");

    // schema written, marker never was
    create_array(&manager, &dir);
    std::fs::remove_file(dir.join(ARRAY_MARKER)).unwrap();

    let err = manager.array_init(&dir, ArrayMode::Read, None, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(manager.classify(&dir).unwrap().is_none());
}

#[test]
fn test_empty_schema_file_rejected_before_decode() {
    let (_temp, manager, ws) = setup();
    let dir = ws.join("arr");
    create_array(&manager, &dir);

    truncate_file(&dir.join(ARRAY_SCHEMA), 0);

    let err = manager.array_load_schema(&dir).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(err.to_string().contains("empty schema file"));
}

#[test]
fn test_truncated_schema_file() {
    let (_temp, manager, ws) = setup();
    let dir = ws.join("arr");
    create_array(&manager, &dir);

    let schema_file = dir.join(ARRAY_SCHEMA);
    let len = std::fs::metadata(&schema_file).unwrap().len();
    truncate_file(&schema_file, len / 2);

    let err = manager.array_init(&dir, ArrayMode::Read, None, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Schema);
}

#[test]
fn test_missing_schema_file() {
    let (_temp, manager, ws) = setup();
    let dir = ws.join("arr");
    create_array(&manager, &dir);
    std::fs::remove_file(dir.join(ARRAY_SCHEMA)).unwrap();

    let err = manager.array_load_schema(&dir).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_flipped_byte_fails_checksum() {
    let (_temp, manager, ws) = setup();
    let meta = ws.join("meta");
    manager
        .metadata_create(
            &Schema::metadata(meta.to_string_lossy(), vec![Attribute::new("v", Datatype::Char)])
                .unwrap(),
        )
        .unwrap();

    let schema_file = meta.join(METADATA_SCHEMA);
    let mut bytes = std::fs::read(&schema_file).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&schema_file, &bytes).unwrap();

    let err = manager.metadata_init(&meta, MetadataMode::Read, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Schema);
}

#[test]
fn test_oversized_schema_file() {
    let (temp, _manager, ws) = setup();
    let dir = ws.join("arr");

    let writer = StorageManager::with_config(StorageConfig::default().without_sync());
    create_array(&writer, &dir);

    let strict = StorageManager::with_config(StorageConfig {
        sync_writes: false,
        max_schema_size: 8,
    });
    let err = strict.array_load_schema(&dir).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    drop(temp);
}

#[test]
fn test_existing_target_is_already_exists() {
    let (_temp, manager, ws) = setup();
    let dir = ws.join("arr");
    create_array(&manager, &dir);

    let schema = manager.array_load_schema(&dir).unwrap();
    let err = manager.array_create(&schema).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    // the original is untouched
    assert!(manager.array_load_schema(&dir).is_ok());
}
