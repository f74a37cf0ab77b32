//! Metadata handle
//!
//! Key-value side store. Values are kept per attribute in
//! `__metadata_store.tdb`, a bincode map `key -> attribute -> bytes`. Writes
//! are staged in memory and merged into the store on finalize.

use crate::error::{Result, StorageError};
use crate::schema::Schema;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const METADATA_STORE_FILENAME: &str = "__metadata_store.tdb";

type Entries = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

/// Open mode of a metadata handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataMode {
    Read,
    Write,
}

/// Open metadata object bound to its schema
#[derive(Debug)]
pub struct Metadata {
    schema: Schema,
    dir: PathBuf,
    mode: MetadataMode,
    attribute_ids: Vec<usize>,
    /// Stored entries in read mode, staged entries in write mode
    entries: Entries,
    sync: bool,
}

impl Metadata {
    /// Open a metadata directory whose schema is already loaded
    pub fn init(
        dir: &Path,
        schema: Schema,
        mode: MetadataMode,
        attributes: Option<&[&str]>,
        sync: bool,
    ) -> Result<Self> {
        let attribute_ids = schema
            .resolve_projection(attributes)
            .map_err(|e| StorageError::Metadata(e.to_string()))?;

        let entries = match mode {
            MetadataMode::Read => load_entries(dir)?,
            MetadataMode::Write => Entries::new(),
        };

        debug!(
            "Opened metadata {:?} in {:?} mode ({} stored keys visible)",
            dir,
            mode,
            entries.len()
        );

        Ok(Metadata {
            schema,
            dir: dir.to_path_buf(),
            mode,
            attribute_ids,
            entries,
            sync,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn mode(&self) -> MetadataMode {
        self.mode
    }

    /// Names of the projected attributes, in buffer order
    pub fn attribute_names(&self) -> Vec<&str> {
        self.attribute_ids
            .iter()
            .map(|&id| self.schema.attributes[id].name.as_str())
            .collect()
    }

    /// Stage a batch of entries
    ///
    /// `keys` packs NUL-terminated keys back to back. Each buffer carries one
    /// cell per key for its attribute, in key order. An empty key buffer
    /// writes nothing.
    pub fn write(&mut self, keys: &[u8], buffers: &[&[u8]]) -> Result<()> {
        if self.mode != MetadataMode::Write {
            return Err(StorageError::Metadata(format!(
                "metadata {:?} is not open for writing",
                self.dir
            )));
        }
        if keys.is_empty() {
            return Ok(());
        }
        self.check_buffer_count(buffers.len())?;

        let keys = unpack_keys(keys)?;
        for (slot, buffer) in buffers.iter().enumerate() {
            let attribute = &self.schema.attributes[self.attribute_ids[slot]];
            let expected = keys.len() * attribute.cell_size();
            if buffer.len() != expected {
                return Err(StorageError::Metadata(format!(
                    "buffer for '{}' holds {} bytes, expected {} for {} key(s)",
                    attribute.name,
                    buffer.len(),
                    expected,
                    keys.len()
                )));
            }
        }

        for (k, key) in keys.iter().enumerate() {
            let entry = self.entries.entry(key.to_string()).or_default();
            for (slot, buffer) in buffers.iter().enumerate() {
                let attribute = &self.schema.attributes[self.attribute_ids[slot]];
                let size = attribute.cell_size();
                entry.insert(
                    attribute.name.clone(),
                    buffer[k * size..(k + 1) * size].to_vec(),
                );
            }
        }
        Ok(())
    }

    /// Point lookup of one key
    ///
    /// Returns the bytes copied into each buffer; an absent key (or an
    /// attribute never written for it) yields zero.
    pub fn read(&mut self, key: &str, buffers: &mut [&mut [u8]]) -> Result<Vec<usize>> {
        if self.mode != MetadataMode::Read {
            return Err(StorageError::Metadata(format!(
                "metadata {:?} is not open for reading",
                self.dir
            )));
        }
        self.check_buffer_count(buffers.len())?;

        let mut sizes = vec![0; buffers.len()];
        for (slot, buffer) in buffers.iter_mut().enumerate() {
            let Some(value) = self.value(key, slot) else {
                continue;
            };
            if buffer.len() < value.len() {
                return Err(StorageError::Metadata(format!(
                    "buffer {} too small for key '{}' ({} < {} bytes)",
                    slot,
                    key,
                    buffer.len(),
                    value.len()
                )));
            }
            buffer[..value.len()].copy_from_slice(value);
            sizes[slot] = value.len();
        }
        Ok(sizes)
    }

    /// Keys visible to this handle, in lexicographic order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Value of the `slot`-th projected attribute for `key`
    pub fn value(&self, key: &str, slot: usize) -> Option<&[u8]> {
        let id = *self.attribute_ids.get(slot)?;
        self.entries
            .get(key)?
            .get(&self.schema.attributes[id].name)
            .map(Vec::as_slice)
    }

    /// Persist staged entries and close the handle
    pub fn finalize(self) -> Result<()> {
        if self.mode == MetadataMode::Write && !self.entries.is_empty() {
            let mut stored = load_entries(&self.dir)?;
            for (key, values) in self.entries {
                stored.entry(key).or_default().extend(values);
            }
            if let Err(e) = store_entries(&self.dir, &stored, self.sync) {
                warn!("Failed to persist metadata {:?}: {}", self.dir, e);
                return Err(e);
            }
        }
        debug!("Finalized metadata {:?}", self.dir);
        Ok(())
    }

    fn check_buffer_count(&self, count: usize) -> Result<()> {
        if count != self.attribute_ids.len() {
            return Err(StorageError::Metadata(format!(
                "expected {} buffer(s), got {}",
                self.attribute_ids.len(),
                count
            )));
        }
        Ok(())
    }
}

/// Split a packed buffer of NUL-terminated keys
fn unpack_keys(packed: &[u8]) -> Result<Vec<&str>> {
    let Some((&0, body)) = packed.split_last() else {
        return Err(StorageError::Metadata(
            "key buffer must end with a NUL terminator".to_string(),
        ));
    };

    body.split(|&b| b == 0)
        .map(|raw| {
            if raw.is_empty() {
                return Err(StorageError::Metadata("empty metadata key".to_string()));
            }
            std::str::from_utf8(raw)
                .map_err(|_| StorageError::Metadata("metadata key is not UTF-8".to_string()))
        })
        .collect()
}

fn load_entries(dir: &Path) -> Result<Entries> {
    let path = dir.join(METADATA_STORE_FILENAME);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
        Err(e) => {
            return Err(StorageError::Metadata(format!("cannot read {:?}: {}", path, e)));
        }
    };
    bincode::deserialize(&bytes)
        .map_err(|e| StorageError::Metadata(format!("corrupt metadata store {:?}: {}", path, e)))
}

fn store_entries(dir: &Path, entries: &Entries, sync: bool) -> Result<()> {
    let path = dir.join(METADATA_STORE_FILENAME);
    let bytes = bincode::serialize(entries)
        .map_err(|e| StorageError::Metadata(format!("cannot encode metadata store: {}", e)))?;

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .map_err(|e| StorageError::Metadata(format!("cannot open {:?}: {}", path, e)))?;
    file.write_all(&bytes)
        .map_err(|e| StorageError::Metadata(format!("cannot write {:?}: {}", path, e)))?;
    if sync {
        file.sync_all()
            .map_err(|e| StorageError::Metadata(format!("cannot sync {:?}: {}", path, e)))?;
    }
    crate::node::close_file(file, &path).map_err(|e| StorageError::Metadata(e.to_string()))
}

/// Pack keys the way [`Metadata::write`] expects them
pub fn pack_keys<S: AsRef<str>>(keys: &[S]) -> Vec<u8> {
    let mut packed = Vec::new();
    for key in keys {
        packed.extend_from_slice(key.as_ref().as_bytes());
        packed.push(0);
    }
    packed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Datatype};
    use tempfile::TempDir;

    fn schema(dir: &Path) -> Schema {
        Schema::metadata(
            dir.to_string_lossy(),
            vec![
                Attribute::new("count", Datatype::Int32),
                Attribute::new("flag", Datatype::UInt8),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_unpack_keys() {
        assert_eq!(unpack_keys(b"a\0bc\0").unwrap(), vec!["a", "bc"]);
        assert!(unpack_keys(b"a\0b").is_err());
        assert!(unpack_keys(b"a\0\0").is_err());
        assert_eq!(pack_keys(&["a", "bc"]), b"a\0bc\0".to_vec());
    }

    #[test]
    fn test_write_finalize_read() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();

        let mut meta = Metadata::init(dir, schema(dir), MetadataMode::Write, None, false)?;
        let counts: Vec<u8> = [10i32, 20].iter().flat_map(|v| v.to_le_bytes()).collect();
        meta.write(&pack_keys(&["k1", "k2"]), &[counts.as_slice(), [1u8, 0].as_slice()])?;
        meta.finalize()?;

        let mut meta = Metadata::init(dir, schema(dir), MetadataMode::Read, None, false)?;
        let mut count = [0u8; 4];
        let mut flag = [0u8; 1];
        let sizes = meta.read("k2", &mut [&mut count, &mut flag])?;
        assert_eq!(sizes, vec![4, 1]);
        assert_eq!(i32::from_le_bytes(count), 20);
        assert_eq!(flag, [0]);

        let sizes = meta.read("missing", &mut [&mut count, &mut flag])?;
        assert_eq!(sizes, vec![0, 0]);
        assert_eq!(meta.keys().collect::<Vec<_>>(), vec!["k1", "k2"]);
        Ok(())
    }

    #[test]
    fn test_finalize_merges_with_store() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();

        let mut meta = Metadata::init(dir, schema(dir), MetadataMode::Write, None, false)?;
        meta.write(&pack_keys(&["k1"]), &[5i32.to_le_bytes().as_slice(), [1u8].as_slice()])?;
        meta.finalize()?;

        let only_flag = Some(&["flag"][..]);
        let mut meta = Metadata::init(dir, schema(dir), MetadataMode::Write, only_flag, false)?;
        meta.write(&pack_keys(&["k1", "k3"]), &[&[0, 1]])?;
        meta.finalize()?;

        let meta = Metadata::init(dir, schema(dir), MetadataMode::Read, None, false)?;
        assert_eq!(meta.value("k1", 0), Some(&5i32.to_le_bytes()[..]));
        assert_eq!(meta.value("k1", 1), Some(&[0u8][..]));
        assert_eq!(meta.value("k3", 0), None);
        assert_eq!(meta.value("k3", 1), Some(&[1u8][..]));
        Ok(())
    }

    #[test]
    fn test_synced_store_replaces_previous_contents() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        let path = dir.join(METADATA_STORE_FILENAME);
        std::fs::write(&path, vec![0xAB; 4096]).unwrap();

        let mut entries = Entries::new();
        entries
            .entry("k".to_string())
            .or_default()
            .insert("flag".to_string(), vec![1]);
        store_entries(dir, &entries, true)?;

        // truncated to the new encoding and already closed, so it reads back whole
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes, bincode::serialize(&entries).unwrap());
        assert_eq!(load_entries(dir)?, entries);
        Ok(())
    }

    #[test]
    fn test_empty_key_batch_is_noop() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();

        let mut meta = Metadata::init(dir, schema(dir), MetadataMode::Write, None, false)?;
        meta.write(&[], &[])?;
        meta.finalize()?;
        assert!(!dir.join(METADATA_STORE_FILENAME).exists());
        Ok(())
    }

    #[test]
    fn test_buffer_checks() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();

        let mut meta = Metadata::init(dir, schema(dir), MetadataMode::Write, None, false)?;
        // one key, but two cells of count
        assert!(meta.write(b"k\0", &[&[0u8; 8], &[0u8; 1]]).is_err());
        // wrong buffer count
        assert!(meta.write(b"k\0", &[&[0u8; 4]]).is_err());
        meta.write(b"k\0", &[&[0u8; 4], &[0u8; 1]])?;
        meta.finalize()?;

        let mut meta = Metadata::init(dir, schema(dir), MetadataMode::Read, None, false)?;
        let mut small = [0u8; 2];
        let mut flag = [0u8; 1];
        assert!(meta.read("k", &mut [&mut small, &mut flag]).is_err());
        Ok(())
    }

    #[test]
    fn test_corrupt_store() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        std::fs::write(dir.join(METADATA_STORE_FILENAME), [0xFF; 3]).unwrap();

        let err = Metadata::init(dir, schema(dir), MetadataMode::Read, None, false).unwrap_err();
        assert!(matches!(err, StorageError::Metadata(_)));
    }
}
