//! Buffered iterators over array cells and metadata entries
//!
//! An iterator takes its handle by value. Whether construction succeeds or
//! fails, the handle is released exactly once: by the iterator's own
//! `finalize`/drop, or by the failed constructor before it returns.

use crate::array::{Array, ArrayMode};
use crate::error::{Result, StorageError};
use crate::metadata::{Metadata, MetadataMode};
use tracing::debug;

/// Cell-by-cell reader over an array range
///
/// Each buffer is the read window of one projected attribute and must hold
/// at least one cell.
#[derive(Debug)]
pub struct ArrayIterator {
    array: Array,
    buffers: Vec<Vec<u8>>,
    cell_sizes: Vec<usize>,
    /// Cells currently held in the buffers
    cells: usize,
    /// Current cell within the buffers
    pos: usize,
}

impl ArrayIterator {
    pub fn new(array: Array, buffers: Vec<Vec<u8>>) -> Result<Self> {
        if array.mode() != ArrayMode::Read {
            return Err(StorageError::Array(format!(
                "iterator needs array {:?} open for reading",
                array.dir()
            )));
        }

        let cell_sizes = array.cell_sizes();
        if buffers.len() != cell_sizes.len() {
            return Err(StorageError::Array(format!(
                "iterator expects {} buffer(s), got {}",
                cell_sizes.len(),
                buffers.len()
            )));
        }
        for (i, (buffer, &size)) in buffers.iter().zip(&cell_sizes).enumerate() {
            if buffer.len() < size {
                return Err(StorageError::Array(format!(
                    "iterator buffer {} cannot hold one {}-byte cell",
                    i, size
                )));
            }
        }

        let mut iterator = ArrayIterator {
            array,
            buffers,
            cell_sizes,
            cells: 0,
            pos: 0,
        };
        iterator.fill()?;
        Ok(iterator)
    }

    pub fn array(&self) -> &Array {
        &self.array
    }

    /// True once every cell of the range has been visited
    pub fn end(&self) -> bool {
        self.pos >= self.cells
    }

    /// Current cell of the `slot`-th projected attribute
    pub fn get_value(&self, slot: usize) -> Result<&[u8]> {
        if self.end() {
            return Err(StorageError::Array("iterator is past the end".to_string()));
        }
        let size = *self.cell_sizes.get(slot).ok_or_else(|| {
            StorageError::Array(format!("attribute slot {} is not projected", slot))
        })?;
        let start = self.pos * size;
        Ok(&self.buffers[slot][start..start + size])
    }

    /// Advance one cell, refilling the buffers when they run dry
    pub fn next(&mut self) -> Result<()> {
        if self.end() {
            return Err(StorageError::Array("iterator is past the end".to_string()));
        }
        self.pos += 1;
        if self.pos == self.cells {
            self.fill()?;
        }
        Ok(())
    }

    /// Release the iterator together with its array
    pub fn finalize(self) -> Result<()> {
        debug!("Finalizing array iterator over {:?}", self.array.dir());
        self.array.finalize()
    }

    fn fill(&mut self) -> Result<()> {
        let mut views: Vec<&mut [u8]> = self.buffers.iter_mut().map(Vec::as_mut_slice).collect();
        let sizes = self.array.read(&mut views)?;
        self.cells = sizes[0] / self.cell_sizes[0];
        self.pos = 0;
        Ok(())
    }
}

/// Entry-by-entry reader over a metadata object, in key order
#[derive(Debug)]
pub struct MetadataIterator {
    metadata: Metadata,
    keys: Vec<String>,
    buffers: Vec<Vec<u8>>,
    sizes: Vec<usize>,
    pos: usize,
}

impl MetadataIterator {
    pub fn new(metadata: Metadata, buffers: Vec<Vec<u8>>) -> Result<Self> {
        if metadata.mode() != MetadataMode::Read {
            return Err(StorageError::Metadata(format!(
                "iterator needs metadata {:?} open for reading",
                metadata.dir()
            )));
        }

        let names = metadata.attribute_names();
        if buffers.len() != names.len() {
            return Err(StorageError::Metadata(format!(
                "iterator expects {} buffer(s), got {}",
                names.len(),
                buffers.len()
            )));
        }
        for (i, (buffer, name)) in buffers.iter().zip(&names).enumerate() {
            let size = metadata
                .schema()
                .attribute_index(name)
                .map(|id| metadata.schema().attributes[id].cell_size())
                .unwrap_or(1);
            if buffer.len() < size {
                return Err(StorageError::Metadata(format!(
                    "iterator buffer {} cannot hold one {}-byte value",
                    i, size
                )));
            }
        }

        let keys = metadata.keys().map(str::to_string).collect();
        let sizes = vec![0; buffers.len()];
        let mut iterator = MetadataIterator {
            metadata,
            keys,
            buffers,
            sizes,
            pos: 0,
        };
        iterator.load()?;
        Ok(iterator)
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn end(&self) -> bool {
        self.pos >= self.keys.len()
    }

    /// Key of the current entry
    pub fn key(&self) -> Result<&str> {
        self.keys
            .get(self.pos)
            .map(String::as_str)
            .ok_or_else(|| StorageError::Metadata("iterator is past the end".to_string()))
    }

    /// Value of the `slot`-th projected attribute for the current key
    pub fn get_value(&self, slot: usize) -> Result<&[u8]> {
        if self.end() {
            return Err(StorageError::Metadata("iterator is past the end".to_string()));
        }
        let size = *self.sizes.get(slot).ok_or_else(|| {
            StorageError::Metadata(format!("attribute slot {} is not projected", slot))
        })?;
        Ok(&self.buffers[slot][..size])
    }

    pub fn next(&mut self) -> Result<()> {
        if self.end() {
            return Err(StorageError::Metadata("iterator is past the end".to_string()));
        }
        self.pos += 1;
        self.load()
    }

    /// Release the iterator together with its metadata handle
    pub fn finalize(self) -> Result<()> {
        debug!("Finalizing metadata iterator over {:?}", self.metadata.dir());
        self.metadata.finalize()
    }

    fn load(&mut self) -> Result<()> {
        let Some(key) = self.keys.get(self.pos) else {
            return Ok(());
        };
        let mut views: Vec<&mut [u8]> = self.buffers.iter_mut().map(Vec::as_mut_slice).collect();
        self.sizes = self.metadata.read(key, &mut views)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::pack_keys;
    use crate::schema::{Attribute, Datatype, Dimension, Schema};
    use std::path::Path;
    use tempfile::TempDir;

    fn array_schema(dir: &Path) -> Schema {
        Schema::array(
            dir.to_string_lossy(),
            vec![Attribute::new("v", Datatype::Int64)],
            vec![Dimension::new("x", 1, 5)],
        )
        .unwrap()
    }

    fn open_array(dir: &Path, mode: ArrayMode) -> Array {
        Array::init(dir, array_schema(dir), mode, None, None, false).unwrap()
    }

    fn write_array(dir: &Path) {
        let mut array = open_array(dir, ArrayMode::Write);
        let cells: Vec<u8> = (1i64..=5).flat_map(|v| (v * 100).to_le_bytes()).collect();
        array.write(&[cells.as_slice()]).unwrap();
        array.finalize().unwrap();
    }

    #[test]
    fn test_array_iterator_refills() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        write_array(dir);

        let array = Array::init(dir, array_schema(dir), ArrayMode::Read, None, None, false)?;
        // window of two cells forces refills
        let mut it = ArrayIterator::new(array, vec![vec![0u8; 16]])?;

        let mut seen = Vec::new();
        while !it.end() {
            let bytes: [u8; 8] = it.get_value(0)?.try_into().unwrap();
            seen.push(i64::from_le_bytes(bytes));
            it.next()?;
        }
        assert_eq!(seen, vec![100, 200, 300, 400, 500]);
        assert!(it.next().is_err());
        it.finalize()
    }

    #[test]
    fn test_array_iterator_rejects_write_handle() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();

        let array = open_array(dir, ArrayMode::Write);
        let err = ArrayIterator::new(array, vec![vec![0u8; 8]]).unwrap_err();
        assert!(matches!(err, StorageError::Array(_)));
    }

    #[test]
    fn test_array_iterator_rejects_small_buffer() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();

        let array = open_array(dir, ArrayMode::Read);
        assert!(ArrayIterator::new(array, vec![vec![0u8; 7]]).is_err());
    }

    #[test]
    fn test_metadata_iterator() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        let schema = Schema::metadata(
            dir.to_string_lossy(),
            vec![Attribute::new("n", Datatype::Int32)],
        )?;

        let mut meta = Metadata::init(dir, schema.clone(), MetadataMode::Write, None, false)?;
        let values: Vec<u8> = [3i32, 1, 2].iter().flat_map(|v| v.to_le_bytes()).collect();
        meta.write(&pack_keys(&["c", "a", "b"]), &[values.as_slice()])?;
        meta.finalize()?;

        let meta = Metadata::init(dir, schema, MetadataMode::Read, None, false)?;
        let mut it = MetadataIterator::new(meta, vec![vec![0u8; 4]])?;

        let mut seen = Vec::new();
        while !it.end() {
            let bytes: [u8; 4] = it.get_value(0)?.try_into().unwrap();
            seen.push((it.key()?.to_string(), i32::from_le_bytes(bytes)));
            it.next()?;
        }
        assert_eq!(
            seen,
            vec![("a".to_string(), 1), ("b".to_string(), 2), ("c".to_string(), 3)]
        );
        assert!(it.key().is_err());
        it.finalize()
    }

    #[test]
    fn test_metadata_iterator_empty_store() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        let attributes = vec![Attribute::new("n", Datatype::Int32)];
        let schema = Schema::metadata(dir.to_string_lossy(), attributes)?;

        let meta = Metadata::init(dir, schema, MetadataMode::Read, None, false)?;
        let it = MetadataIterator::new(meta, vec![vec![0u8; 4]])?;
        assert!(it.end());
        it.finalize()
    }
}
