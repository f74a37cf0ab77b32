//! Object lifecycle
//!
//! Loads schemas from array and metadata directories and hands out handles
//! and iterators bound to them. Every handle has a single owner; finalize
//! consumes it.

use crate::array::{Array, ArrayMode};
use crate::codec::SchemaCodec;
use crate::config::StorageConfig;
use crate::error::{Result, StorageError};
use crate::iterator::{ArrayIterator, MetadataIterator};
use crate::metadata::{Metadata, MetadataMode};
use crate::node::{self, NodeKind};
use crate::schema::Schema;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Opens and closes array and metadata objects
pub struct ObjectManager {
    config: Arc<StorageConfig>,
    codec: Arc<dyn SchemaCodec>,
}

impl ObjectManager {
    pub fn new(config: Arc<StorageConfig>, codec: Arc<dyn SchemaCodec>) -> Self {
        ObjectManager { config, codec }
    }

    /// Read and decode the schema stored in a `kind` directory
    ///
    /// Returns the canonical directory together with the schema.
    pub fn load_schema(&self, dir: &Path, kind: NodeKind) -> Result<(PathBuf, Schema)> {
        let real = node::real_dir(dir)?;
        debug!("Loading {} schema from {:?}", kind, real);

        if node::classify(&real)? != Some(kind) {
            return Err(StorageError::NotFound(format!(
                "{} '{}' does not exist",
                kind,
                real.display()
            )));
        }

        let filename = match kind.schema_filename() {
            Some(name) => real.join(name),
            None => return Err(StorageError::Validation(format!("a {} has no schema", kind))),
        };

        let mut file = File::open(&filename)
            .map_err(|e| StorageError::file(&filename, format!("cannot open schema file: {}", e)))?;
        let len = file
            .metadata()
            .map_err(|e| StorageError::file(&filename, format!("cannot stat schema file: {}", e)))?
            .len();
        if len == 0 {
            return Err(StorageError::file(&filename, "empty schema file"));
        }
        if len > self.config.max_schema_size {
            return Err(StorageError::file(
                &filename,
                format!(
                    "schema file of {} bytes exceeds the {} byte limit",
                    len, self.config.max_schema_size
                ),
            ));
        }

        let mut buffer = vec![0u8; len as usize];
        let read = file
            .read(&mut buffer)
            .map_err(|e| StorageError::file(&filename, format!("cannot read schema: {}", e)))?;
        if read != buffer.len() {
            return Err(StorageError::file(
                &filename,
                format!("short schema read ({} of {} bytes)", read, buffer.len()),
            ));
        }

        let schema = self.codec.decode(&buffer)?;
        if schema.role.node_kind() != kind {
            return Err(StorageError::Schema(format!(
                "'{}' holds a {:?} schema",
                filename.display(),
                schema.role
            )));
        }

        node::close_file(file, &filename)?;
        Ok((real, schema))
    }

    pub fn array_init(
        &self,
        dir: &Path,
        mode: ArrayMode,
        range: Option<&[(i64, i64)]>,
        attributes: Option<&[&str]>,
    ) -> Result<Array> {
        let (dir, schema) = self.load_schema(dir, NodeKind::Array)?;
        Array::init(&dir, schema, mode, attributes, range, self.config.sync_writes)
    }

    pub fn metadata_init(
        &self,
        dir: &Path,
        mode: MetadataMode,
        attributes: Option<&[&str]>,
    ) -> Result<Metadata> {
        let (dir, schema) = self.load_schema(dir, NodeKind::Metadata)?;
        Metadata::init(&dir, schema, mode, attributes, self.config.sync_writes)
    }

    /// Open an array for reading and wrap it in an iterator
    pub fn array_iterator_init(
        &self,
        dir: &Path,
        range: Option<&[(i64, i64)]>,
        attributes: Option<&[&str]>,
        buffers: Vec<Vec<u8>>,
    ) -> Result<ArrayIterator> {
        let array = self.array_init(dir, ArrayMode::Read, range, attributes)?;
        ArrayIterator::new(array, buffers)
    }

    pub fn metadata_iterator_init(
        &self,
        dir: &Path,
        attributes: Option<&[&str]>,
        buffers: Vec<Vec<u8>>,
    ) -> Result<MetadataIterator> {
        let metadata = self.metadata_init(dir, MetadataMode::Read, attributes)?;
        MetadataIterator::new(metadata, buffers)
    }

    /// Finalize and release an array; `None` is a no-op
    pub fn array_finalize(&self, array: Option<Array>) -> Result<()> {
        let Some(array) = array else {
            return Ok(());
        };
        let dir = array.dir().to_path_buf();
        array.finalize().map_err(|e| {
            warn!("Array {:?} released after failed finalize: {}", dir, e);
            e
        })
    }

    pub fn metadata_finalize(&self, metadata: Option<Metadata>) -> Result<()> {
        let Some(metadata) = metadata else {
            return Ok(());
        };
        let dir = metadata.dir().to_path_buf();
        metadata.finalize().map_err(|e| {
            warn!("Metadata {:?} released after failed finalize: {}", dir, e);
            e
        })
    }

    pub fn array_iterator_finalize(&self, iterator: Option<ArrayIterator>) -> Result<()> {
        match iterator {
            Some(iterator) => iterator.finalize(),
            None => Ok(()),
        }
    }

    pub fn metadata_iterator_finalize(&self, iterator: Option<MetadataIterator>) -> Result<()> {
        match iterator {
            Some(iterator) => iterator.finalize(),
            None => Ok(()),
        }
    }

    pub fn array_write(&self, array: Option<&mut Array>, buffers: &[&[u8]]) -> Result<()> {
        handle(array, "array")?.write(buffers)
    }

    pub fn array_read(
        &self,
        array: Option<&mut Array>,
        buffers: &mut [&mut [u8]],
    ) -> Result<Vec<usize>> {
        handle(array, "array")?.read(buffers)
    }

    pub fn array_reinit_subarray(
        &self,
        array: Option<&mut Array>,
        range: Option<&[(i64, i64)]>,
    ) -> Result<()> {
        handle(array, "array")?.reinit_subarray(range)
    }

    pub fn metadata_write(
        &self,
        metadata: Option<&mut Metadata>,
        keys: &[u8],
        buffers: &[&[u8]],
    ) -> Result<()> {
        handle(metadata, "metadata")?.write(keys, buffers)
    }

    pub fn metadata_read(
        &self,
        metadata: Option<&mut Metadata>,
        key: &str,
        buffers: &mut [&mut [u8]],
    ) -> Result<Vec<usize>> {
        handle(metadata, "metadata")?.read(key, buffers)
    }
}

fn handle<'a, T>(handle: Option<&'a mut T>, what: &str) -> Result<&'a mut T> {
    handle.ok_or_else(|| StorageError::Validation(format!("invalid {} handle", what)))
}
