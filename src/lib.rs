//! # tilestore - catalog and lifecycle manager for array storage
//!
//! `tilestore` organizes array data on a filesystem as a hierarchy of
//! workspaces, groups, arrays and metadata objects. Each container is a
//! directory tagged with a marker file; arrays and metadata additionally
//! carry a serialized schema.
//!
//! - **Containment rules** enforced on every create
//! - **Schema persistence** with a checksummed binary codec
//! - **Owned handles** for reading and writing arrays and metadata
//! - **Iterators** that take ownership of the handle they walk
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tilestore::{ArrayMode, Attribute, Datatype, Dimension, Result, Schema, StorageManager};
//!
//! # fn main() -> Result<()> {
//! let manager = StorageManager::new(None);
//!
//! manager.workspace_create("/data/ws1")?;
//! manager.group_create("/data/ws1/g1")?;
//!
//! let schema = Schema::array(
//!     "/data/ws1/g1/temperature",
//!     vec![Attribute::new("celsius", Datatype::Float32)],
//!     vec![Dimension::new("hour", 0, 23)],
//! )?;
//! manager.array_create(&schema)?;
//!
//! let mut array = manager.array_init("/data/ws1/g1/temperature", ArrayMode::Write, None, None)?;
//! let cells: Vec<u8> = (0..24).flat_map(|h| (h as f32).to_le_bytes()).collect();
//! manager.array_write(Some(&mut array), &[cells.as_slice()])?;
//! manager.array_finalize(Some(array))?;
//! # Ok(())
//! # }
//! ```

pub mod core;

// Re-export core modules internally so crate:: paths in core still work
#[allow(unused_imports)]
pub(crate) use self::core::{
    array, codec, config, container, error, iterator, lifecycle, metadata, node, schema,
};

pub use crate::core::{
    array::{Array, ArrayMode, Subarray},
    codec::{BincodeCodec, SchemaCodec},
    config::StorageConfig,
    error::{ErrorKind, Result, StorageError},
    iterator::{ArrayIterator, MetadataIterator},
    metadata::{pack_keys, Metadata, MetadataMode},
    node::NodeKind,
    schema::{Attribute, CellOrder, Datatype, Dimension, Schema, SchemaRole},
};

use crate::container::ContainerEngine;
use crate::lifecycle::ObjectManager;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Flattened outcome of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Err,
}

impl Status {
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

impl<T> From<&Result<T>> for Status {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Status::Ok,
            Err(_) => Status::Err,
        }
    }
}

/// Entry point for every catalog and object operation
///
/// Holds only read-only configuration, so one manager can be shared across
/// threads. Failed operations are logged through `tracing::error!` before the
/// error is returned.
pub struct StorageManager {
    config: Arc<StorageConfig>,
    containers: ContainerEngine,
    objects: ObjectManager,
}

impl StorageManager {
    /// Create a manager, loading configuration from `config_path` if given
    ///
    /// A configuration file that cannot be loaded is logged and replaced by
    /// the defaults; construction itself never fails.
    pub fn new(config_path: Option<&Path>) -> Self {
        let config = match config_path {
            Some(path) => match StorageConfig::load(path) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Using default configuration: {}", e);
                    StorageConfig::default()
                }
            },
            None => StorageConfig::default(),
        };
        Self::with_config(config)
    }

    pub fn with_config(config: StorageConfig) -> Self {
        Self::with_codec(config, Arc::new(BincodeCodec::new()))
    }

    /// Create a manager that persists schemas through `codec`
    pub fn with_codec(config: StorageConfig, codec: Arc<dyn SchemaCodec>) -> Self {
        let config = Arc::new(config);
        debug!("Storage manager ready ({:?})", config);
        StorageManager {
            containers: ContainerEngine::new(config.clone(), codec.clone()),
            objects: ObjectManager::new(config.clone(), codec),
            config,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    // Workspace and group

    pub fn workspace_create<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        logged("workspace_create", path, self.containers.create_workspace(path)).map(|_| ())
    }

    pub fn group_create<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        logged("group_create", path, self.containers.create_group(path)).map(|_| ())
    }

    // Array

    pub fn array_create(&self, schema: &Schema) -> Result<()> {
        logged("array_create", schema.dir(), self.containers.create_array(schema)).map(|_| ())
    }

    /// Load the schema of an existing array
    pub fn array_load_schema<P: AsRef<Path>>(&self, dir: P) -> Result<Schema> {
        let dir = dir.as_ref();
        logged(
            "array_load_schema",
            dir,
            self.objects.load_schema(dir, NodeKind::Array),
        )
        .map(|(_, schema)| schema)
    }

    /// Open an array
    ///
    /// `range` defaults to the full domain; `attributes` defaults to all.
    pub fn array_init<P: AsRef<Path>>(
        &self,
        dir: P,
        mode: ArrayMode,
        range: Option<&[(i64, i64)]>,
        attributes: Option<&[&str]>,
    ) -> Result<Array> {
        let dir = dir.as_ref();
        logged(
            "array_init",
            dir,
            self.objects.array_init(dir, mode, range, attributes),
        )
    }

    pub fn array_write(&self, array: Option<&mut Array>, buffers: &[&[u8]]) -> Result<()> {
        let dir = handle_dir(array.as_deref().map(Array::dir));
        logged("array_write", &dir, self.objects.array_write(array, buffers))
    }

    /// Read the next cells into `buffers`, returning the bytes filled per buffer
    pub fn array_read(
        &self,
        array: Option<&mut Array>,
        buffers: &mut [&mut [u8]],
    ) -> Result<Vec<usize>> {
        let dir = handle_dir(array.as_deref().map(Array::dir));
        logged("array_read", &dir, self.objects.array_read(array, buffers))
    }

    pub fn array_reinit_subarray(
        &self,
        array: Option<&mut Array>,
        range: Option<&[(i64, i64)]>,
    ) -> Result<()> {
        let dir = handle_dir(array.as_deref().map(Array::dir));
        logged(
            "array_reinit_subarray",
            &dir,
            self.objects.array_reinit_subarray(array, range),
        )
    }

    /// Finalize an array; `None` is a no-op
    pub fn array_finalize(&self, array: Option<Array>) -> Result<()> {
        let dir = handle_dir(array.as_ref().map(Array::dir));
        logged("array_finalize", &dir, self.objects.array_finalize(array))
    }

    /// Open an array for reading behind an iterator
    ///
    /// `buffers` holds one read window per projected attribute.
    pub fn array_iterator_init<P: AsRef<Path>>(
        &self,
        dir: P,
        range: Option<&[(i64, i64)]>,
        attributes: Option<&[&str]>,
        buffers: Vec<Vec<u8>>,
    ) -> Result<ArrayIterator> {
        let dir = dir.as_ref();
        logged(
            "array_iterator_init",
            dir,
            self.objects.array_iterator_init(dir, range, attributes, buffers),
        )
    }

    pub fn array_iterator_finalize(&self, iterator: Option<ArrayIterator>) -> Result<()> {
        let dir = handle_dir(iterator.as_ref().map(|it| it.array().dir()));
        logged(
            "array_iterator_finalize",
            &dir,
            self.objects.array_iterator_finalize(iterator),
        )
    }

    // Metadata

    pub fn metadata_create(&self, schema: &Schema) -> Result<()> {
        logged(
            "metadata_create",
            schema.dir(),
            self.containers.create_metadata(schema),
        )
        .map(|_| ())
    }

    pub fn metadata_load_schema<P: AsRef<Path>>(&self, dir: P) -> Result<Schema> {
        let dir = dir.as_ref();
        logged(
            "metadata_load_schema",
            dir,
            self.objects.load_schema(dir, NodeKind::Metadata),
        )
        .map(|(_, schema)| schema)
    }

    pub fn metadata_init<P: AsRef<Path>>(
        &self,
        dir: P,
        mode: MetadataMode,
        attributes: Option<&[&str]>,
    ) -> Result<Metadata> {
        let dir = dir.as_ref();
        logged(
            "metadata_init",
            dir,
            self.objects.metadata_init(dir, mode, attributes),
        )
    }

    /// Stage values for a batch of keys
    ///
    /// `keys` is a packed buffer of NUL-terminated keys (see [`pack_keys`]).
    pub fn metadata_write(
        &self,
        metadata: Option<&mut Metadata>,
        keys: &[u8],
        buffers: &[&[u8]],
    ) -> Result<()> {
        let dir = handle_dir(metadata.as_deref().map(Metadata::dir));
        logged(
            "metadata_write",
            &dir,
            self.objects.metadata_write(metadata, keys, buffers),
        )
    }

    /// Look up one key, returning the bytes filled per buffer
    pub fn metadata_read(
        &self,
        metadata: Option<&mut Metadata>,
        key: &str,
        buffers: &mut [&mut [u8]],
    ) -> Result<Vec<usize>> {
        let dir = handle_dir(metadata.as_deref().map(Metadata::dir));
        logged(
            "metadata_read",
            &dir,
            self.objects.metadata_read(metadata, key, buffers),
        )
    }

    pub fn metadata_finalize(&self, metadata: Option<Metadata>) -> Result<()> {
        let dir = handle_dir(metadata.as_ref().map(Metadata::dir));
        logged("metadata_finalize", &dir, self.objects.metadata_finalize(metadata))
    }

    pub fn metadata_iterator_init<P: AsRef<Path>>(
        &self,
        dir: P,
        attributes: Option<&[&str]>,
        buffers: Vec<Vec<u8>>,
    ) -> Result<MetadataIterator> {
        let dir = dir.as_ref();
        logged(
            "metadata_iterator_init",
            dir,
            self.objects.metadata_iterator_init(dir, attributes, buffers),
        )
    }

    pub fn metadata_iterator_finalize(&self, iterator: Option<MetadataIterator>) -> Result<()> {
        let dir = handle_dir(iterator.as_ref().map(|it| it.metadata().dir()));
        logged(
            "metadata_iterator_finalize",
            &dir,
            self.objects.metadata_iterator_finalize(iterator),
        )
    }

    // Common

    /// Kind of the container at `path`, if any
    pub fn classify<P: AsRef<Path>>(&self, path: P) -> Result<Option<NodeKind>> {
        let path = path.as_ref();
        let result = node::normalize_path(path).and_then(|dir| node::classify(&dir));
        logged("classify", path, result)
    }

    /// Not supported yet
    pub fn clear<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        logged("clear", path.as_ref(), Err(StorageError::Unsupported("clear")))
    }

    /// Not supported yet
    pub fn delete_entire<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        logged(
            "delete_entire",
            path.as_ref(),
            Err(StorageError::Unsupported("delete_entire")),
        )
    }

    /// Not supported yet
    pub fn move_dir<P: AsRef<Path>, Q: AsRef<Path>>(&self, from: P, _to: Q) -> Result<()> {
        logged(
            "move_dir",
            from.as_ref(),
            Err(StorageError::Unsupported("move_dir")),
        )
    }
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::with_config(StorageConfig::default())
    }
}

fn logged<T>(operation: &str, path: &Path, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        error!("{} failed for {:?}: {}", operation, path, e);
    }
    result
}

fn handle_dir(dir: Option<&Path>) -> std::path::PathBuf {
    dir.map(Path::to_path_buf).unwrap_or_default()
}
