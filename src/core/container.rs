//! Container creation
//!
//! Creates workspace, group, array and metadata directories under the
//! containment rules of [`NodeKind::allowed_parents`]. Nothing is rolled back
//! when a late step fails; a half-built array or metadata directory simply
//! never receives its marker and stays unclassified.

use crate::codec::SchemaCodec;
use crate::config::StorageConfig;
use crate::error::{Result, StorageError};
use crate::node::{self, NodeKind};
use crate::schema::{Schema, SchemaRole};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Creates namespace containers on disk
pub struct ContainerEngine {
    config: Arc<StorageConfig>,
    codec: Arc<dyn SchemaCodec>,
}

impl ContainerEngine {
    pub fn new(config: Arc<StorageConfig>, codec: Arc<dyn SchemaCodec>) -> Self {
        ContainerEngine { config, codec }
    }

    /// Create a workspace; its parent must not be a container of any kind
    pub fn create_workspace(&self, path: &Path) -> Result<PathBuf> {
        self.create_plain(path, NodeKind::Workspace)
    }

    /// Create a group inside a workspace or another group
    pub fn create_group(&self, path: &Path) -> Result<PathBuf> {
        self.create_plain(path, NodeKind::Group)
    }

    /// Create an array directory and write its schema
    pub fn create_array(&self, schema: &Schema) -> Result<PathBuf> {
        self.create_with_schema(schema, SchemaRole::Array)
    }

    /// Create a metadata directory and write its schema
    pub fn create_metadata(&self, schema: &Schema) -> Result<PathBuf> {
        self.create_with_schema(schema, SchemaRole::Metadata)
    }

    fn create_plain(&self, path: &Path, kind: NodeKind) -> Result<PathBuf> {
        let dir = node::normalize_path(path)?;
        debug!("Creating {} at {:?}", kind, dir);

        self.check_containment(&dir, kind)?;
        node::create_dir(&dir)?;
        node::create_marker(&dir, kind, self.config.sync_writes)?;

        info!("Created {} {:?}", kind, dir);
        Ok(dir)
    }

    fn create_with_schema(&self, schema: &Schema, role: SchemaRole) -> Result<PathBuf> {
        let kind = role.node_kind();
        schema.validate()?;
        if schema.role != role {
            return Err(StorageError::Schema(format!(
                "cannot create {} from a {:?} schema",
                kind, schema.role
            )));
        }

        let dir = node::normalize_path(schema.dir())?;
        debug!("Creating {} at {:?}", kind, dir);

        self.check_containment(&dir, kind)?;

        let bytes = self.codec.encode(schema)?;
        if bytes.is_empty() {
            return Err(StorageError::Schema(format!(
                "codec produced an empty buffer for '{}'",
                schema.name
            )));
        }

        node::create_dir(&dir)?;

        let filename = match kind.schema_filename() {
            Some(name) => dir.join(name),
            None => return Err(StorageError::Schema(format!("{} has no schema slot", kind))),
        };
        self.write_schema_file(&filename, &bytes)?;

        // Marker last: only a complete schema makes the directory a container
        node::create_marker(&dir, kind, self.config.sync_writes)?;

        info!("Created {} {:?} ({} schema bytes)", kind, dir, bytes.len());
        Ok(dir)
    }

    fn check_containment(&self, dir: &Path, kind: NodeKind) -> Result<()> {
        let parent = node::parent_dir(dir);
        let parent_kind = node::classify(&parent)?;

        if kind.may_be_contained_in(parent_kind) {
            return Ok(());
        }

        let message = match kind {
            NodeKind::Workspace => format!(
                "workspace '{}' cannot be nested in another container ('{}' is a {})",
                dir.display(),
                parent.display(),
                parent_kind.map(NodeKind::as_str).unwrap_or("container")
            ),
            _ => format!(
                "cannot create {} '{}'; directory '{}' must be one of: {}",
                kind,
                dir.display(),
                parent.display(),
                kind.allowed_parents()
                    .iter()
                    .map(|k| k.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        };
        Err(StorageError::Containment(message))
    }

    /// Exclusive single-shot write of a schema buffer
    fn write_schema_file(&self, filename: &Path, bytes: &[u8]) -> Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        if self.config.sync_writes {
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(libc::O_SYNC);
        }

        let mut file = options
            .open(filename)
            .map_err(|e| StorageError::file(filename, format!("cannot open schema file: {}", e)))?;

        let written = file
            .write(bytes)
            .map_err(|e| StorageError::file(filename, format!("cannot write schema: {}", e)))?;
        if written != bytes.len() {
            return Err(StorageError::file(
                filename,
                format!("short schema write ({} of {} bytes)", written, bytes.len()),
            ));
        }

        if self.config.sync_writes {
            file.sync_all()
                .map_err(|e| StorageError::file(filename, format!("cannot sync schema: {}", e)))?;
        }

        node::close_file(file, filename)
    }
}
