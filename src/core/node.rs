//! Namespace node classification
//!
//! Every container directory is tagged by a zero-length marker file. The
//! marker's presence is the only source of truth for a directory's kind.

use crate::error::{Result, StorageError};
use std::fs::{File, OpenOptions};
use std::path::{Component, Path, PathBuf};

pub const WORKSPACE_FILENAME: &str = "__tiledb_workspace.tdb";
pub const GROUP_FILENAME: &str = "__tiledb_group.tdb";
pub const ARRAY_FILENAME: &str = "__tiledb_array.tdb";
pub const METADATA_FILENAME: &str = "__tiledb_metadata.tdb";
pub const ARRAY_SCHEMA_FILENAME: &str = "__array_schema.tdb";
pub const METADATA_SCHEMA_FILENAME: &str = "__metadata_schema.tdb";

/// Kind of a namespace container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Workspace,
    Group,
    Array,
    Metadata,
}

impl NodeKind {
    pub const ALL: [NodeKind; 4] = [
        NodeKind::Workspace,
        NodeKind::Group,
        NodeKind::Array,
        NodeKind::Metadata,
    ];

    /// Marker file identifying this kind
    pub fn marker_filename(self) -> &'static str {
        match self {
            NodeKind::Workspace => WORKSPACE_FILENAME,
            NodeKind::Group => GROUP_FILENAME,
            NodeKind::Array => ARRAY_FILENAME,
            NodeKind::Metadata => METADATA_FILENAME,
        }
    }

    /// Schema slot of this kind, if it carries one
    pub fn schema_filename(self) -> Option<&'static str> {
        match self {
            NodeKind::Array => Some(ARRAY_SCHEMA_FILENAME),
            NodeKind::Metadata => Some(METADATA_SCHEMA_FILENAME),
            NodeKind::Workspace | NodeKind::Group => None,
        }
    }

    /// Parent kinds this kind may be created inside
    ///
    /// A workspace may only live in an unclassified directory, so its list is empty.
    pub fn allowed_parents(self) -> &'static [NodeKind] {
        match self {
            NodeKind::Workspace => &[],
            NodeKind::Group | NodeKind::Array => &[NodeKind::Workspace, NodeKind::Group],
            NodeKind::Metadata => &[NodeKind::Workspace, NodeKind::Group, NodeKind::Array],
        }
    }

    /// Check the containment rule against a classified parent
    pub fn may_be_contained_in(self, parent: Option<NodeKind>) -> bool {
        match (self, parent) {
            (NodeKind::Workspace, parent) => parent.is_none(),
            (_, None) => false,
            (kind, Some(parent)) => kind.allowed_parents().contains(&parent),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Workspace => "workspace",
            NodeKind::Group => "group",
            NodeKind::Array => "array",
            NodeKind::Metadata => "metadata",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a directory by its marker files
///
/// Returns `None` for a missing or unmarked directory.
pub fn classify(dir: &Path) -> Result<Option<NodeKind>> {
    let mut found = None;
    for kind in NodeKind::ALL {
        if dir.join(kind.marker_filename()).is_file() {
            if found.is_some() {
                return Err(StorageError::AmbiguousNode(dir.to_path_buf()));
            }
            found = Some(kind);
        }
    }
    Ok(found)
}

/// Make a path absolute and resolve `.`/`..` lexically
///
/// Symlinks are not followed; use [`real_dir`] for that.
pub fn normalize_path(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(StorageError::Validation("empty path".to_string()));
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// Parent of a normalized path; the root is its own parent
pub fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| path.to_path_buf())
}

/// Canonical form of an existing directory
pub fn real_dir(path: &Path) -> Result<PathBuf> {
    let normalized = normalize_path(path)?;
    std::fs::canonicalize(&normalized)
        .map_err(|_| StorageError::NotFound(format!("'{}' does not exist", normalized.display())))
}

/// Create a single directory level
///
/// The parent must already exist. An existing target is reported as
/// `AlreadyExists` so racing creators can tell they lost.
pub fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir(dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(dir.to_path_buf()),
        _ => StorageError::file(dir, format!("cannot create directory: {}", e)),
    })
}

/// Write the zero-length marker for `kind` into `dir`
pub fn create_marker(dir: &Path, kind: NodeKind, sync: bool) -> Result<()> {
    let filename = dir.join(kind.marker_filename());
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&filename)
        .map_err(|e| {
            StorageError::file(&filename, format!("cannot create {} marker: {}", kind, e))
        })?;

    if sync {
        file.sync_all().map_err(|e| {
            StorageError::file(&filename, format!("cannot sync {} marker: {}", kind, e))
        })?;
    }

    close_file(file, &filename)
}

/// Close a file and report the outcome
///
/// Dropping a `File` swallows close errors; on unix this surfaces them.
pub fn close_file(file: File, path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::io::IntoRawFd;

        let fd = file.into_raw_fd();
        // SAFETY: `into_raw_fd` handed over sole ownership of the descriptor
        if unsafe { libc::close(fd) } != 0 {
            return Err(StorageError::file(
                path,
                format!("cannot close file: {}", std::io::Error::last_os_error()),
            ));
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        drop(file);
    }
    Ok(())
}
