//! Array and metadata schemas
//!
//! A [`Schema`] describes the attributes (and, for arrays, the dimensions) of
//! a storage object. The same type fills both on-disk schema slots; its
//! [`SchemaRole`] says which one.

use crate::error::{Result, StorageError};
use crate::node::NodeKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Cell value type of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Datatype {
    Char,
    Int8,
    UInt8,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl Datatype {
    /// Size of one cell in bytes
    pub fn size(self) -> usize {
        match self {
            Datatype::Char | Datatype::Int8 | Datatype::UInt8 => 1,
            Datatype::Int32 | Datatype::Float32 => 4,
            Datatype::Int64 | Datatype::Float64 => 8,
        }
    }
}

/// Linearization order of cells inside the domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CellOrder {
    #[default]
    RowMajor,
    ColMajor,
}

/// Which schema slot a schema is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaRole {
    Array,
    Metadata,
}

impl SchemaRole {
    pub fn node_kind(self) -> NodeKind {
        match self {
            SchemaRole::Array => NodeKind::Array,
            SchemaRole::Metadata => NodeKind::Metadata,
        }
    }
}

/// Named, typed attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub datatype: Datatype,
}

impl Attribute {
    pub fn new(name: impl Into<String>, datatype: Datatype) -> Self {
        Attribute {
            name: name.into(),
            datatype,
        }
    }

    pub fn cell_size(&self) -> usize {
        self.datatype.size()
    }
}

/// Integer dimension with an inclusive domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub low: i64,
    pub high: i64,
}

impl Dimension {
    pub fn new(name: impl Into<String>, low: i64, high: i64) -> Self {
        Dimension {
            name: name.into(),
            low,
            high,
        }
    }

    /// Number of coordinates in the domain
    ///
    /// `None` for an inverted domain or one wider than `u64::MAX` cells.
    pub fn extent(&self) -> Option<u64> {
        span_extent(self.low, self.high)
    }

    pub fn contains(&self, coord: i64) -> bool {
        coord >= self.low && coord <= self.high
    }
}

/// Cells in the inclusive span `[low, high]`, if it is non-empty and fits a `u64`
pub fn span_extent(low: i64, high: i64) -> Option<u64> {
    if low > high {
        return None;
    }
    u64::try_from(i128::from(high) - i128::from(low) + 1).ok()
}

/// Structural description of an array or metadata object
///
/// # Examples
///
/// ```
/// use tilestore::{Attribute, Datatype, Dimension, Schema};
///
/// let schema = Schema::array(
///     "/data/ws1/dense",
///     vec![Attribute::new("a1", Datatype::Int32)],
///     vec![Dimension::new("rows", 0, 3), Dimension::new("cols", 0, 3)],
/// ).unwrap();
///
/// assert_eq!(schema.cell_count(), 16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Object directory; its parent decides containment
    pub name: String,

    pub role: SchemaRole,

    pub attributes: Vec<Attribute>,

    /// Empty for metadata schemas, whose key space is the string key
    pub dimensions: Vec<Dimension>,

    pub cell_order: CellOrder,
}

impl Schema {
    /// Attribute and dimension names: identifier-like, reserved `__` prefix excluded
    const NAME_PATTERN: &'static str = r"^[A-Za-z][A-Za-z0-9_]*$";

    /// Build and validate an array schema
    pub fn array(
        name: impl Into<String>,
        attributes: Vec<Attribute>,
        dimensions: Vec<Dimension>,
    ) -> Result<Self> {
        let schema = Schema {
            name: name.into(),
            role: SchemaRole::Array,
            attributes,
            dimensions,
            cell_order: CellOrder::RowMajor,
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Build and validate a metadata schema
    pub fn metadata(name: impl Into<String>, attributes: Vec<Attribute>) -> Result<Self> {
        let schema = Schema {
            name: name.into(),
            role: SchemaRole::Metadata,
            attributes,
            dimensions: Vec::new(),
            cell_order: CellOrder::RowMajor,
        };
        schema.validate()?;
        Ok(schema)
    }

    pub fn with_cell_order(mut self, cell_order: CellOrder) -> Self {
        self.cell_order = cell_order;
        self
    }

    /// Check structural consistency
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(StorageError::Schema("schema name cannot be empty".to_string()));
        }

        if self.attributes.is_empty() {
            return Err(StorageError::Schema(format!(
                "schema '{}' must define at least one attribute",
                self.name
            )));
        }

        let pattern = Regex::new(Self::NAME_PATTERN)
            .map_err(|e| StorageError::Schema(format!("name pattern: {}", e)))?;
        let mut seen = HashSet::new();
        let names = self
            .attributes
            .iter()
            .map(|a| a.name.as_str())
            .chain(self.dimensions.iter().map(|d| d.name.as_str()));
        for name in names {
            if !pattern.is_match(name) {
                return Err(StorageError::Schema(format!(
                    "invalid attribute or dimension name '{}'",
                    name
                )));
            }
            if !seen.insert(name) {
                return Err(StorageError::Schema(format!("duplicate name '{}'", name)));
            }
        }

        match self.role {
            SchemaRole::Metadata => {
                if !self.dimensions.is_empty() {
                    return Err(StorageError::Schema(format!(
                        "metadata schema '{}' cannot define dimensions",
                        self.name
                    )));
                }
            }
            SchemaRole::Array => {
                if self.dimensions.is_empty() {
                    return Err(StorageError::Schema(format!(
                        "array schema '{}' must define at least one dimension",
                        self.name
                    )));
                }
                let mut cells: u64 = 1;
                for dim in &self.dimensions {
                    if dim.low > dim.high {
                        return Err(StorageError::Schema(format!(
                            "dimension '{}' has inverted domain [{}, {}]",
                            dim.name, dim.low, dim.high
                        )));
                    }
                    cells = dim
                        .extent()
                        .and_then(|extent| cells.checked_mul(extent))
                        .ok_or_else(|| {
                            StorageError::Schema(format!(
                                "domain of '{}' is too large",
                                self.name
                            ))
                        })?;
                }
                let widest = self.attributes.iter().map(Attribute::cell_size).max().unwrap_or(1);
                if cells.checked_mul(widest as u64).is_none() {
                    return Err(StorageError::Schema(format!(
                        "domain of '{}' is too large",
                        self.name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Object directory named by this schema
    pub fn dir(&self) -> &Path {
        Path::new(&self.name)
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    /// Resolve an attribute projection to schema indices
    ///
    /// `None` or an empty list selects every attribute in schema order.
    pub fn resolve_projection(&self, attributes: Option<&[&str]>) -> Result<Vec<usize>> {
        let names = match attributes {
            Some(names) if !names.is_empty() => names,
            _ => return Ok((0..self.attributes.len()).collect()),
        };

        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            let id = self.attribute_index(name).ok_or_else(|| {
                StorageError::Validation(format!(
                    "attribute '{}' is not defined in '{}'",
                    name, self.name
                ))
            })?;
            if ids.contains(&id) {
                return Err(StorageError::Validation(format!(
                    "attribute '{}' is selected twice",
                    name
                )));
            }
            ids.push(id);
        }
        Ok(ids)
    }

    /// Total cells in the domain (1 for metadata schemas)
    ///
    /// Only meaningful for a validated schema; an invalid domain counts as 0.
    pub fn cell_count(&self) -> u64 {
        self.dimensions
            .iter()
            .map(|d| d.extent().unwrap_or(0))
            .fold(1, u64::saturating_mul)
    }

    /// Human-readable dump
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| StorageError::Schema(format!("cannot render schema: {}", e)))
    }
}
