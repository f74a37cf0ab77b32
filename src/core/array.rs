//! Array handle
//!
//! A dense cell store: every attribute lives in `<attribute>.tdb` inside the
//! array directory, one fixed-size cell per domain coordinate, linearized in
//! the schema's cell order. Cells that were never written read back as zeros.

use crate::error::{Result, StorageError};
use crate::schema::{span_extent, CellOrder, Schema};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Inclusive `(low, high)` bounds, one pair per dimension
pub type Subarray = Vec<(i64, i64)>;

/// Open mode of an array handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayMode {
    Read,
    Write,
}

/// Open array bound to its schema
///
/// Owned by exactly one caller. [`Array::finalize`] consumes the handle, so a
/// closed array cannot be touched again.
#[derive(Debug)]
pub struct Array {
    schema: Schema,
    dir: PathBuf,
    mode: ArrayMode,
    /// Schema indices of the projected attributes
    attribute_ids: Vec<usize>,
    /// One per projected attribute; `None` for a never-written attribute in read mode
    files: Vec<Option<File>>,
    range: Subarray,
    /// Coordinates per dimension of the full domain
    domain_extents: Vec<u64>,
    /// Coordinates per dimension of `range`
    range_extents: Vec<u64>,
    /// Cells of `range` already read or written
    cursor: u64,
    sync: bool,
}

impl Array {
    /// Open an array directory whose schema is already loaded
    pub fn init(
        dir: &Path,
        schema: Schema,
        mode: ArrayMode,
        attributes: Option<&[&str]>,
        range: Option<&[(i64, i64)]>,
        sync: bool,
    ) -> Result<Self> {
        let attribute_ids = schema
            .resolve_projection(attributes)
            .map_err(|e| StorageError::Array(e.to_string()))?;
        let domain_extents = extents(schema.dimensions.iter().map(|d| (d.low, d.high)))?;
        let range = check_range(&schema, range)?;
        let range_extents = extents(range.iter().copied())?;

        let mut files = Vec::with_capacity(attribute_ids.len());
        for &id in &attribute_ids {
            let path = attribute_path(dir, &schema.attributes[id].name);
            let file = match mode {
                ArrayMode::Write => OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(&path)
                    .map(Some),
                ArrayMode::Read => match File::open(&path) {
                    Ok(file) => Ok(Some(file)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(e),
                },
            }
            .map_err(|e| StorageError::Array(format!("cannot open {:?}: {}", path, e)))?;
            files.push(file);
        }

        debug!(
            "Opened array {:?} in {:?} mode with {} attribute(s)",
            dir,
            mode,
            attribute_ids.len()
        );

        Ok(Array {
            schema,
            dir: dir.to_path_buf(),
            mode,
            attribute_ids,
            files,
            range,
            domain_extents,
            range_extents,
            cursor: 0,
            sync,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn mode(&self) -> ArrayMode {
        self.mode
    }

    pub fn range(&self) -> &[(i64, i64)] {
        &self.range
    }

    /// Names of the projected attributes, in buffer order
    pub fn attribute_names(&self) -> Vec<&str> {
        self.attribute_ids
            .iter()
            .map(|&id| self.schema.attributes[id].name.as_str())
            .collect()
    }

    /// Cell size of each projected attribute, in buffer order
    pub fn cell_sizes(&self) -> Vec<usize> {
        self.attribute_ids
            .iter()
            .map(|&id| self.schema.attributes[id].cell_size())
            .collect()
    }

    /// Cells in the current range
    pub fn range_cells(&self) -> u64 {
        self.range_extents.iter().product()
    }

    /// Cells of the range not yet read or written
    pub fn remaining_cells(&self) -> u64 {
        self.range_cells() - self.cursor
    }

    /// Append cells to the range, one buffer per projected attribute
    pub fn write(&mut self, buffers: &[&[u8]]) -> Result<()> {
        if self.mode != ArrayMode::Write {
            return Err(StorageError::Array(format!(
                "array {:?} is not open for writing",
                self.dir
            )));
        }
        self.check_buffer_count(buffers.len())?;

        let cell_sizes = self.cell_sizes();
        let mut cells = None;
        for (i, (buffer, &size)) in buffers.iter().zip(&cell_sizes).enumerate() {
            if buffer.len() % size != 0 {
                return Err(StorageError::Array(format!(
                    "buffer {} holds {} bytes, not a multiple of the {}-byte cell",
                    i,
                    buffer.len(),
                    size
                )));
            }
            let count = (buffer.len() / size) as u64;
            match cells {
                None => cells = Some(count),
                Some(expected) if expected != count => {
                    return Err(StorageError::Array(format!(
                        "buffer {} holds {} cells, expected {}",
                        i, count, expected
                    )));
                }
                Some(_) => {}
            }
        }

        let cells = cells.unwrap_or(0);
        if cells > self.remaining_cells() {
            return Err(StorageError::Array(format!(
                "write of {} cells overflows the range ({} cells left)",
                cells,
                self.remaining_cells()
            )));
        }

        for slot in 0..buffers.len() {
            let size = cell_sizes[slot];
            for k in 0..cells {
                let offset = self.cell_index(self.cursor + k) * size as u64;
                let start = k as usize * size;
                let file = self.files[slot]
                    .as_mut()
                    .ok_or_else(|| StorageError::Array("attribute file is not open".to_string()))?;
                file.seek(SeekFrom::Start(offset))
                    .and_then(|_| file.write_all(&buffers[slot][start..start + size]))
                    .map_err(|e| StorageError::Array(format!("cell write failed: {}", e)))?;
            }
        }

        self.cursor += cells;
        Ok(())
    }

    /// Read the next cells of the range into the buffers
    ///
    /// Every buffer receives the same number of cells, as many as fit in the
    /// tightest one. Returns the bytes filled per buffer; all zeros once the
    /// range is exhausted.
    pub fn read(&mut self, buffers: &mut [&mut [u8]]) -> Result<Vec<usize>> {
        if self.mode != ArrayMode::Read {
            return Err(StorageError::Array(format!(
                "array {:?} is not open for reading",
                self.dir
            )));
        }
        self.check_buffer_count(buffers.len())?;

        let cell_sizes = self.cell_sizes();
        let remaining = self.remaining_cells();
        if remaining == 0 {
            return Ok(vec![0; buffers.len()]);
        }

        let fit = buffers
            .iter()
            .zip(&cell_sizes)
            .map(|(buffer, &size)| (buffer.len() / size) as u64)
            .min()
            .unwrap_or(0);
        if fit == 0 {
            return Err(StorageError::Array(
                "read buffers cannot hold a single cell".to_string(),
            ));
        }
        let cells = fit.min(remaining);

        for (slot, buffer) in buffers.iter_mut().enumerate() {
            let size = cell_sizes[slot];
            for k in 0..cells {
                let offset = self.cell_index(self.cursor + k) * size as u64;
                let start = k as usize * size;
                let cell = &mut buffer[start..start + size];
                match self.files[slot].as_mut() {
                    Some(file) => read_cell(file, offset, cell)
                        .map_err(|e| StorageError::Array(format!("cell read failed: {}", e)))?,
                    None => cell.fill(0),
                }
            }
        }

        self.cursor += cells;
        Ok(cell_sizes.iter().map(|&size| cells as usize * size).collect())
    }

    /// Scope the handle to a new range and restart from its first cell
    pub fn reinit_subarray(&mut self, range: Option<&[(i64, i64)]>) -> Result<()> {
        let range = check_range(&self.schema, range)?;
        self.range_extents = extents(range.iter().copied())?;
        self.range = range;
        self.cursor = 0;
        debug!("Array {:?} re-scoped to {:?}", self.dir, self.range);
        Ok(())
    }

    /// Flush pending writes and close the handle
    pub fn finalize(self) -> Result<()> {
        if self.mode == ArrayMode::Write && self.sync {
            for file in self.files.iter().flatten() {
                if let Err(e) = file.sync_all() {
                    warn!("Failed to sync array {:?}: {}", self.dir, e);
                    return Err(StorageError::Array(format!(
                        "cannot sync array {:?}: {}",
                        self.dir, e
                    )));
                }
            }
        }
        debug!("Finalized array {:?}", self.dir);
        Ok(())
    }

    fn check_buffer_count(&self, count: usize) -> Result<()> {
        if count != self.attribute_ids.len() {
            return Err(StorageError::Array(format!(
                "expected {} buffer(s), got {}",
                self.attribute_ids.len(),
                count
            )));
        }
        Ok(())
    }

    /// Domain-linear index of the `position`-th cell of the range
    fn cell_index(&self, mut position: u64) -> u64 {
        let dims = &self.schema.dimensions;
        let order: Vec<usize> = match self.schema.cell_order {
            CellOrder::RowMajor => (0..dims.len()).collect(),
            CellOrder::ColMajor => (0..dims.len()).rev().collect(),
        };

        // Split the position into per-dimension domain offsets, fastest dimension first
        let mut offsets = vec![0u64; dims.len()];
        for &d in order.iter().rev() {
            let extent = self.range_extents[d];
            offsets[d] = self.range[d].0.abs_diff(dims[d].low) + position % extent;
            position /= extent;
        }

        order
            .iter()
            .fold(0u64, |index, &d| index * self.domain_extents[d] + offsets[d])
    }
}

fn attribute_path(dir: &Path, attribute: &str) -> PathBuf {
    dir.join(format!("{}.tdb", attribute))
}

/// Coordinates per dimension of validated inclusive spans
fn extents(spans: impl Iterator<Item = (i64, i64)>) -> Result<Vec<u64>> {
    spans
        .map(|(low, high)| {
            span_extent(low, high).ok_or_else(|| {
                StorageError::Array(format!("span [{}, {}] has no u64 cell count", low, high))
            })
        })
        .collect()
}

/// Validate a range against the schema domain; `None` is the whole domain
fn check_range(schema: &Schema, range: Option<&[(i64, i64)]>) -> Result<Subarray> {
    let Some(range) = range else {
        return Ok(schema.dimensions.iter().map(|d| (d.low, d.high)).collect());
    };

    if range.len() != schema.dimensions.len() {
        return Err(StorageError::Array(format!(
            "range has {} dimension(s), schema '{}' has {}",
            range.len(),
            schema.name,
            schema.dimensions.len()
        )));
    }

    for (&(low, high), dim) in range.iter().zip(&schema.dimensions) {
        if low > high {
            return Err(StorageError::Array(format!(
                "range [{}, {}] on '{}' is inverted",
                low, high, dim.name
            )));
        }
        if !dim.contains(low) || !dim.contains(high) {
            return Err(StorageError::Array(format!(
                "range [{}, {}] leaves the domain [{}, {}] of '{}'",
                low, high, dim.low, dim.high, dim.name
            )));
        }
    }

    Ok(range.to_vec())
}

/// Read one cell, zero-filling whatever lies past the end of the file
fn read_cell(file: &mut File, offset: u64, cell: &mut [u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    let mut filled = 0;
    while filled < cell.len() {
        match file.read(&mut cell[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    cell[filled..].fill(0);
    Ok(())
}
