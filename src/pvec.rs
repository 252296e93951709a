//! Persistent numeric vector
//!
//! A fixed-length array of `f64` values backed by a shared memory mapping.
//! `get` and `set` go straight through the mapping with no syscalls, so the
//! vector is cheap enough to persist hot counters (the block store keeps its
//! three metadata slots in one). Values are stored in host byte order; the
//! file is not portable across architectures.

use crate::{Result, StrataError};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

const CELL_SIZE: usize = std::mem::size_of::<f64>();

/// File-backed vector of 64-bit floats
pub struct PVec {
    path: PathBuf,
    len: usize,
    file: File,
    mmap: MmapMut,
}

impl PVec {
    /// Open a vector of `len` cells at `path`, creating the file if absent
    /// and zero-growing it to `len * 8` bytes.
    pub fn open(path: &Path, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(StrataError::Config(
                "persistent vector length must be positive".to_string(),
            ));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let size = (len * CELL_SIZE) as u64;
        if file.metadata()?.len() < size {
            // set_len zero-fills the gap
            file.set_len(size)?;
        }

        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            path: path.to_path_buf(),
            len,
            file,
            mmap,
        })
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the vector has no cells
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the value at `index`.
    ///
    /// Panics if `index` is out of range.
    pub fn get(&self, index: usize) -> f64 {
        assert!(index < self.len, "index {} out of range", index);
        let mut raw = [0u8; CELL_SIZE];
        let offset = index * CELL_SIZE;
        raw.copy_from_slice(&self.mmap[offset..offset + CELL_SIZE]);
        f64::from_ne_bytes(raw)
    }

    /// Write `value` at `index`, persisting through the mapping.
    ///
    /// Panics if `index` is out of range.
    pub fn set(&mut self, index: usize, value: f64) {
        assert!(index < self.len, "index {} out of range", index);
        let offset = index * CELL_SIZE;
        self.mmap[offset..offset + CELL_SIZE].copy_from_slice(&value.to_ne_bytes());
    }

    /// Resize to `new_len` cells: unmap, grow the file if needed, remap.
    ///
    /// Shrinking only reduces the logical length; excess bytes stay on disk.
    pub fn resize(&mut self, new_len: usize) -> Result<()> {
        if new_len == 0 {
            return Err(StrataError::Config(
                "persistent vector length must be positive".to_string(),
            ));
        }

        self.mmap.flush()?;

        let size = (new_len * CELL_SIZE) as u64;
        if self.file.metadata()?.len() < size {
            self.file.set_len(size)?;
        }

        self.mmap = unsafe { MmapMut::map_mut(&self.file)? };
        self.len = new_len;

        Ok(())
    }

    /// Flush outstanding writes to disk
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }
}
