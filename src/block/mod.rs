//! Segmented payload block stores
//!
//! A block stores fixed-size records, each a dense run of equally-sized
//! payload cells. Records live in numbered segment files preallocated to
//! their full size, so cell writes are plain memory copies into a mapping.
//! The read-write flavor backs hot buckets; the read-only flavor serves
//! cold buckets through ordinary file reads to keep resident memory small.

mod ro;
mod rw;

pub use ro::RoBlock;
pub use rw::RwBlock;

use crate::types::Position;
use crate::{Result, StrataError};
use std::path::PathBuf;

/// Number of metadata slots in a block's metadata file
pub(crate) const META_SLOTS: usize = 3;

/// Metadata slot: records per segment
pub(crate) const META_SEGMENT_SIZE: usize = 0;

/// Metadata slot: segments allocated to date
pub(crate) const META_SEGMENT_COUNT: usize = 1;

/// Metadata slot: records used so far
pub(crate) const META_RECORD_COUNT: usize = 2;

/// Block store configuration
#[derive(Debug, Clone)]
pub struct BlockConfig {
    /// Directory holding the metadata and segment files
    pub dir: PathBuf,
    /// Payload cell size in bytes
    pub payload_size: usize,
    /// Payload cells per record
    pub payload_count: usize,
    /// Records per segment file
    pub segment_size: usize,
}

impl BlockConfig {
    /// Size of one record in bytes
    pub fn record_size(&self) -> usize {
        self.payload_size * self.payload_count
    }

    pub(crate) fn metadata_path(&self) -> PathBuf {
        self.dir.join("metadata")
    }

    pub(crate) fn segment_path(&self, segment_no: u64) -> PathBuf {
        self.dir.join(format!("block_{}", segment_no))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.payload_size == 0 || self.payload_count == 0 || self.segment_size == 0 {
            return Err(StrataError::Config(
                "block payload size, payload count and segment size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Locate a record: segment number (1-indexed) and slot within the segment
pub(crate) fn locate(segment_size: usize, position: Position) -> (u64, usize) {
    let position = position as usize;
    (1 + (position / segment_size) as u64, position % segment_size)
}

/// A block store of either flavor
pub enum Block {
    /// Fully mapped, writable store for hot buckets
    ReadWrite(RwBlock),
    /// `pread`-backed store for cold buckets
    ReadOnly(RoBlock),
}

impl Block {
    /// Open a read-write block in `config.dir`
    pub fn open_rw(config: BlockConfig) -> Result<Self> {
        RwBlock::open(config).map(Block::ReadWrite)
    }

    /// Open a read-only block in `config.dir`
    pub fn open_ro(config: BlockConfig) -> Result<Self> {
        RoBlock::open(config).map(Block::ReadOnly)
    }

    /// Allocate the next record slot
    pub fn new_record(&self) -> Result<Position> {
        match self {
            Block::ReadWrite(block) => block.new_record(),
            Block::ReadOnly(block) => block.new_record(),
        }
    }

    /// Write one payload cell of a record
    pub fn put(&self, position: Position, cell: usize, payload: &[u8]) -> Result<()> {
        match self {
            Block::ReadWrite(block) => block.put(position, cell, payload),
            Block::ReadOnly(block) => block.put(position, cell, payload),
        }
    }

    /// Read payload cells `start..end` of a record
    pub fn get(&self, position: Position, start: usize, end: usize) -> Result<Vec<Vec<u8>>> {
        match self {
            Block::ReadWrite(block) => block.get(position, start, end),
            Block::ReadOnly(block) => block.get(position, start, end),
        }
    }

    /// Whether this block rejects writes
    pub fn read_only(&self) -> bool {
        matches!(self, Block::ReadOnly(_))
    }

    /// Records allocated so far
    pub fn records_used(&self) -> u64 {
        match self {
            Block::ReadWrite(block) => block.records_used(),
            Block::ReadOnly(block) => block.records_used(),
        }
    }

    /// Segment files allocated so far
    pub fn segments_allocated(&self) -> u64 {
        match self {
            Block::ReadWrite(block) => block.segments_allocated(),
            Block::ReadOnly(block) => block.segments_allocated(),
        }
    }

    /// Flush outstanding writes; resources are released on drop
    pub fn close(&self) -> Result<()> {
        match self {
            Block::ReadWrite(block) => block.close(),
            Block::ReadOnly(block) => block.close(),
        }
    }
}
