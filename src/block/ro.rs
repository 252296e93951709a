//! Read-only block store
//!
//! Same on-disk layout as the read-write flavor, opened without mappings:
//! `get` serves cell ranges with positioned reads, so many cold buckets can
//! stay open without holding large resident regions. All write operations
//! answer `WriteOnReadOnly`.

use super::{
    locate, BlockConfig, META_RECORD_COUNT, META_SEGMENT_COUNT, META_SEGMENT_SIZE, META_SLOTS,
};
use crate::pvec::PVec;
use crate::types::Position;
use crate::{Result, StrataError};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;

/// Read-only segmented block store
pub struct RoBlock {
    config: BlockConfig,
    record_size: usize,
    /// Effective records per segment, taken from metadata slot 0
    segment_size: usize,
    segments: HashMap<u64, File>,
    metadata: PVec,
}

impl RoBlock {
    /// Open the block in `config.dir`, opening every recorded segment file
    /// for reading.
    pub fn open(config: BlockConfig) -> Result<Self> {
        config.validate()?;

        let metadata = PVec::open(&config.metadata_path(), META_SLOTS)?;
        let stored = metadata.get(META_SEGMENT_SIZE) as usize;
        let segment_size = if stored > 0 { stored } else { config.segment_size };
        let record_size = config.record_size();

        let count = metadata.get(META_SEGMENT_COUNT) as u64;
        let mut segments = HashMap::with_capacity(count as usize);
        for segment_no in 1..=count {
            let path = config.segment_path(segment_no);
            let file = OpenOptions::new().read(true).open(&path)?;
            segments.insert(segment_no, file);
        }

        Ok(Self {
            config,
            record_size,
            segment_size,
            segments,
            metadata,
        })
    }

    /// Record allocation is a write; always fails
    pub fn new_record(&self) -> Result<Position> {
        Err(StrataError::WriteOnReadOnly)
    }

    /// Cell writes are writes; always fail
    pub fn put(&self, _position: Position, _cell: usize, _payload: &[u8]) -> Result<()> {
        Err(StrataError::WriteOnReadOnly)
    }

    /// Read cells `start..end` of a record with one positioned read
    pub fn get(&self, position: Position, start: usize, end: usize) -> Result<Vec<Vec<u8>>> {
        let payload_size = self.config.payload_size;
        let count = end.saturating_sub(start);
        if count == 0 {
            return Ok(Vec::new());
        }

        let (segment_no, slot) = locate(self.segment_size, position);
        let offset = slot * self.record_size + start * payload_size;
        let len = count * payload_size;

        let file = self
            .segments
            .get(&segment_no)
            .ok_or(StrataError::SegmentMissing(segment_no))?;

        let mut raw = vec![0u8; len];
        file.read_exact_at(&mut raw, offset as u64).map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                StrataError::ShortRead
            } else {
                StrataError::Io(err)
            }
        })?;

        Ok(raw.chunks_exact(payload_size).map(|c| c.to_vec()).collect())
    }

    /// Records allocated so far
    pub fn records_used(&self) -> u64 {
        self.metadata.get(META_RECORD_COUNT) as u64
    }

    /// Segment files allocated so far
    pub fn segments_allocated(&self) -> u64 {
        self.metadata.get(META_SEGMENT_COUNT) as u64
    }

    /// Nothing to flush; file handles close on drop
    pub fn close(&self) -> Result<()> {
        Ok(())
    }
}
