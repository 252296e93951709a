//! Bucket - one fixed time window of data
//!
//! A bucket couples a tag index and a block store over the window
//! `[base_time, base_time + bucket_duration)`. Every timestamp in the
//! window maps to one payload cell of a record; every distinct tag vector
//! maps to one record. Hot buckets carry a read-write block, cold buckets
//! a read-only one.

use crate::block::{Block, BlockConfig};
use crate::index::{IndexEntry, TagIndex};
use crate::types::Timestamp;
use crate::{Result, StrataError};
use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Mode of bucket directories created on first use
const DIR_MODE: u32 = 0o744;

/// Bucket configuration
#[derive(Debug, Clone)]
pub struct BucketConfig {
    /// Database name, used to prefix bucket directories
    pub database_name: String,
    /// Root directory holding all bucket directories
    pub data_path: PathBuf,
    /// Depth of the tag index tree
    pub index_depth: usize,
    /// Payload cell size in bytes
    pub payload_size: usize,
    /// Bucket window length in nanoseconds, a multiple of `resolution`
    pub bucket_duration: i64,
    /// Cell width in nanoseconds
    pub resolution: i64,
    /// Records per block segment
    pub segment_size: usize,
    /// Open with a read-only block and reject writes
    pub read_only: bool,
    /// Base timestamp of the window, aligned to `bucket_duration`
    pub base_time: Timestamp,
}

impl BucketConfig {
    /// Directory of this bucket: `<data_path>/<database_name>_<base_time>`
    pub fn bucket_dir(&self) -> PathBuf {
        self.data_path
            .join(format!("{}_{}", self.database_name, self.base_time))
    }

    /// Payload cells per record
    pub fn payload_count(&self) -> usize {
        (self.bucket_duration / self.resolution) as usize
    }
}

/// One time window: a tag index plus a block store
pub struct Bucket {
    config: BucketConfig,
    index: TagIndex,
    block: Block,
    closed: AtomicBool,
}

impl Bucket {
    /// Open the bucket, creating its directory and files on first
    /// read-write use. A read-only open of a missing directory reports
    /// `BucketNotOnDisk` and creates nothing.
    pub fn open(config: BucketConfig) -> Result<Self> {
        let dir = config.bucket_dir();

        if !dir.exists() {
            if config.read_only {
                return Err(StrataError::BucketNotOnDisk);
            }
            DirBuilder::new()
                .recursive(true)
                .mode(DIR_MODE)
                .create(&dir)?;
        }

        let index = TagIndex::open(&dir.join("index"), config.index_depth)?;

        let block_config = BlockConfig {
            dir,
            payload_size: config.payload_size,
            payload_count: config.payload_count(),
            segment_size: config.segment_size,
        };
        let block = if config.read_only {
            Block::open_ro(block_config)?
        } else {
            Block::open_rw(block_config)?
        };

        info!(
            base = config.base_time,
            read_only = config.read_only,
            "opened bucket"
        );

        Ok(Self {
            config,
            index,
            block,
            closed: AtomicBool::new(false),
        })
    }

    /// Base timestamp of the window
    pub fn base_time(&self) -> Timestamp {
        self.config.base_time
    }

    /// Whether this bucket rejects writes
    pub fn read_only(&self) -> bool {
        self.config.read_only
    }

    /// Write one payload into the cell owned by `ts` for the series `tags`,
    /// allocating the record and index entry on first sight of the tags.
    pub fn put(&self, ts: Timestamp, tags: &[String], payload: &[u8]) -> Result<()> {
        self.ensure_open()?;
        if self.config.read_only {
            return Err(StrataError::WriteOnReadOnly);
        }

        let position = match self.index.get(tags) {
            Some(entry) => entry.position,
            None => {
                let position = self.block.new_record()?;
                self.index.add(tags.to_vec(), position)?.position
            }
        };

        self.block.put(position, self.cell_at(ts), payload)
    }

    /// Read the cells covering `[start, end)` for the series `tags`.
    ///
    /// Returns `None` when the tags are unknown to this bucket; the caller
    /// decides how to represent absent data.
    pub fn get(
        &self,
        start: Timestamp,
        end: Timestamp,
        tags: &[String],
    ) -> Result<Option<Vec<Vec<u8>>>> {
        self.ensure_open()?;

        let entry = match self.index.get(tags) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        self.block
            .get(entry.position, self.cell_at(start), self.cell_at(end))
            .map(Some)
    }

    /// Read the cells covering `[start, end)` for every series matching
    /// `pattern` (empty components are wildcards).
    pub fn find(
        &self,
        start: Timestamp,
        end: Timestamp,
        pattern: &[String],
    ) -> Result<Vec<(Arc<IndexEntry>, Vec<Vec<u8>>)>> {
        self.ensure_open()?;

        let entries = self.index.find(pattern);
        let mut results = Vec::with_capacity(entries.len());

        for entry in entries {
            let payloads =
                self.block
                    .get(entry.position, self.cell_at(start), self.cell_at(end))?;
            results.push((entry, payloads));
        }

        Ok(results)
    }

    /// Flush index and block state. Close is final: every later operation,
    /// including a second close, fails with `Closed`.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(StrataError::Closed);
        }

        self.index.close()?;
        self.block.close()?;

        info!(base = self.config.base_time, "closed bucket");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StrataError::Closed);
        }
        Ok(())
    }

    /// Cell index owned by `ts` inside this window
    fn cell_at(&self, ts: Timestamp) -> usize {
        ((ts - self.config.base_time) / self.config.resolution) as usize
    }
}
