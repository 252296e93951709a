//! StrataDB - fixed-schema time-series storage engine
//!
//! StrataDB partitions time into fixed-duration buckets. Within a bucket,
//! a tag-tree index maps ordered tag tuples to record slots, and each
//! record is a dense run of equally-sized payload cells addressed by time
//! offset. Writes overwrite one cell; reads return contiguous cell ranges;
//! finds return every series matching a wildcard-tolerant tag pattern.
//!
//! # Architecture
//!
//! - **Database controller**: resolves timestamps to buckets, keeps a
//!   bounded hot (read-write) and cold (read-only) tier in memory, and
//!   evicts the oldest bucket to a background closer when a tier is full
//! - **Bucket**: one time window coupling a tag index and a block store
//! - **Tag index**: persistent append-only tree from tag tuples to record
//!   positions, rebuilt by replaying its log on open
//! - **Block store**: segmented, preallocated, memory-mapped record files
//!   with constant-time cell writes and background segment preallocation
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stratadb::{Clock, Database, DatabaseConfig, SystemClock};
//!
//! fn main() -> stratadb::Result<()> {
//!     let clock: Arc<dyn Clock> = Arc::new(SystemClock);
//!     let db = Database::open(DatabaseConfig::default(), clock)?;
//!
//!     let tags: Vec<String> = ["app", "cpu", "host-1", "us-east"]
//!         .iter()
//!         .map(|s| s.to_string())
//!         .collect();
//!
//!     let now = 1_700_000_000_000_000_000;
//!     db.put(now, &tags, &[0u8; 16])?;
//!
//!     let payloads = db.get(now, now + 60_000_000_000, &tags)?;
//!     println!("read {} cells", payloads.len());
//!
//!     db.close()
//! }
//! ```

pub mod block;
pub mod bucket;
pub mod clock;
pub mod database;
pub mod index;
pub mod pvec;
pub mod queue;

mod error;
mod types;

pub use error::{Result, StrataError};
pub use types::{Position, Timestamp};

pub use bucket::{Bucket, BucketConfig};
pub use clock::{Clock, ManualClock, SystemClock};
pub use database::{Database, DatabaseConfig, DatabaseStats};
pub use index::{IndexEntry, TagIndex};
pub use pvec::PVec;
pub use queue::EvictionQueue;

/// StrataDB version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Records per segment file
    pub const DEFAULT_SEGMENT_SIZE: usize = 10_000;

    /// Read-write buckets held in memory
    pub const DEFAULT_MAX_HOT_BUCKETS: usize = 2;

    /// Read-only buckets held in memory
    pub const DEFAULT_MAX_COLD_BUCKETS: usize = 4;

    /// Growth step for index log files (10 MiB)
    pub const INDEX_GROW_STEP: u64 = 10 * 1024 * 1024;

    /// Chunk size when zero-filling segment files (5 MiB)
    pub const SEGMENT_FILL_CHUNK: usize = 5 * 1024 * 1024;
}
