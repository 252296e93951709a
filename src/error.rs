//! Error types for StrataDB

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for StrataDB operations
pub type Result<T> = std::result::Result<T, StrataError>;

/// StrataDB error types
#[derive(Error, Debug)]
pub enum StrataError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Invalid data format
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// Timestamp in the future or inverted range
    #[error("timestamp is in the future or the range is invalid")]
    InvalidTimestamp,

    /// Wrong tag arity or empty tag component on a write
    #[error("invalid tag values")]
    InvalidTags,

    /// Payload length does not match the configured payload size
    #[error("invalid payload size")]
    InvalidPayload,

    /// Cold bucket has no directory on disk
    #[error("bucket does not exist on disk")]
    BucketNotOnDisk,

    /// Write operation on a read-only bucket or block
    #[error("write operation on a read-only bucket")]
    WriteOnReadOnly,

    /// Eviction queue already holds the key
    #[error("key already exists")]
    KeyExists,

    /// Eviction queue does not hold the key
    #[error("key does not exist")]
    KeyMissing,

    /// Segment file found where a new one should be created
    #[error("segment file already exists at {0:?}")]
    SegmentExists(PathBuf),

    /// Segment referenced by a record position is not loaded
    #[error("segment {0} is not loaded")]
    SegmentMissing(u64),

    /// Record allocation could not make room
    #[error("could not allocate space for a new record")]
    AllocationFailed,

    /// Fewer bytes written than requested
    #[error("incorrect number of bytes written")]
    ShortWrite,

    /// Fewer bytes read than requested
    #[error("incorrect number of bytes read")]
    ShortRead,

    /// Retention cut-off intersects the hot window
    #[error("cannot remove buckets in the hot window")]
    CannotRemoveHotBucket,

    /// Operation on an already-closed handle
    #[error("operation on a closed handle")]
    Closed,
}
