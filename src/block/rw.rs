//! Read-write block store
//!
//! Segment files are preallocated to their full size, memory-mapped, and
//! optionally locked in RAM, so `put` and `get` are plain memory copies
//! with no syscalls on the hot path. Record allocation persists its
//! counters through the metadata vector and keeps at least half a segment
//! of free records ahead of demand.

use super::{
    locate, BlockConfig, META_RECORD_COUNT, META_SEGMENT_COUNT, META_SEGMENT_SIZE, META_SLOTS,
};
use crate::pvec::PVec;
use crate::types::Position;
use crate::{Result, StrataError};
use memmap2::MmapMut;
use parking_lot::{Mutex, RwLock};
use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// Chunk size for zero-filling new segment files
const FILL_CHUNK: usize = crate::config::SEGMENT_FILL_CHUNK;

/// Shared read-write mapping of one segment file.
///
/// Writers go through `&self`; callers must never touch overlapping byte
/// ranges concurrently. The allocator hands out distinct record positions
/// and the controller dispatches one writer per (bucket, series), so every
/// concurrent writer owns a disjoint range.
struct SegmentMap {
    mmap: UnsafeCell<MmapMut>,
}

unsafe impl Send for SegmentMap {}
unsafe impl Sync for SegmentMap {}

impl SegmentMap {
    fn new(mmap: MmapMut) -> Self {
        Self {
            mmap: UnsafeCell::new(mmap),
        }
    }

    fn len(&self) -> usize {
        unsafe { &*self.mmap.get() }.len()
    }

    fn write_at(&self, offset: usize, data: &[u8]) {
        let mmap = unsafe { &mut *self.mmap.get() };
        mmap[offset..offset + data.len()].copy_from_slice(data);
    }

    fn read_out(&self, offset: usize, len: usize) -> Vec<u8> {
        let mmap = unsafe { &*self.mmap.get() };
        mmap[offset..offset + len].to_vec()
    }

    fn lock_pages(&self) -> std::io::Result<()> {
        unsafe { &*self.mmap.get() }.lock()
    }

    fn flush(&self) -> std::io::Result<()> {
        unsafe { &*self.mmap.get() }.flush()
    }
}

struct Shared {
    config: BlockConfig,
    record_size: usize,
    /// Effective records per segment, taken from metadata slot 0
    segment_size: usize,
    segments: RwLock<HashMap<u64, SegmentMap>>,
    metadata: Mutex<PVec>,
    /// Serializes record allocation
    alloc_lock: Mutex<()>,
    /// Serializes the check-and-allocate of the next segment
    prealloc_lock: Mutex<()>,
    /// At most one opportunistic preallocation thread at a time
    preallocating: AtomicBool,
}

/// Writable segmented block store
pub struct RwBlock {
    shared: Arc<Shared>,
}

impl RwBlock {
    /// Open or create the block in `config.dir`, loading all existing
    /// segments into memory and topping up free records if needed.
    pub fn open(config: BlockConfig) -> Result<Self> {
        config.validate()?;

        let mut metadata = PVec::open(&config.metadata_path(), META_SLOTS)?;
        if metadata.get(META_SEGMENT_SIZE) == 0.0 {
            metadata.set(META_SEGMENT_SIZE, config.segment_size as f64);
        }
        let segment_size = metadata.get(META_SEGMENT_SIZE) as usize;
        let record_size = config.record_size();

        let shared = Arc::new(Shared {
            config,
            record_size,
            segment_size,
            segments: RwLock::new(HashMap::new()),
            metadata: Mutex::new(metadata),
            alloc_lock: Mutex::new(()),
            prealloc_lock: Mutex::new(()),
            preallocating: AtomicBool::new(false),
        });

        shared.load_segments()?;
        shared.preallocate_if_needed()?;

        Ok(Self { shared })
    }

    /// Allocate the next record slot and persist the used-record counter.
    ///
    /// Positions are dense and strictly monotonic; the returned record's
    /// bytes are already mapped and zero-filled. If every allocated record
    /// is taken, a segment is preallocated synchronously before returning.
    pub fn new_record(&self) -> Result<Position> {
        let shared = &self.shared;
        let position;

        {
            let _alloc = shared.alloc_lock.lock();

            let (used, total) = shared.counters();
            if used >= total {
                shared.preallocate_if_needed()?;
                let (used, total) = shared.counters();
                if used >= total {
                    return Err(StrataError::AllocationFailed);
                }
            }

            let mut metadata = shared.metadata.lock();
            let used = metadata.get(META_RECORD_COUNT);
            metadata.set(META_RECORD_COUNT, used + 1.0);
            position = used as Position;
        }

        // top up the next segment in the background before it is needed
        self.spawn_preallocation();

        Ok(position)
    }

    /// Copy one payload into a record cell. No locks beyond the shared
    /// segment table; concurrent writers target distinct positions.
    pub fn put(&self, position: Position, cell: usize, payload: &[u8]) -> Result<()> {
        let shared = &self.shared;
        if payload.len() != shared.config.payload_size {
            return Err(StrataError::InvalidPayload);
        }

        let (segment_no, slot) = locate(shared.segment_size, position);
        let offset = slot * shared.record_size + cell * shared.config.payload_size;

        let segments = shared.segments.read();
        let segment = segments
            .get(&segment_no)
            .ok_or(StrataError::SegmentMissing(segment_no))?;

        if offset + payload.len() > segment.len() {
            return Err(StrataError::ShortWrite);
        }
        segment.write_at(offset, payload);

        Ok(())
    }

    /// Read cells `start..end` of a record, one owned payload per cell
    pub fn get(&self, position: Position, start: usize, end: usize) -> Result<Vec<Vec<u8>>> {
        let shared = &self.shared;
        let payload_size = shared.config.payload_size;
        let count = end.saturating_sub(start);
        if count == 0 {
            return Ok(Vec::new());
        }

        let (segment_no, slot) = locate(shared.segment_size, position);
        let offset = slot * shared.record_size + start * payload_size;
        let len = count * payload_size;

        let segments = shared.segments.read();
        let segment = segments
            .get(&segment_no)
            .ok_or(StrataError::SegmentMissing(segment_no))?;

        if offset + len > segment.len() {
            return Err(StrataError::ShortRead);
        }
        let raw = segment.read_out(offset, len);

        Ok(raw.chunks_exact(payload_size).map(|c| c.to_vec()).collect())
    }

    /// Run the preallocation check now; allocates at most one segment
    pub fn preallocate_if_needed(&self) -> Result<()> {
        self.shared.preallocate_if_needed()
    }

    /// Records allocated so far
    pub fn records_used(&self) -> u64 {
        self.shared.metadata.lock().get(META_RECORD_COUNT) as u64
    }

    /// Segment files allocated so far
    pub fn segments_allocated(&self) -> u64 {
        self.shared.metadata.lock().get(META_SEGMENT_COUNT) as u64
    }

    /// Flush all mappings and the metadata vector; unmapping happens when
    /// the store and any background preallocation thread release their
    /// handles.
    pub fn close(&self) -> Result<()> {
        for segment in self.shared.segments.read().values() {
            segment.flush()?;
        }
        self.shared.metadata.lock().flush()?;
        Ok(())
    }

    fn spawn_preallocation(&self) {
        let shared = &self.shared;
        if !shared.should_preallocate() {
            return;
        }
        if shared.preallocating.swap(true, Ordering::SeqCst) {
            return;
        }

        let shared = Arc::clone(shared);
        thread::spawn(move || {
            if let Err(err) = shared.preallocate_if_needed() {
                warn!(%err, "background segment preallocation failed");
            }
            shared.preallocating.store(false, Ordering::SeqCst);
        });
    }
}

impl Shared {
    /// (records used, records allocated) from metadata
    fn counters(&self) -> (u64, u64) {
        let metadata = self.metadata.lock();
        let used = metadata.get(META_RECORD_COUNT) as u64;
        let total =
            (metadata.get(META_SEGMENT_COUNT) * metadata.get(META_SEGMENT_SIZE)) as u64;
        (used, total)
    }

    /// Free records have dropped below half a segment
    fn should_preallocate(&self) -> bool {
        let (used, total) = self.counters();
        total - used < (self.segment_size as u64) / 2
    }

    /// Check-and-allocate of the next segment, serialized on its own lock
    /// so the foreground allocator and the background top-up never race.
    fn preallocate_if_needed(&self) -> Result<()> {
        let _guard = self.prealloc_lock.lock();

        if !self.should_preallocate() {
            return Ok(());
        }

        let next = self.segments_allocated() + 1;
        self.preallocate(next)?;
        self.metadata.lock().set(META_SEGMENT_COUNT, next as f64);

        Ok(())
    }

    fn segments_allocated(&self) -> u64 {
        self.metadata.lock().get(META_SEGMENT_COUNT) as u64
    }

    /// Create segment file `segment_no`, zero-fill it in chunks, map it and
    /// publish the mapping. Fails if the file already exists.
    fn preallocate(&self, segment_no: u64) -> Result<()> {
        let path = self.config.segment_path(segment_no);
        let bytes = self.segment_size * self.record_size;

        let mut file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StrataError::SegmentExists(path));
            }
            Err(err) => return Err(err.into()),
        };

        let chunk = vec![0u8; FILL_CHUNK.min(bytes)];
        let mut remaining = bytes;
        while remaining > 0 {
            let n = remaining.min(chunk.len());
            file.write_all(&chunk[..n])?;
            remaining -= n;
        }

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let segment = SegmentMap::new(mmap);
        if let Err(err) = segment.lock_pages() {
            warn!(segment = segment_no, %err, "could not lock segment pages in RAM");
        }

        self.segments.write().insert(segment_no, segment);
        debug!(segment = segment_no, bytes, "preallocated segment");

        Ok(())
    }

    /// Map every segment recorded in metadata
    fn load_segments(&self) -> Result<()> {
        let count = self.segments_allocated();

        for segment_no in 1..=count {
            let path = self.config.segment_path(segment_no);
            let file = OpenOptions::new().read(true).write(true).open(&path)?;

            let mmap = unsafe { MmapMut::map_mut(&file)? };
            let segment = SegmentMap::new(mmap);
            if let Err(err) = segment.lock_pages() {
                warn!(segment = segment_no, %err, "could not lock segment pages in RAM");
            }

            self.segments.write().insert(segment_no, segment);
        }

        Ok(())
    }
}
