//! Database controller
//!
//! Owns the hot and cold bucket tiers and routes every operation to the
//! buckets covering its time range. Hot buckets are read-write and created
//! on demand; cold buckets are read-only and only loaded when their
//! directory already exists. Each tier is a bounded eviction queue; a
//! background closer drains the eviction channels and releases evicted
//! buckets, and the rendezvous emission keeps routing from out-running it.

use crate::bucket::{Bucket, BucketConfig};
use crate::clock::Clock;
use crate::queue::EvictionQueue;
use crate::types::{align_down, Timestamp};
use crate::{Result, StrataError};
use crossbeam_channel::Receiver;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{error, info};

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database name, used to prefix bucket directories
    pub database_name: String,
    /// Root directory for all bucket directories
    pub data_path: PathBuf,
    /// Depth of the tag index tree (tag vector arity)
    pub index_depth: usize,
    /// Payload cell size in bytes
    pub payload_size: usize,
    /// Bucket window length in nanoseconds, a multiple of `resolution`
    pub bucket_duration: i64,
    /// Cell width in nanoseconds
    pub resolution: i64,
    /// Records per block segment
    pub segment_size: usize,
    /// Read-write buckets held in memory
    pub max_hot_buckets: usize,
    /// Read-only buckets held in memory
    pub max_cold_buckets: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_name: "default".to_string(),
            data_path: PathBuf::from("stratadb_data"),
            index_depth: 4,
            payload_size: 16,
            bucket_duration: 4 * 3600 * 1_000_000_000,
            resolution: 60 * 1_000_000_000,
            segment_size: crate::config::DEFAULT_SEGMENT_SIZE,
            max_hot_buckets: crate::config::DEFAULT_MAX_HOT_BUCKETS,
            max_cold_buckets: crate::config::DEFAULT_MAX_COLD_BUCKETS,
        }
    }
}

/// Counts of buckets resident per tier
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub hot_buckets: usize,
    pub cold_buckets: usize,
}

/// Fixed-schema time-series database over bucketed storage
pub struct Database {
    config: DatabaseConfig,
    clock: Arc<dyn Clock>,
    hot: EvictionQueue<Arc<Bucket>>,
    cold: EvictionQueue<Arc<Bucket>>,
    closed: AtomicBool,
}

impl Database {
    /// Open the database: create the data directory, load the hot window
    /// buckets (creating them if missing), probe the cold windows below
    /// them, and start the background closer.
    pub fn open(config: DatabaseConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        validate(&config)?;
        std::fs::create_dir_all(&config.data_path)?;

        let hot = EvictionQueue::new(config.max_hot_buckets);
        let cold = EvictionQueue::new(config.max_cold_buckets);

        let db = Self {
            config,
            clock,
            hot,
            cold,
            closed: AtomicBool::new(false),
        };

        let duration = db.config.bucket_duration;
        let now = align_down(db.clock.now(), duration);
        let min_hot = now - duration * (db.config.max_hot_buckets as i64 - 1);

        // the hot windows take all writes; make sure they exist
        for i in 0..db.config.max_hot_buckets as i64 {
            db.bucket_at(min_hot + i * duration)?;
        }

        // the windows just below are likely to be read soon; load the ones
        // already on disk, skip the rest
        let min_cold = min_hot - duration * db.config.max_cold_buckets as i64;
        for i in 0..db.config.max_cold_buckets as i64 {
            match db.bucket_at(min_cold + i * duration) {
                Ok(_) | Err(StrataError::BucketNotOnDisk) => {}
                Err(err) => return Err(err),
            }
        }

        db.spawn_closer();

        info!(name = %db.config.database_name, "opened database");
        Ok(db)
    }

    /// Write `payload` at `ts` for the series `tags`.
    ///
    /// The timestamp is floored to the resolution and must not be in the
    /// future; tags must have the configured arity with no empty component;
    /// the payload must be exactly the configured size.
    pub fn put(&self, ts: Timestamp, tags: &[String], payload: &[u8]) -> Result<()> {
        self.ensure_open()?;

        let ts = align_down(ts, self.config.resolution);
        if ts > self.clock.now() {
            return Err(StrataError::InvalidTimestamp);
        }
        if tags.len() != self.config.index_depth || tags.iter().any(|t| t.is_empty()) {
            return Err(StrataError::InvalidTags);
        }
        if payload.len() != self.config.payload_size {
            return Err(StrataError::InvalidPayload);
        }

        self.bucket_at(ts)?.put(ts, tags, payload)
    }

    /// Read the payload cells covering `[start, end)` for one series,
    /// stitched across buckets in time order. Ranges falling on absent
    /// buckets or unknown tags come back zero-filled.
    pub fn get(&self, start: Timestamp, end: Timestamp, tags: &[String]) -> Result<Vec<Vec<u8>>> {
        self.ensure_open()?;

        let resolution = self.config.resolution;
        let start = align_down(start, resolution);
        let end = align_down(end, resolution);

        let now = self.clock.now();
        if start > now || end - resolution > now || end < start {
            return Err(StrataError::InvalidTimestamp);
        }
        if tags.len() != self.config.index_depth {
            return Err(StrataError::InvalidTags);
        }

        let duration = self.config.bucket_duration;
        let first = align_down(start, duration);
        let last = align_down(end, duration);

        let mut res = Vec::with_capacity(((end - start) / resolution) as usize);
        let mut t = first;
        while t <= last {
            let bkt_start = if t == first { start } else { t };
            let bkt_end = if t == last { end } else { t + duration };
            let count = ((bkt_end - bkt_start) / resolution) as usize;

            match self.bucket_at(t) {
                Ok(bucket) => match bucket.get(bkt_start, bkt_end, tags)? {
                    Some(payloads) => res.extend(payloads),
                    None => self.zero_fill(&mut res, count),
                },
                Err(StrataError::BucketNotOnDisk) => self.zero_fill(&mut res, count),
                Err(err) => return Err(err),
            }

            t += duration;
        }

        Ok(res)
    }

    /// Read the payload cells covering `[start, end)` for every series
    /// whose tags match `pattern` (empty components are wildcards). Each
    /// matched series gets a full-length vector, zero-filled where buckets
    /// have no data for it.
    pub fn find(
        &self,
        start: Timestamp,
        end: Timestamp,
        pattern: &[String],
    ) -> Result<HashMap<Vec<String>, Vec<Vec<u8>>>> {
        self.ensure_open()?;

        let resolution = self.config.resolution;
        let start = align_down(start, resolution);
        let end = align_down(end, resolution);

        let now = self.clock.now();
        if start > now || end > now || end < start {
            return Err(StrataError::InvalidTimestamp);
        }
        if pattern.len() != self.config.index_depth {
            return Err(StrataError::InvalidTags);
        }

        let duration = self.config.bucket_duration;
        let first = align_down(start, duration);
        let last = align_down(end, duration);
        let total = ((end - start) / resolution) as usize;

        let mut results: HashMap<Vec<String>, Vec<Vec<u8>>> = HashMap::new();

        let mut t = first;
        while t <= last {
            let bucket = match self.bucket_at(t) {
                Ok(bucket) => bucket,
                Err(StrataError::BucketNotOnDisk) => {
                    t += duration;
                    continue;
                }
                Err(err) => return Err(err),
            };

            let bkt_start = if t == first { start } else { t };
            let bkt_end = if t == last { end } else { t + duration };
            let offset = ((bkt_start - start) / resolution) as usize;

            for (entry, payloads) in bucket.find(bkt_start, bkt_end, pattern)? {
                let series = results.entry(entry.values.clone()).or_insert_with(|| {
                    vec![vec![0u8; self.config.payload_size]; total]
                });
                for (i, payload) in payloads.into_iter().enumerate() {
                    series[offset + i] = payload;
                }
            }

            t += duration;
        }

        Ok(results)
    }

    /// Delete every bucket directory with a base timestamp below `ts`.
    ///
    /// Refused when the cut-off reaches into the hot window. Deleted
    /// buckets resident in the cold tier are closed and dropped first.
    /// An entry carrying the database prefix but an unparsable base time
    /// aborts the call.
    pub fn remove_before(&self, ts: Timestamp) -> Result<()> {
        self.ensure_open()?;

        let duration = self.config.bucket_duration;
        let now = align_down(self.clock.now(), duration);
        let min_hot = now - duration * (self.config.max_hot_buckets as i64 - 1);
        if ts > min_hot {
            return Err(StrataError::CannotRemoveHotBucket);
        }

        let prefix = format!("{}_", self.config.database_name);
        for dir_entry in std::fs::read_dir(&self.config.data_path)? {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name();
            let name = match name.to_str() {
                Some(name) => name,
                None => continue,
            };
            let suffix = match name.strip_prefix(&prefix) {
                Some(suffix) => suffix,
                None => continue,
            };
            let base: Timestamp = suffix.parse().map_err(|_| {
                StrataError::InvalidFormat(format!(
                    "bucket directory {} has an unparsable base time",
                    name
                ))
            })?;

            if base >= ts {
                continue;
            }

            match self.cold.del(base) {
                Ok(bucket) => bucket.close()?,
                Err(StrataError::KeyMissing) => {}
                Err(err) => return Err(err),
            }

            std::fs::remove_dir_all(dir_entry.path())?;
            info!(base, "removed expired bucket");
        }

        Ok(())
    }

    /// Buckets resident per tier
    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            hot_buckets: self.hot.len(),
            cold_buckets: self.cold.len(),
        }
    }

    /// Drain both tiers and close every bucket. Further operations fail
    /// with `Closed`; the background closer exits when the database drops.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(StrataError::Closed);
        }

        for (_, bucket) in self.hot.flush() {
            bucket.close()?;
        }
        for (_, bucket) in self.cold.flush() {
            bucket.close()?;
        }

        info!(name = %self.config.database_name, "closed database");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StrataError::Closed);
        }
        Ok(())
    }

    /// Resolve the bucket owning `ts`, loading or creating it if needed.
    ///
    /// A window above the hot boundary opens read-write into the hot tier;
    /// anything older opens read-only into the cold tier, which requires
    /// its directory to exist. The boundary moves with the routing-time
    /// clock; buckets already resident stay in their tier until evicted.
    fn bucket_at(&self, ts: Timestamp) -> Result<Arc<Bucket>> {
        let duration = self.config.bucket_duration;
        let base = align_down(ts, duration);

        if let Ok(bucket) = self.hot.get(base) {
            return Ok(bucket);
        }
        if let Ok(bucket) = self.cold.get(base) {
            return Ok(bucket);
        }

        let now = align_down(self.clock.now(), duration);
        let hot_boundary = now - duration * self.config.max_hot_buckets as i64;
        let is_hot = base > hot_boundary;

        let bucket = Arc::new(Bucket::open(BucketConfig {
            database_name: self.config.database_name.clone(),
            data_path: self.config.data_path.clone(),
            index_depth: self.config.index_depth,
            payload_size: self.config.payload_size,
            bucket_duration: duration,
            resolution: self.config.resolution,
            segment_size: self.config.segment_size,
            read_only: !is_hot,
            base_time: base,
        })?);

        let tier = if is_hot { &self.hot } else { &self.cold };
        match tier.add(base, Arc::clone(&bucket)) {
            Ok(()) => Ok(bucket),
            Err(StrataError::KeyExists) => {
                // another caller raced us; keep the resident bucket
                bucket.close()?;
                tier.get(base)
            }
            Err(err) => Err(err),
        }
    }

    fn zero_fill(&self, res: &mut Vec<Vec<u8>>, count: usize) {
        for _ in 0..count {
            res.push(vec![0u8; self.config.payload_size]);
        }
    }

    fn spawn_closer(&self) {
        let hot_rx = self.hot.out();
        let cold_rx = self.cold.out();
        thread::spawn(move || closer_loop(hot_rx, cold_rx));
    }
}

/// Receive evicted buckets from both tiers and close them. A close failure
/// is fatal for the task; the channels disconnect when the database drops.
fn closer_loop(hot_rx: Receiver<Arc<Bucket>>, cold_rx: Receiver<Arc<Bucket>>) {
    loop {
        let bucket = crossbeam_channel::select! {
            recv(hot_rx) -> msg => match msg {
                Ok(bucket) => bucket,
                Err(_) => break,
            },
            recv(cold_rx) -> msg => match msg {
                Ok(bucket) => bucket,
                Err(_) => break,
            },
        };

        info!(base = bucket.base_time(), "closing evicted bucket");
        if let Err(err) = bucket.close() {
            error!(%err, "background bucket close failed; stopping closer");
            break;
        }
    }
}

fn validate(config: &DatabaseConfig) -> Result<()> {
    if config.database_name.is_empty() {
        return Err(StrataError::Config(
            "database name must not be empty".to_string(),
        ));
    }
    if config.resolution <= 0 || config.bucket_duration <= 0 {
        return Err(StrataError::Config(
            "resolution and bucket duration must be positive".to_string(),
        ));
    }
    if config.bucket_duration % config.resolution != 0 {
        return Err(StrataError::Config(
            "bucket duration must be a multiple of resolution".to_string(),
        ));
    }
    if config.index_depth == 0 || config.payload_size == 0 || config.segment_size == 0 {
        return Err(StrataError::Config(
            "index depth, payload size and segment size must be positive".to_string(),
        ));
    }
    if config.max_hot_buckets == 0 || config.max_cold_buckets == 0 {
        return Err(StrataError::Config(
            "tier capacities must be positive".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use tempfile::TempDir;

    // the reference setup: hot windows at bases 10000 and 11000
    const CLOCK: i64 = 11999;

    fn config(dir: &std::path::Path) -> DatabaseConfig {
        DatabaseConfig {
            database_name: "test".to_string(),
            data_path: dir.to_path_buf(),
            index_depth: 4,
            payload_size: 4,
            bucket_duration: 1000,
            resolution: 10,
            segment_size: 10,
            max_hot_buckets: 2,
            max_cold_buckets: 4,
        }
    }

    fn open(dir: &std::path::Path, clock: &Arc<ManualClock>) -> Database {
        Database::open(config(dir), Arc::clone(clock) as Arc<dyn Clock>).unwrap()
    }

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn series() -> Vec<String> {
        tags(&["a", "b", "c", "d"])
    }

    #[test]
    fn test_open_loads_hot_tier() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(CLOCK));
        let db = open(temp_dir.path(), &clock);

        let stats = db.stats();
        assert_eq!(stats.hot_buckets, 2);
        assert_eq!(stats.cold_buckets, 0);

        assert!(temp_dir.path().join("test_10000").exists());
        assert!(temp_dir.path().join("test_11000").exists());
        db.close().unwrap();
    }

    #[test]
    fn test_basic_put_get() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(CLOCK));
        let db = open(temp_dir.path(), &clock);

        db.put(10990, &series(), &[1, 2, 3, 4]).unwrap();
        db.put(11000, &series(), &[5, 6, 7, 8]).unwrap();

        // spans the bucket boundary between 10000 and 11000
        let res = db.get(10990, 11010, &series()).unwrap();
        assert_eq!(res, vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]]);
        db.close().unwrap();
    }

    #[test]
    fn test_zero_fill_on_unwritten_cell() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(CLOCK));
        let db = open(temp_dir.path(), &clock);

        db.put(10990, &series(), &[1, 2, 3, 4]).unwrap();

        let res = db.get(10980, 11000, &series()).unwrap();
        assert_eq!(res, vec![vec![0, 0, 0, 0], vec![1, 2, 3, 4]]);
        db.close().unwrap();
    }

    #[test]
    fn test_get_length_matches_range() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(CLOCK));
        let db = open(temp_dir.path(), &clock);

        db.put(10990, &series(), &[1, 2, 3, 4]).unwrap();

        let res = db.get(10900, 11100, &series()).unwrap();
        assert_eq!(res.len(), 20);

        // empty range
        assert!(db.get(10900, 10900, &series()).unwrap().is_empty());
        db.close().unwrap();
    }

    #[test]
    fn test_find_wildcard_across_series() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(CLOCK));
        let db = open(temp_dir.path(), &clock);

        db.put(10990, &tags(&["a", "b", "c", "d"]), &[1, 2, 3, 4]).unwrap();
        db.put(11000, &tags(&["a", "b", "c", "e"]), &[5, 6, 7, 8]).unwrap();

        let res = db.find(10990, 11010, &tags(&["a", "b", "c", ""])).unwrap();
        assert_eq!(res.len(), 2);

        let d = &res[&tags(&["a", "b", "c", "d"])];
        assert_eq!(d, &vec![vec![1, 2, 3, 4], vec![0, 0, 0, 0]]);

        let e = &res[&tags(&["a", "b", "c", "e"])];
        assert_eq!(e, &vec![vec![0, 0, 0, 0], vec![5, 6, 7, 8]]);
        db.close().unwrap();
    }

    #[test]
    fn test_cold_bucket_miss_zero_fills() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(CLOCK));
        let db = open(temp_dir.path(), &clock);

        // bucket 0 was never written and is far below the hot boundary
        let res = db.get(10, 20, &series()).unwrap();
        assert_eq!(res, vec![vec![0, 0, 0, 0]]);
        db.close().unwrap();
    }

    #[test]
    fn test_rejects_future_timestamps() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(CLOCK));
        let db = open(temp_dir.path(), &clock);

        assert!(matches!(
            db.put(12000, &series(), &[1, 2, 3, 4]),
            Err(StrataError::InvalidTimestamp)
        ));
        assert!(matches!(
            db.get(12000, 12010, &series()),
            Err(StrataError::InvalidTimestamp)
        ));
        assert!(matches!(
            db.get(11000, 10000, &series()),
            Err(StrataError::InvalidTimestamp)
        ));
        assert!(matches!(
            db.find(11000, 12010, &series()),
            Err(StrataError::InvalidTimestamp)
        ));
        db.close().unwrap();
    }

    #[test]
    fn test_validates_tags_and_payload() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(CLOCK));
        let db = open(temp_dir.path(), &clock);

        assert!(matches!(
            db.put(10990, &tags(&["a", "b", "c"]), &[1, 2, 3, 4]),
            Err(StrataError::InvalidTags)
        ));
        assert!(matches!(
            db.put(10990, &tags(&["a", "b", "c", ""]), &[1, 2, 3, 4]),
            Err(StrataError::InvalidTags)
        ));
        assert!(matches!(
            db.put(10990, &series(), &[1, 2, 3]),
            Err(StrataError::InvalidPayload)
        ));
        assert!(matches!(
            db.get(10990, 11000, &tags(&["a", "b"])),
            Err(StrataError::InvalidTags)
        ));
        db.close().unwrap();
    }

    #[test]
    fn test_eviction_closes_oldest_hot_bucket() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(CLOCK));
        let db = open(temp_dir.path(), &clock);

        db.put(10990, &series(), &[1, 2, 3, 4]).unwrap();

        // a new hot window displaces bucket 10000; the background closer
        // receives and closes it
        clock.set(12999);
        db.put(12010, &series(), &[9, 9, 9, 9]).unwrap();

        let stats = db.stats();
        assert_eq!(stats.hot_buckets, 2);

        // the displaced window reloads read-only with its data intact
        let res = db.get(10990, 11000, &series()).unwrap();
        assert_eq!(res, vec![vec![1, 2, 3, 4]]);
        assert_eq!(db.stats().cold_buckets, 1);
        db.close().unwrap();
    }

    #[test]
    fn test_reopen_recovers_data() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(CLOCK));

        {
            let db = open(temp_dir.path(), &clock);
            db.put(10990, &series(), &[1, 2, 3, 4]).unwrap();
            db.put(11000, &series(), &[5, 6, 7, 8]).unwrap();
            db.close().unwrap();
        }

        let db = open(temp_dir.path(), &clock);
        let res = db.get(10990, 11010, &series()).unwrap();
        assert_eq!(res, vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]]);
        db.close().unwrap();
    }

    #[test]
    fn test_remove_before_guards_hot_window() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(CLOCK));
        let db = open(temp_dir.path(), &clock);

        // min hot base is 10000; one past it must be refused
        assert!(matches!(
            db.remove_before(10001),
            Err(StrataError::CannotRemoveHotBucket)
        ));
        db.close().unwrap();
    }

    #[test]
    fn test_remove_before_deletes_old_buckets() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(3999));

        {
            let db = open(temp_dir.path(), &clock);
            db.put(3030, &series(), &[1, 2, 3, 4]).unwrap();
            db.close().unwrap();
        }
        assert!(temp_dir.path().join("test_3000").exists());

        clock.set(CLOCK);
        let db = open(temp_dir.path(), &clock);

        db.remove_before(4000).unwrap();
        assert!(!temp_dir.path().join("test_3000").exists());

        // the deleted window now reads as zero-fill
        let res = db.get(3030, 3040, &series()).unwrap();
        assert_eq!(res, vec![vec![0, 0, 0, 0]]);
        db.close().unwrap();
    }

    #[test]
    fn test_remove_before_rejects_unparsable_entry() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(CLOCK));
        let db = open(temp_dir.path(), &clock);

        // a stray entry with the database prefix but no base time
        std::fs::create_dir(temp_dir.path().join("test_corrupt")).unwrap();

        assert!(matches!(
            db.remove_before(4000),
            Err(StrataError::InvalidFormat(_))
        ));
        db.close().unwrap();
    }

    #[test]
    fn test_cold_probe_on_open() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(9999));

        {
            let db = open(temp_dir.path(), &clock);
            db.put(8010, &series(), &[4, 4, 4, 4]).unwrap();
            db.close().unwrap();
        }

        // at 11999 the windows at 8000 and 9000 sit in the cold probe range
        clock.set(CLOCK);
        let db = open(temp_dir.path(), &clock);
        assert_eq!(db.stats().cold_buckets, 2);

        let res = db.get(8010, 8020, &series()).unwrap();
        assert_eq!(res, vec![vec![4, 4, 4, 4]]);
        db.close().unwrap();
    }

    #[test]
    fn test_writes_to_cold_window_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(9999));

        {
            let db = open(temp_dir.path(), &clock);
            db.put(8010, &series(), &[4, 4, 4, 4]).unwrap();
            db.close().unwrap();
        }

        clock.set(CLOCK);
        let db = open(temp_dir.path(), &clock);
        assert!(matches!(
            db.put(8010, &series(), &[5, 5, 5, 5]),
            Err(StrataError::WriteOnReadOnly)
        ));
        db.close().unwrap();
    }

    #[test]
    fn test_many_series_span_segments() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(CLOCK));
        let db = open(temp_dir.path(), &clock);

        // 25 series in one bucket outgrow the 10-record segments
        for i in 0..25 {
            let series = tags(&["a", "b", "c", &format!("h{}", i)]);
            db.put(10000, &series, &[i as u8; 4]).unwrap();
        }

        let res = db.find(10000, 10010, &tags(&["a", "b", "c", ""])).unwrap();
        assert_eq!(res.len(), 25);
        for i in 0..25u8 {
            let series = tags(&["a", "b", "c", &format!("h{}", i)]);
            assert_eq!(res[&series], vec![vec![i; 4]]);
        }
        db.close().unwrap();
    }

    #[test]
    fn test_concurrent_puts_distinct_series() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(CLOCK));
        let db = Arc::new(open(temp_dir.path(), &clock));

        let mut handles = Vec::new();
        for worker in 0..4 {
            let db = Arc::clone(&db);
            handles.push(thread::spawn(move || {
                let series = tags(&["a", "b", "c", &format!("w{}", worker)]);
                for i in 0..10 {
                    db.put(10000 + i * 10, &series, &[worker as u8; 4]).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        for worker in 0..4u8 {
            let series = tags(&["a", "b", "c", &format!("w{}", worker)]);
            let res = db.get(10000, 10100, &series).unwrap();
            assert_eq!(res.len(), 10);
            for cell in res {
                assert_eq!(cell, vec![worker; 4]);
            }
        }
        db.close().unwrap();
    }

    #[test]
    fn test_close_is_final() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(CLOCK));
        let db = open(temp_dir.path(), &clock);

        db.close().unwrap();
        assert!(matches!(
            db.put(10990, &series(), &[1, 2, 3, 4]),
            Err(StrataError::Closed)
        ));
        assert!(matches!(
            db.get(10990, 11000, &series()),
            Err(StrataError::Closed)
        ));
        assert!(matches!(db.close(), Err(StrataError::Closed)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(CLOCK));

        let mut bad = config(temp_dir.path());
        bad.bucket_duration = 1001; // not a multiple of the resolution
        assert!(matches!(
            Database::open(bad, Arc::clone(&clock) as Arc<dyn Clock>),
            Err(StrataError::Config(_))
        ));
    }
}
