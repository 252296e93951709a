//! Bounded eviction queue
//!
//! A fixed-capacity insertion-ordered map keyed by bucket base timestamp.
//! When a new entry would exceed the capacity, the oldest entry is removed
//! and handed to the eviction channel *before* the insert completes. The
//! channel is a rendezvous channel: `add` blocks until a consumer receives
//! the evicted value, so producers can never out-run the background closer.

use crate::{Result, StrataError};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Fixed-capacity insertion-ordered map with eviction emission
pub struct EvictionQueue<V> {
    capacity: usize,
    inner: Mutex<Inner<V>>,
    out_tx: Sender<V>,
    out_rx: Receiver<V>,
}

struct Inner<V> {
    entries: HashMap<i64, V>,
    order: VecDeque<i64>,
}

impl<V> EvictionQueue<V> {
    /// Create a queue holding at most `capacity` entries.
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "eviction queue capacity must be positive");

        let (out_tx, out_rx) = bounded(0);

        Self {
            capacity,
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }),
            out_tx,
            out_rx,
        }
    }

    /// Insert `value` under `key` as the newest entry.
    ///
    /// Fails with `KeyExists` if the key is already present. At capacity,
    /// the oldest entry is emitted on the eviction channel first; this call
    /// blocks until a consumer receives it.
    pub fn add(&self, key: i64, value: V) -> Result<()> {
        let mut inner = self.inner.lock();

        if inner.entries.contains_key(&key) {
            return Err(StrataError::KeyExists);
        }

        if inner.order.len() == self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                if let Some(evicted) = inner.entries.remove(&oldest) {
                    // rendezvous with the consumer before the insert;
                    // cannot disconnect while the queue itself is alive
                    let _ = self.out_tx.send(evicted);
                }
            }
        }

        inner.order.push_back(key);
        inner.entries.insert(key, value);

        Ok(())
    }

    /// Look up the value under `key` without changing its position
    pub fn get(&self, key: i64) -> Result<V>
    where
        V: Clone,
    {
        self.inner
            .lock()
            .entries
            .get(&key)
            .cloned()
            .ok_or(StrataError::KeyMissing)
    }

    /// Remove and return the value under `key` without emitting it
    pub fn del(&self, key: i64) -> Result<V> {
        let mut inner = self.inner.lock();

        let value = inner.entries.remove(&key).ok_or(StrataError::KeyMissing)?;
        inner.order.retain(|k| *k != key);

        Ok(value)
    }

    /// Receiving endpoint for evicted values
    pub fn out(&self) -> Receiver<V> {
        self.out_rx.clone()
    }

    /// Atomically drain all entries in insertion order and reset to empty
    pub fn flush(&self) -> Vec<(i64, V)> {
        let mut inner = self.inner.lock();

        let mut drained = Vec::with_capacity(inner.order.len());
        while let Some(key) = inner.order.pop_front() {
            if let Some(value) = inner.entries.remove(&key) {
                drained.push((key, value));
            }
        }
        inner.entries.clear();

        drained
    }

    /// Number of entries currently held
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    /// Check if the queue holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_add_get() {
        let queue = EvictionQueue::new(3);

        queue.add(0, 10).unwrap();
        assert_eq!(queue.get(0).unwrap(), 10);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_add_duplicate() {
        let queue = EvictionQueue::new(3);

        queue.add(0, 10).unwrap();
        assert!(matches!(queue.add(0, 20), Err(StrataError::KeyExists)));
        assert_eq!(queue.get(0).unwrap(), 10);
    }

    #[test]
    fn test_get_missing() {
        let queue: EvictionQueue<i32> = EvictionQueue::new(3);
        assert!(matches!(queue.get(7), Err(StrataError::KeyMissing)));
    }

    #[test]
    fn test_del() {
        let queue = EvictionQueue::new(3);

        queue.add(0, 10).unwrap();
        queue.add(1, 20).unwrap();

        assert_eq!(queue.del(0).unwrap(), 10);
        assert!(matches!(queue.get(0), Err(StrataError::KeyMissing)));
        assert_eq!(queue.len(), 1);

        assert!(matches!(queue.del(0), Err(StrataError::KeyMissing)));
    }

    #[test]
    fn test_add_full_emits_oldest() {
        let queue = Arc::new(EvictionQueue::new(3));
        let out = queue.out();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                // fill the queue and add two extra entries
                for i in 0..5i64 {
                    queue.add(i, i * 10).unwrap();
                }
            })
        };

        // the two oldest values arrive in insertion order
        assert_eq!(out.recv().unwrap(), 0);
        assert_eq!(out.recv().unwrap(), 10);

        producer.join().unwrap();
        assert_eq!(queue.len(), 3);

        // survivors are the three newest
        assert!(matches!(queue.get(1), Err(StrataError::KeyMissing)));
        assert_eq!(queue.get(2).unwrap(), 20);
        assert_eq!(queue.get(4).unwrap(), 40);
    }

    #[test]
    fn test_del_avoids_emission() {
        let queue = EvictionQueue::new(2);

        queue.add(0, 10).unwrap();
        queue.add(1, 20).unwrap();
        queue.del(0).unwrap();

        // room was made by del, so no eviction happens here
        queue.add(2, 30).unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_flush_resets() {
        let queue = EvictionQueue::new(4);

        queue.add(3, 30).unwrap();
        queue.add(1, 10).unwrap();
        queue.add(2, 20).unwrap();

        let drained = queue.flush();
        assert_eq!(drained, vec![(3, 30), (1, 10), (2, 20)]);
        assert_eq!(queue.len(), 0);

        // the queue is usable again after a flush
        queue.add(3, 31).unwrap();
        assert_eq!(queue.get(3).unwrap(), 31);
    }
}
