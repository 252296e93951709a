//! Persistent tag-tree index
//!
//! Maps ordered tag tuples of a fixed depth to record positions. The index
//! is an in-memory tree rebuilt on open by replaying an append-only log of
//! frames (see [`format`]); lookups walk the tree, wildcard finds collect
//! whole subtrees. Appends go into a preallocated memory mapping so steady
//! writes never wait on file growth.

mod format;

pub use format::IndexEntry;

use crate::types::Position;
use crate::{Result, StrataError};
use memmap2::MmapMut;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Growth step for the log file
const GROW_STEP: u64 = crate::config::INDEX_GROW_STEP;

/// Tree node: interior nodes route on the next tag value, leaves carry the
/// series entry. With a fixed depth, every path from the root crosses
/// exactly `depth` edges and ends in a leaf.
enum Node {
    Interior(BTreeMap<String, Node>),
    Leaf(Arc<IndexEntry>),
}

/// Append state of the log file
struct Log {
    file: File,
    mmap: Option<MmapMut>,
    /// Append cursor: offset one past the last durable frame
    used: u64,
    /// Current file and mapping size
    mapped: u64,
}

impl Log {
    /// Make sure at least `pending` bytes fit between the cursor and the end
    /// of the mapping, growing the file by [`GROW_STEP`] when they do not.
    fn ensure_capacity(&mut self, pending: u64) -> Result<()> {
        let free = self.mapped - self.used;
        if free > pending {
            return Ok(());
        }

        let target = self.used + GROW_STEP;
        if let Some(mmap) = self.mmap.take() {
            mmap.flush()?;
            drop(mmap);
        }

        self.file.set_len(target)?;
        self.mmap = Some(unsafe { MmapMut::map_mut(&self.file)? });
        self.mapped = target;

        debug!(bytes = target, "grew index log");
        Ok(())
    }

    /// Copy a frame into the mapping at the cursor and advance it
    fn append(&mut self, frame: &[u8]) -> Result<()> {
        self.ensure_capacity(frame.len() as u64)?;

        let start = self.used as usize;
        match self.mmap.as_mut() {
            Some(mmap) => mmap[start..start + frame.len()].copy_from_slice(frame),
            None => return Err(StrataError::ShortWrite),
        }
        self.used += frame.len() as u64;

        Ok(())
    }
}

/// Persistent index from tag vectors to record positions
pub struct TagIndex {
    depth: usize,
    tree: RwLock<Node>,
    log: Mutex<Log>,
}

impl TagIndex {
    /// Open the index at `path`, creating the file if absent and replaying
    /// every decodable frame into the in-memory tree. Replay stops at the
    /// first truncated or garbage frame; later appends overwrite that tail.
    pub fn open(path: &Path, depth: usize) -> Result<Self> {
        if depth == 0 {
            return Err(StrataError::Config(
                "index depth must be positive".to_string(),
            ));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let file_size = file.metadata()?.len();
        let mut tree = Node::Interior(BTreeMap::new());
        let mut used = 0u64;
        let mut entries = 0usize;

        let mmap = if file_size > 0 {
            let mmap = unsafe { MmapMut::map_mut(&file)? };

            while used < file_size {
                let (entry, consumed) = match format::decode_frame(&mmap[used as usize..]) {
                    Some(frame) => frame,
                    None => break,
                };
                if entry.values.len() != depth {
                    break;
                }
                insert(&mut tree, &Arc::new(entry));
                used += consumed as u64;
                entries += 1;
            }

            Some(mmap)
        } else {
            None
        };

        if used < file_size {
            let tail_dirty = match &mmap {
                Some(mmap) => mmap[used as usize..].iter().any(|b| *b != 0),
                None => false,
            };
            if tail_dirty {
                // a torn append; the next append overwrites it
                warn!(
                    path = %path.display(),
                    tail = file_size - used,
                    "discarding undecodable index log tail"
                );
            }
        }
        debug!(path = %path.display(), entries, "replayed index log");

        let mut log = Log {
            file,
            mmap,
            used,
            mapped: file_size,
        };
        log.ensure_capacity(0)?;

        Ok(Self {
            depth,
            tree: RwLock::new(tree),
            log: Mutex::new(log),
        })
    }

    /// Index tree depth
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Insert a tag vector with its record position.
    ///
    /// An existing entry for the same tag vector is overwritten in memory
    /// and a second frame is appended; replay applies frames in file order,
    /// so the last write wins after a reopen.
    pub fn add(&self, values: Vec<String>, position: Position) -> Result<Arc<IndexEntry>> {
        if values.len() != self.depth || values.iter().any(|v| v.is_empty()) {
            return Err(StrataError::InvalidTags);
        }

        let entry = Arc::new(IndexEntry { values, position });
        let frame = format::encode_frame(&entry)?;

        {
            let mut tree = self.tree.write();
            insert(&mut tree, &entry);
        }

        self.log.lock().append(&frame)?;

        Ok(entry)
    }

    /// Exact lookup of a tag vector
    pub fn get(&self, values: &[String]) -> Option<Arc<IndexEntry>> {
        let tree = self.tree.read();
        let mut node = &*tree;

        for value in values {
            match node {
                Node::Interior(children) => node = children.get(value)?,
                Node::Leaf(_) => return None,
            }
        }

        match node {
            Node::Leaf(entry) => Some(Arc::clone(entry)),
            Node::Interior(_) => None,
        }
    }

    /// Find all entries matching `pattern`, where empty components are
    /// wildcards. The walk follows non-empty components until the first
    /// empty one, collects that whole subtree in traversal order, and
    /// filters by the remaining non-empty components if any follow the
    /// first wildcard.
    pub fn find(&self, pattern: &[String]) -> Vec<Arc<IndexEntry>> {
        let tree = self.tree.read();
        let mut node = &*tree;
        let mut needs_filter = false;

        for (i, value) in pattern.iter().enumerate() {
            if value.is_empty() {
                needs_filter = pattern[i..].iter().any(|v| !v.is_empty());
                break;
            }

            match node {
                Node::Interior(children) => match children.get(value) {
                    Some(child) => node = child,
                    None => return Vec::new(),
                },
                Node::Leaf(_) => return Vec::new(),
            }
        }

        let mut leaves = Vec::new();
        collect(node, &mut leaves);

        if needs_filter {
            leaves.retain(|entry| {
                pattern
                    .iter()
                    .enumerate()
                    .all(|(i, v)| v.is_empty() || entry.values.get(i) == Some(v))
            });
        }

        leaves
    }

    /// Flush the log mapping; the unmap happens on drop
    pub fn close(&self) -> Result<()> {
        let log = self.log.lock();
        if let Some(mmap) = &log.mmap {
            mmap.flush()?;
        }
        Ok(())
    }
}

/// Place `entry` at depth `values.len()`, creating interior nodes on
/// missing edges and replacing any existing leaf.
fn insert(root: &mut Node, entry: &Arc<IndexEntry>) {
    let mut node = root;
    let last = entry.values.len() - 1;

    for value in &entry.values[..last] {
        node = match node {
            Node::Interior(children) => children
                .entry(value.clone())
                .or_insert_with(|| Node::Interior(BTreeMap::new())),
            // fixed arity keeps leaves out of interior levels
            Node::Leaf(_) => return,
        };
    }

    if let Node::Interior(children) = node {
        children.insert(
            entry.values[last].clone(),
            Node::Leaf(Arc::clone(entry)),
        );
    }
}

/// Gather every leaf under `node` in traversal order
fn collect(node: &Node, leaves: &mut Vec<Arc<IndexEntry>>) {
    match node {
        Node::Leaf(entry) => leaves.push(Arc::clone(entry)),
        Node::Interior(children) => {
            for child in children.values() {
                collect(child, leaves);
            }
        }
    }
}
