//! Key enumeration over a block tree.
//!
//! A tree node holds a sorted run of entries with prefix-compressed keys, a
//! pointer to the subtree left of its first entry and, per entry, a pointer to
//! the subtree between that entry and the next. An in-order walk therefore
//! yields keys in ascending order:
//!
//! ```text
//!            [ l | e0 t0 | e1 t1 ]
//!             /       |       \
//!         left     right(e0)  right(e1)
//! ```
//!
//! Prefix compression is scoped to one node: the first entry of every node
//! starts from the empty key, no matter what the parent emitted before it.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, trace};

use crate::storage::block::Block;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::store::BlockStore;
use crate::storage::types::{BlockId, RecordKey};

/// Knobs for a single walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOptions {
    /// how many subtree levels below the root a walk may descend
    pub max_depth: usize,
    /// fail when a key is not strictly greater than the one before it
    pub verify_order: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            max_depth: 128,
            verify_order: true,
        }
    }
}

impl WalkOptions {
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn verify_order(mut self, verify: bool) -> Self {
        self.verify_order = verify;
        self
    }
}

/// A record block as first seen by a walk.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRecord {
    pub block_id: BlockId,
    pub block: Block,
}

/// Key to record mapping filled in by walks.
///
/// The cache is insert-once: a key that is already present is never remapped.
/// It is owned by the caller and passed to each walk explicitly.
#[derive(Debug, Clone, Default)]
pub struct RecordCache {
    entries: BTreeMap<RecordKey, CachedRecord>,
}

impl RecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &RecordKey) -> Option<&CachedRecord> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.entries.contains_key(key)
    }

    /// insert unless present; returns whether the key was new
    pub fn insert_once(&mut self, key: RecordKey, record: CachedRecord) -> bool {
        match self.entries.entry(key) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RecordKey, &CachedRecord)> {
        self.entries.iter()
    }
}

enum Step {
    Visit { id: BlockId, depth: usize },
    Emit { key: RecordKey, value: BlockId },
}

/// Walks trees in one block store.
#[derive(Debug, Clone, Copy)]
pub struct TreeWalker<'s> {
    store: &'s BlockStore,
    options: WalkOptions,
}

impl<'s> TreeWalker<'s> {
    pub fn new(store: &'s BlockStore) -> Self {
        Self {
            store,
            options: WalkOptions::default(),
        }
    }

    pub fn with_options(store: &'s BlockStore, options: WalkOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> WalkOptions {
        self.options
    }

    /// Enumerate every key reachable from `root`, in ascending order.
    ///
    /// Keys not yet in `cache` are added with the record block they point at.
    /// A failed walk leaves `cache` untouched and returns no keys.
    pub fn enumerate(&self, root: &BlockId, cache: &mut RecordCache) -> StorageResult<Vec<RecordKey>> {
        let mut stack = vec![Step::Visit {
            id: root.clone(),
            depth: 0,
        }];
        let mut visited: HashSet<BlockId> = HashSet::new();
        let mut staged: BTreeMap<RecordKey, CachedRecord> = BTreeMap::new();
        let mut keys: Vec<RecordKey> = Vec::new();

        while let Some(step) = stack.pop() {
            match step {
                Step::Visit { id, depth } => {
                    if depth > self.options.max_depth {
                        return Err(StorageError::TreeTooDeep {
                            root: root.clone(),
                            max_depth: self.options.max_depth,
                        });
                    }
                    if !visited.insert(id.clone()) {
                        return Err(StorageError::CycleDetected { id });
                    }

                    let node = self.store.require(&id)?.as_node(&id)?;
                    trace!(node = id.short(), depth, entries = node.entries.len(), "visiting node");

                    // right subtrees and keys go on the stack in reverse so
                    // they pop in stored order, after the left subtree
                    let mut pending = Vec::with_capacity(node.entries.len() * 2);
                    let mut previous = String::new();
                    for (index, entry) in node.entries.into_iter().enumerate() {
                        let key = entry.reconstruct_key(&previous).map_err(|e| {
                            StorageError::MalformedEntry {
                                node: id.clone(),
                                index,
                                reason: e.to_string(),
                            }
                        })?;
                        previous.clone_from(&key);

                        pending.push(Step::Emit {
                            key: RecordKey::new(key),
                            value: entry.value,
                        });
                        if let Some(right) = entry.right {
                            pending.push(Step::Visit {
                                id: right,
                                depth: depth + 1,
                            });
                        }
                    }
                    stack.extend(pending.into_iter().rev());

                    if let Some(left) = node.left {
                        stack.push(Step::Visit {
                            id: left,
                            depth: depth + 1,
                        });
                    }
                }
                Step::Emit { key, value } => {
                    if self.options.verify_order {
                        if let Some(last) = keys.last() {
                            if key <= *last {
                                return Err(StorageError::KeyOutOfOrder {
                                    previous: last.clone(),
                                    key,
                                });
                            }
                        }
                    }

                    if !cache.contains(&key) && !staged.contains_key(&key) {
                        let block = self.store.require(&value)?.clone();
                        staged.insert(
                            key.clone(),
                            CachedRecord {
                                block_id: value,
                                block,
                            },
                        );
                    }
                    keys.push(key);
                }
            }
        }

        let fresh = staged.len();
        for (key, record) in staged {
            cache.insert_once(key, record);
        }
        debug!(root = root.short(), keys = keys.len(), fresh, "walked tree");

        Ok(keys)
    }
}

/// Enumerate keys under `root` with default options.
pub fn enumerate_keys(
    store: &BlockStore,
    root: &BlockId,
    cache: &mut RecordCache,
) -> StorageResult<Vec<RecordKey>> {
    TreeWalker::new(store).enumerate(root, cache)
}
