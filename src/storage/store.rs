//! The in-memory block store.
//!
//! This is the central component of the storage layer. Everything else reads
//! blocks through it. The store is fully materialized before any walk starts
//! and is never mutated by a walk.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::storage::block::{Block, BlockKind, LinkRepr};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::BlockId;

/// Mapping from block identifier to decoded block.
#[derive(Debug, Clone, Default)]
pub struct BlockStore {
    blocks: HashMap<BlockId, Block>,
}

impl BlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            blocks: HashMap::with_capacity(capacity),
        }
    }

    /// Insert a block, returning the previous block under that id.
    pub fn insert(&mut self, id: BlockId, block: Block) -> Option<Block> {
        self.blocks.insert(id, block)
    }

    /// Insert a raw decoded JSON object.
    pub fn insert_value(&mut self, id: BlockId, value: Value) -> StorageResult<()> {
        let block = Block::from_value(&id, value)?;
        self.blocks.insert(id, block);
        Ok(())
    }

    pub fn get(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.get(id)
    }

    /// Look a block up, failing with `MissingBlock` if it is absent.
    pub fn require(&self, id: &BlockId) -> StorageResult<&Block> {
        self.blocks
            .get(id)
            .ok_or_else(|| StorageError::MissingBlock { id: id.clone() })
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.blocks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BlockId, &Block)> {
        self.blocks.iter()
    }

    /// Count blocks by shape.
    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        for block in self.blocks.values() {
            match block.kind() {
                BlockKind::Commit => stats.commits += 1,
                BlockKind::Node => stats.nodes += 1,
                BlockKind::Record => stats.records += 1,
            }
        }
        stats
    }
}

/// Block counts by shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub commits: usize,
    pub nodes: usize,
    pub records: usize,
}

impl StoreStats {
    pub fn total(&self) -> usize {
        self.commits + self.nodes + self.records
    }
}

/// A decoded repository export: its root pointers plus every block.
///
/// The on-disk form is JSON:
///
/// ```text
/// { "roots": ["<cid>"], "blocks": { "<cid>": { ... }, ... } }
/// ```
#[derive(Debug, Clone, Default)]
pub struct RepoExport {
    pub roots: Vec<BlockId>,
    pub store: BlockStore,
}

#[derive(Deserialize)]
struct ExportJson {
    #[serde(default)]
    roots: Vec<LinkRepr>,
    blocks: BTreeMap<String, Value>,
}

impl RepoExport {
    /// Load an export from a JSON file.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let export = Self::from_reader(BufReader::new(file))?;
        debug!(
            path = %path.display(),
            blocks = export.store.len(),
            roots = export.roots.len(),
            "loaded repository export"
        );
        Ok(export)
    }

    pub fn from_reader(reader: impl Read) -> StorageResult<Self> {
        let raw: ExportJson = serde_json::from_reader(reader)?;
        Self::from_raw(raw)
    }

    pub fn from_json_str(json: &str) -> StorageResult<Self> {
        let raw: ExportJson = serde_json::from_str(json)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: ExportJson) -> StorageResult<Self> {
        let roots = raw
            .roots
            .into_iter()
            .map(LinkRepr::into_block_id)
            .collect::<Result<Vec<_>, _>>()?;

        let mut store = BlockStore::with_capacity(raw.blocks.len());
        for (id, value) in raw.blocks {
            store.insert_value(BlockId::new(id)?, value)?;
        }

        Ok(Self { roots, store })
    }
}
