//! storage layer for repowalk
//!
//! this module reads a decoded repository export: a content-addressed block
//! store holding commits, tree nodes and records. The upper layers (record
//! extraction, export) use this API and never look at raw block fields.
//!
//!  # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        BlockStore                           │
//! │          (id -> decoded block, loaded from JSON)            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │   commit    │       │    tree     │       │    block    │
//!  │  (history)  │──────▶│   (keys)    │──────▶│  (shapes)   │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//!  ```
//!
//! # Usage
//!
//! ```no_run
//! use repowalk::storage::{history, RecordCache, RepoExport};
//!
//! let export = RepoExport::open("./repo.json")?;
//! let mut cache = RecordCache::new();
//!
//! for step in history(&export.store, &mut cache) {
//!     let step = step?;
//!     println!("{} +{} -{}", step.commit.rev, step.diff.created.len(), step.diff.deleted.len());
//! }
//! # Ok::<(), repowalk::storage::StorageError>(())
//! ```

mod block;
mod commit;
mod error;
#[cfg(test)]
pub(crate) mod fixture;
mod store;
mod tid;
mod tree;
mod types;

// Re-export public API
pub use block::{Block, BlockKind, KeyError, TreeEntry, TreeNode};
pub use commit::{
    diff_keys, history, latest_commit, list_commits, scan_commits, CommitDiff, CommitInfo,
    CommitScan, CommitStep, HistoryWalker,
};
pub use error::{StorageError, StorageResult};
pub use store::{BlockStore, RepoExport, StoreStats};
pub use tid::{s32_decode, s32_encode, Revision, RevisionParts, TidError};
pub use tree::{enumerate_keys, CachedRecord, RecordCache, TreeWalker, WalkOptions};
pub use types::{BlockId, Change, ChangeStatus, InvalidIdError, RecordKey};

// Re-export for internal use by other modules
pub(crate) use block::LinkRepr;
