//!  Commit discovery, history traversal and diffs.
//!
//!  every commit block in an export names the tree root of one revision.
//!  walking them oldest-first and diffing consecutive key lists recovers
//!  which records each commit created or deleted.

use std::collections::BTreeSet;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::storage::block::{BlockKind, LinkRepr};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::store::BlockStore;
use crate::storage::tid::Revision;
use crate::storage::tree::{RecordCache, TreeWalker, WalkOptions};
use crate::storage::types::{BlockId, Change, ChangeStatus, RecordKey};

/// information about a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: BlockId,
    pub rev: Revision,
    /// root of this revision's tree
    pub data: BlockId,
    pub prev: Option<BlockId>,
    pub did: Option<String>,
    pub version: Option<u64>,
}

#[derive(Deserialize)]
struct RawCommit {
    rev: String,
    #[serde(default)]
    data: Option<LinkRepr>,
    #[serde(default)]
    prev: Option<LinkRepr>,
    #[serde(default)]
    did: Option<String>,
    #[serde(default)]
    version: Option<u64>,
}

impl CommitInfo {
    /// read a commit block
    pub fn from_store(store: &BlockStore, id: &BlockId) -> StorageResult<Self> {
        let block = store.require(id)?;
        let kind = block.kind();
        if kind != BlockKind::Commit {
            return Err(StorageError::UnexpectedBlockKind {
                id: id.clone(),
                expected: BlockKind::Commit.as_str(),
                found: kind.as_str(),
            });
        }

        let invalid = |reason: String| StorageError::InvalidCommit {
            id: id.clone(),
            reason,
        };

        let raw: RawCommit =
            serde_json::from_value(block.to_value()).map_err(|e| invalid(e.to_string()))?;
        let data = raw
            .data
            .ok_or_else(|| invalid("missing field `data`".into()))?
            .into_block_id()
            .map_err(|e| invalid(format!("data pointer: {}", e)))?;
        let prev = raw
            .prev
            .map(LinkRepr::into_block_id)
            .transpose()
            .map_err(|e| invalid(format!("prev pointer: {}", e)))?;

        Ok(Self {
            id: id.clone(),
            rev: Revision::new(raw.rev),
            data,
            prev,
            did: raw.did,
            version: raw.version,
        })
    }
}

/// Commit blocks found in a store.
#[derive(Debug, Default)]
pub struct CommitScan {
    /// readable commits, ordered by revision ascending
    pub commits: Vec<CommitInfo>,
    /// commit blocks that could not be read, in block id order
    pub unreadable: Vec<StorageError>,
}

/// read every commit block, keeping going past the ones that fail
///
/// equal revisions fall back to block id order.
pub fn scan_commits(store: &BlockStore) -> CommitScan {
    let mut ids: Vec<&BlockId> = store
        .iter()
        .filter(|(_, block)| block.kind() == BlockKind::Commit)
        .map(|(id, _)| id)
        .collect();
    ids.sort();

    let mut scan = CommitScan::default();
    for id in ids {
        match CommitInfo::from_store(store, id) {
            Ok(commit) => scan.commits.push(commit),
            Err(e) => {
                warn!(commit = %id, error = %e, "unreadable commit block");
                scan.unreadable.push(e);
            }
        }
    }

    scan.commits.sort_by(|a, b| a.rev.cmp(&b.rev).then_with(|| a.id.cmp(&b.id)));

    for pair in scan.commits.windows(2) {
        if pair[0].rev == pair[1].rev {
            warn!(
                rev = %pair[0].rev,
                first = %pair[0].id,
                second = %pair[1].id,
                "commits share a revision, ordering by block id"
            );
        }
    }

    scan
}

/// every commit in the store, ordered by revision ascending
///
/// fails on the first commit block that cannot be read.
pub fn list_commits(store: &BlockStore) -> StorageResult<Vec<CommitInfo>> {
    let scan = scan_commits(store);
    match scan.unreadable.into_iter().next() {
        Some(e) => Err(e),
        None => Ok(scan.commits),
    }
}

/// the commit with the highest revision, if any
pub fn latest_commit(store: &BlockStore) -> StorageResult<Option<CommitInfo>> {
    Ok(list_commits(store)?.pop())
}

/// keys created and deleted between two commits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitDiff {
    pub created: BTreeSet<RecordKey>,
    pub deleted: BTreeSet<RecordKey>,
}

impl CommitDiff {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.created.len() + self.deleted.len()
    }

    /// all changes, creations first, each group in key order
    pub fn changes(&self) -> Vec<Change> {
        let created = self.created.iter().map(|key| Change {
            key: key.clone(),
            status: ChangeStatus::Created,
        });
        let deleted = self.deleted.iter().map(|key| Change {
            key: key.clone(),
            status: ChangeStatus::Deleted,
        });
        created.chain(deleted).collect()
    }

    /// a single change: some creation if there is one, else some deletion
    ///
    /// matches the one-change-per-commit view of history that assumes every
    /// commit touches exactly one record.
    pub fn first_change(&self) -> Option<Change> {
        self.changes().into_iter().next()
    }
}

/// compute the diff between the key lists of two commits
pub fn diff_keys(previous: &[RecordKey], current: &[RecordKey]) -> CommitDiff {
    let last: BTreeSet<&RecordKey> = previous.iter().collect();
    let curr: BTreeSet<&RecordKey> = current.iter().collect();

    CommitDiff {
        created: curr.difference(&last).map(|k| (*k).clone()).collect(),
        deleted: last.difference(&curr).map(|k| (*k).clone()).collect(),
    }
}

/// one commit of history with its keys and what changed since the last one
#[derive(Debug, Clone)]
pub struct CommitStep {
    pub commit: CommitInfo,
    pub keys: Vec<RecordKey>,
    pub diff: CommitDiff,
}

/// iterate over commit history, oldest first
///
/// each item is one commit; a commit whose tree cannot be walked yields its
/// error and the next commit is diffed against the last one that succeeded.
/// commit blocks that cannot be read at all have no revision to order them
/// by, so their errors come before every walked commit.
pub struct HistoryWalker<'s, 'c> {
    walker: TreeWalker<'s>,
    unreadable: std::vec::IntoIter<StorageError>,
    commits: std::vec::IntoIter<CommitInfo>,
    cache: &'c mut RecordCache,
    last_keys: Vec<RecordKey>,
}

impl<'s, 'c> HistoryWalker<'s, 'c> {
    /// create a new history walker over every commit in `store`
    pub fn new(store: &'s BlockStore, cache: &'c mut RecordCache) -> Self {
        Self::with_options(store, cache, WalkOptions::default())
    }

    pub fn with_options(
        store: &'s BlockStore,
        cache: &'c mut RecordCache,
        options: WalkOptions,
    ) -> Self {
        let scan = scan_commits(store);
        debug!(
            commits = scan.commits.len(),
            unreadable = scan.unreadable.len(),
            "walking history"
        );

        Self {
            walker: TreeWalker::with_options(store, options),
            unreadable: scan.unreadable.into_iter(),
            commits: scan.commits.into_iter(),
            cache,
            last_keys: Vec::new(),
        }
    }

    /// items not yielded yet
    pub fn remaining(&self) -> usize {
        self.unreadable.len() + self.commits.len()
    }

    /// records seen by the commits walked so far
    pub fn cache(&self) -> &RecordCache {
        self.cache
    }
}

impl Iterator for HistoryWalker<'_, '_> {
    type Item = StorageResult<CommitStep>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.unreadable.next() {
            return Some(Err(e));
        }
        let commit = self.commits.next()?;

        let keys = match self.walker.enumerate(&commit.data, self.cache) {
            Ok(keys) => keys,
            Err(e) => return Some(Err(e)),
        };
        let diff = diff_keys(&self.last_keys, &keys);
        debug!(
            commit = commit.id.short(),
            rev = %commit.rev,
            keys = keys.len(),
            created = diff.created.len(),
            deleted = diff.deleted.len(),
            "walked commit"
        );

        self.last_keys.clone_from(&keys);
        Some(Ok(CommitStep { commit, keys, diff }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

/// get history for a store
pub fn history<'s, 'c>(
    store: &'s BlockStore,
    cache: &'c mut RecordCache,
) -> HistoryWalker<'s, 'c> {
    HistoryWalker::new(store, cache)
}
