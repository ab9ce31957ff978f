//! Turning commit diffs into a stream of create/delete events.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::error::{RecordError, RecordResult};
use super::parse::{parse_record, Collection, RecordBody};
use crate::storage::{Change, ChangeStatus, CommitStep, RecordCache, Revision, StorageResult};

/// One record created or deleted by a commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepoEvent {
    pub did: String,
    /// commit time decoded from the revision
    pub ts: DateTime<Utc>,
    pub clock_id: u64,
    pub rev: Revision,
    pub collection: Collection,
    pub rkey: String,
    pub uri: String,
    pub op: ChangeStatus,
    /// parsed record for creates, absent for deletes
    #[serde(flatten)]
    pub body: Option<RecordBody>,
}

/// events for one commit plus the changes that could not be turned into one
#[derive(Debug, Clone, Default)]
pub struct EventBatch {
    pub events: Vec<RepoEvent>,
    pub rejected: usize,
}

/// Builds events for one repository, keeping only the given collections.
#[derive(Debug, Clone, Copy)]
pub struct EventBuilder<'a> {
    did: &'a str,
    collections: &'a [Collection],
}

impl<'a> EventBuilder<'a> {
    pub fn new(did: &'a str, collections: &'a [Collection]) -> Self {
        Self { did, collections }
    }

    /// events for every change in `step`
    ///
    /// fails only when the commit's revision cannot be decoded; problems with
    /// single changes are logged and counted in `rejected`.
    pub fn build(&self, step: &CommitStep, cache: &RecordCache) -> StorageResult<EventBatch> {
        let parts = step.commit.rev.parse()?;
        let ts = parts.timestamp()?;

        let mut batch = EventBatch::default();
        for change in step.diff.changes() {
            match self.event(&change, cache) {
                Ok(Some((collection, rkey, body))) => batch.events.push(RepoEvent {
                    did: self.did.to_string(),
                    ts,
                    clock_id: parts.clock_id,
                    rev: step.commit.rev.clone(),
                    collection,
                    rkey,
                    uri: format!("at://{}/{}", self.did, change.key),
                    op: change.status,
                    body,
                }),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        did = self.did,
                        rev = %step.commit.rev,
                        key = %change.key,
                        error = %e,
                        "skipping change"
                    );
                    batch.rejected += 1;
                }
            }
        }

        Ok(batch)
    }

    fn event(
        &self,
        change: &Change,
        cache: &RecordCache,
    ) -> RecordResult<Option<(Collection, String, Option<RecordBody>)>> {
        let (nsid, rkey) = change
            .key
            .split()
            .ok_or_else(|| RecordError::MissingCollection(change.key.clone()))?;

        let Some(collection) = Collection::from_nsid(nsid).filter(|c| self.collections.contains(c))
        else {
            debug!(collection = nsid, "collection not exported");
            return Ok(None);
        };

        let body = match change.status {
            ChangeStatus::Deleted => None,
            ChangeStatus::Created => {
                let record = cache
                    .get(&change.key)
                    .ok_or_else(|| RecordError::NotCached(change.key.clone()))?;
                Some(parse_record(collection, &record.block.to_value())?)
            }
        };

        Ok(Some((collection, rkey.to_string(), body)))
    }
}
