//! Export API - writes repository contents out as day-partitioned JSON Lines.

use std::ops::AddAssign;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use super::sink::{
    partition_date, prepare_dir, DateWindow, PartitionedSink, DEFAULT_MAX_OPEN_FILES,
};
use crate::records::{Collection, EventBuilder};
use crate::storage::{
    scan_commits, HistoryWalker, RecordCache, RepoExport, StorageError, TreeWalker, WalkOptions,
};

/// Result type for export operations.
pub type ExportResult<T> = Result<T, ExportError>;

/// Export errors.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid date: {0:?}")]
    InvalidDate(String),

    #[error("repository has no commits")]
    NoCommits,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// What to do when a commit cannot be walked or turned into events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// stop the export and return the error
    Abort,
    /// log it, count it and carry on with the next commit
    #[default]
    SkipCommit,
}

/// What an export of one repository writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportMode {
    /// the records of the latest commit
    #[default]
    Snapshot,
    /// one event per record created or deleted by each commit
    Events,
}

/// Export configuration options.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Directory the day files are written to.
    pub out_dir: PathBuf,
    /// Days outside this window are dropped.
    pub window: DateWindow,
    /// Collections to export.
    pub collections: Vec<Collection>,
    pub error_policy: ErrorPolicy,
    /// Remove the output directory before writing.
    pub clean: bool,
    /// Day files kept open at once.
    pub max_open_files: usize,
    pub walk: WalkOptions,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("stream"),
            window: DateWindow::default(),
            collections: vec![
                Collection::Like,
                Collection::Post,
                Collection::Repost,
                Collection::Follow,
                Collection::Block,
            ],
            error_policy: ErrorPolicy::default(),
            clean: false,
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            walk: WalkOptions::default(),
        }
    }
}

impl ExportConfig {
    /// Create a new configuration writing to the given directory.
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            ..Default::default()
        }
    }

    pub fn window(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.window = DateWindow::new(start, end);
        self
    }

    pub fn collections(mut self, collections: Vec<Collection>) -> Self {
        self.collections = collections;
        self
    }

    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn clean(mut self, value: bool) -> Self {
        self.clean = value;
        self
    }

    pub fn max_open_files(mut self, value: usize) -> Self {
        self.max_open_files = value;
        self
    }

    pub fn walk_options(mut self, options: WalkOptions) -> Self {
        self.walk = options;
        self
    }

    pub fn validate(&self) -> ExportResult<()> {
        if self.window.start > self.window.end {
            return Err(ExportError::InvalidConfig(format!(
                "window starts after it ends ({} > {})",
                self.window.start, self.window.end
            )));
        }
        if self.collections.is_empty() {
            return Err(ExportError::InvalidConfig("no collections selected".into()));
        }
        Ok(())
    }
}

/// Counters for one export run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportStats {
    pub commits: usize,
    pub skipped_commits: usize,
    /// lines written
    pub written: usize,
    /// items dropped for falling outside the window
    pub filtered: usize,
    /// items dropped for being unusable
    pub errors: usize,
}

impl AddAssign for ExportStats {
    fn add_assign(&mut self, other: Self) {
        self.commits += other.commits;
        self.skipped_commits += other.skipped_commits;
        self.written += other.written;
        self.filtered += other.filtered;
        self.errors += other.errors;
    }
}

/// Writes repositories into one shared output directory.
pub struct Exporter {
    config: ExportConfig,
    sink: PartitionedSink,
}

impl Exporter {
    /// Validate the configuration and prepare the output directory.
    pub fn open(config: ExportConfig) -> ExportResult<Self> {
        config.validate()?;
        prepare_dir(&config.out_dir, config.clean)?;
        let sink = PartitionedSink::new(&config.out_dir, config.window)
            .with_max_open(config.max_open_files);
        Ok(Self { config, sink })
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// record that an account exists, dated by its creation time
    pub fn write_actor(&self, did: &str, created_at: &str) -> ExportResult<ExportStats> {
        let mut line = Map::new();
        line.insert("did".into(), did.into());
        line.insert("$type".into(), Collection::Profile.nsid().into());
        line.insert("createdAt".into(), created_at.into());

        let mut stats = ExportStats::default();
        self.write_dated(created_at, &Value::Object(line), &mut stats)?;
        Ok(stats)
    }

    /// export one repository, led by its account line when `actor_created_at`
    /// is given
    pub fn export_repo(
        &self,
        did: &str,
        export: &RepoExport,
        mode: ExportMode,
        actor_created_at: Option<&str>,
    ) -> ExportResult<ExportStats> {
        let mut stats = match actor_created_at {
            Some(created_at) => self.write_actor(did, created_at)?,
            None => ExportStats::default(),
        };
        stats += match mode {
            ExportMode::Snapshot => self.export_snapshot(did, export)?,
            ExportMode::Events => self.export_events(did, export)?,
        };
        Ok(stats)
    }

    /// write every selected record in the repository's latest commit
    pub fn export_snapshot(&self, did: &str, export: &RepoExport) -> ExportResult<ExportStats> {
        let mut stats = ExportStats::default();

        let scan = scan_commits(&export.store);
        for e in scan.unreadable {
            self.skip_commit(did, e.into(), &mut stats)?;
        }
        let commit = scan.commits.last().ok_or(ExportError::NoCommits)?;

        let mut cache = RecordCache::new();
        let keys = TreeWalker::with_options(&export.store, self.config.walk)
            .enumerate(&commit.data, &mut cache)?;
        stats.commits += 1;
        for key in &keys {
            let Some(record) = cache.get(key) else {
                continue;
            };
            let selected = record
                .block
                .record_type()
                .and_then(Collection::from_nsid)
                .is_some_and(|c| self.config.collections.contains(&c));
            if !selected {
                continue;
            }

            // fields of the record win over the ones added here
            let mut line = record.block.fields().clone();
            line.entry("did").or_insert_with(|| did.into());
            line.entry("uri")
                .or_insert_with(|| format!("at://{}/{}", did, key).into());
            let created_at = record.block.created_at().unwrap_or_default().to_string();

            self.write_dated(&created_at, &Value::Object(line), &mut stats)?;
        }

        info!(
            did,
            rev = %commit.rev,
            records = keys.len(),
            written = stats.written,
            filtered = stats.filtered,
            errors = stats.errors,
            "exported snapshot"
        );
        Ok(stats)
    }

    /// write one event per created or deleted record, commit by commit
    pub fn export_events(&self, did: &str, export: &RepoExport) -> ExportResult<ExportStats> {
        let builder = EventBuilder::new(did, &self.config.collections);

        let mut cache = RecordCache::new();
        let mut history = HistoryWalker::with_options(&export.store, &mut cache, self.config.walk);
        let mut stats = ExportStats::default();

        while let Some(step) = history.next() {
            let batch = match step.and_then(|step| builder.build(&step, history.cache())) {
                Ok(batch) => batch,
                Err(e) => {
                    self.skip_commit(did, e.into(), &mut stats)?;
                    continue;
                }
            };

            stats.commits += 1;
            stats.errors += batch.rejected;
            for event in &batch.events {
                if self.sink.write(event.ts.date_naive(), event)? {
                    stats.written += 1;
                } else {
                    stats.filtered += 1;
                }
            }
        }

        info!(
            did,
            commits = stats.commits,
            skipped = stats.skipped_commits,
            written = stats.written,
            filtered = stats.filtered,
            errors = stats.errors,
            "exported events"
        );
        Ok(stats)
    }

    /// flush every open day file
    pub fn finish(self) -> ExportResult<()> {
        self.sink.flush()
    }

    /// apply the error policy to a commit that cannot be exported
    fn skip_commit(
        &self,
        did: &str,
        error: ExportError,
        stats: &mut ExportStats,
    ) -> ExportResult<()> {
        match self.config.error_policy {
            ErrorPolicy::Abort => Err(error),
            ErrorPolicy::SkipCommit => {
                warn!(did, %error, "skipping commit");
                stats.skipped_commits += 1;
                Ok(())
            }
        }
    }

    fn write_dated(
        &self,
        created_at: &str,
        line: &Value,
        stats: &mut ExportStats,
    ) -> ExportResult<()> {
        let date = match partition_date(created_at) {
            Ok(date) => date,
            Err(e) => {
                warn!(error = %e, "record has no usable date");
                stats.errors += 1;
                return Ok(());
            }
        };

        if self.sink.write(date, line)? {
            stats.written += 1;
        } else {
            stats.filtered += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::storage::fixture::StoreBuilder;
    use crate::storage::BlockId;

    const DID: &str = "did:plc:testrepo";

    fn lines(path: &Path) -> Vec<Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn like(builder: &mut StoreBuilder, created_at: &str) -> BlockId {
        builder.raw(json!({
            "$type": "app.bsky.feed.like",
            "subject": {"uri": "at://did:plc:other/app.bsky.feed.post/1", "cid": "bafy"},
            "createdAt": created_at
        }))
    }

    fn export_of(builder: StoreBuilder) -> RepoExport {
        RepoExport {
            roots: Vec::new(),
            store: builder.build(),
        }
    }

    #[test]
    fn test_config_builder() {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2023, 2, 1).unwrap();
        let config = ExportConfig::new("out")
            .window(start, end)
            .collections(vec![Collection::Post])
            .error_policy(ErrorPolicy::Abort)
            .clean(true);

        assert_eq!(config.out_dir, PathBuf::from("out"));
        assert_eq!(config.window, DateWindow::new(start, end));
        assert_eq!(config.collections, vec![Collection::Post]);
        assert_eq!(config.error_policy, ErrorPolicy::Abort);
        assert!(config.clean);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_bad_window() {
        let config = ExportConfig::new("out").window(
            NaiveDate::from_ymd_opt(2023, 2, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
        );
        assert!(matches!(config.validate(), Err(ExportError::InvalidConfig(_))));

        let config = ExportConfig::new("out").collections(Vec::new());
        assert!(matches!(config.validate(), Err(ExportError::InvalidConfig(_))));
    }

    #[test]
    fn test_snapshot_export() {
        let mut builder = StoreBuilder::new();
        let old_like = like(&mut builder, "2023-04-01T10:00:00.000Z");
        let new_like = like(&mut builder, "2023-04-02T10:00:00.000Z");
        let too_late = like(&mut builder, "2024-01-01T00:00:00.000Z");
        let undated = builder.raw(json!({"$type": "app.bsky.feed.like", "createdAt": "soon"}));
        let list = builder.record("app.bsky.graph.list/1");
        let root = builder.node(
            None,
            &[
                ("app.bsky.feed.like/1", old_like, None),
                ("app.bsky.feed.like/2", new_like, None),
                ("app.bsky.feed.like/3", too_late, None),
                ("app.bsky.feed.like/4", undated, None),
                ("app.bsky.graph.list/1", list, None),
            ],
        );
        builder.commit("3jzfcijpj2z2a", &root);
        let export = export_of(builder);

        let dir = TempDir::new().unwrap();
        let exporter = Exporter::open(ExportConfig::new(dir.path())).unwrap();
        let stats = exporter.export_snapshot(DID, &export).unwrap();
        exporter.finish().unwrap();

        assert_eq!(stats.written, 2);
        assert_eq!(stats.filtered, 1);
        assert_eq!(stats.errors, 1);

        let day = lines(&dir.path().join("2023-04-01.jsonl"));
        assert_eq!(day.len(), 1);
        assert_eq!(day[0]["did"], DID);
        assert_eq!(day[0]["$type"], "app.bsky.feed.like");
        assert_eq!(day[0]["uri"], "at://did:plc:testrepo/app.bsky.feed.like/1");
        assert_eq!(day[0]["subject"]["uri"], "at://did:plc:other/app.bsky.feed.post/1");
    }

    #[test]
    fn test_snapshot_without_commits() {
        let dir = TempDir::new().unwrap();
        let exporter = Exporter::open(ExportConfig::new(dir.path())).unwrap();
        let result = exporter.export_snapshot(DID, &export_of(StoreBuilder::new()));
        assert!(matches!(result, Err(ExportError::NoCommits)));
    }

    #[test]
    fn test_event_export() {
        let mut builder = StoreBuilder::new();
        let first = like(&mut builder, "2023-06-30T09:00:00.000Z");
        let second = like(&mut builder, "2023-06-30T09:05:00.000Z");
        let tree_a = builder.node(None, &[("app.bsky.feed.like/1", first, None)]);
        let tree_b = builder.node(None, &[("app.bsky.feed.like/2", second, None)]);
        builder.commit("3jzfcijpj2z2a", &tree_a);
        builder.commit("3jzfcijpj2z2b", &tree_b);
        let export = export_of(builder);

        let dir = TempDir::new().unwrap();
        let exporter = Exporter::open(ExportConfig::new(dir.path())).unwrap();
        let stats = exporter.export_events(DID, &export).unwrap();
        exporter.finish().unwrap();

        assert_eq!(stats.commits, 2);
        assert_eq!(stats.written, 3);

        let events = lines(&dir.path().join("2023-06-30.jsonl"));
        let ops: Vec<(&str, &str)> = events
            .iter()
            .map(|e| (e["op"].as_str().unwrap(), e["rkey"].as_str().unwrap()))
            .collect();
        assert_eq!(ops, vec![("create", "1"), ("create", "2"), ("delete", "1")]);
        assert_eq!(events[0]["subject_uri"], "at://did:plc:other/app.bsky.feed.post/1");
    }

    #[test]
    fn test_event_export_error_policy() {
        let build = || {
            let mut builder = StoreBuilder::new();
            let good = like(&mut builder, "2023-06-30T09:00:00.000Z");
            let tree = builder.node(None, &[("app.bsky.feed.like/1", good, None)]);
            let broken = builder.raw(json!({"l": "bafymissing", "e": []}));
            builder.commit("3jzfcijpj2z2a", &tree);
            builder.commit("3jzfcijpj2z2b", &broken);
            export_of(builder)
        };

        let dir = TempDir::new().unwrap();
        let skipping = Exporter::open(ExportConfig::new(dir.path().join("skip"))).unwrap();
        let stats = skipping.export_events(DID, &build()).unwrap();
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.skipped_commits, 1);
        assert_eq!(stats.written, 1);

        let aborting = Exporter::open(
            ExportConfig::new(dir.path().join("abort")).error_policy(ErrorPolicy::Abort),
        )
        .unwrap();
        let result = aborting.export_events(DID, &build());
        assert!(matches!(
            result,
            Err(ExportError::Storage(StorageError::MissingBlock { .. }))
        ));
    }

    #[test]
    fn test_unreadable_commit_block_follows_policy() {
        let build = || {
            let mut builder = StoreBuilder::new();
            let good = like(&mut builder, "2023-06-30T09:00:00.000Z");
            let tree = builder.node(None, &[("app.bsky.feed.like/1", good, None)]);
            builder.commit("3jzfcijpj2z2a", &tree);
            builder.raw(json!({"rev": "3jzfcijpj2z2b"}));
            export_of(builder)
        };

        let dir = TempDir::new().unwrap();
        let events_out = dir.path().join("events");
        let skipping = Exporter::open(ExportConfig::new(&events_out)).unwrap();
        let stats = skipping.export_events(DID, &build()).unwrap();
        skipping.finish().unwrap();
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.skipped_commits, 1);
        assert_eq!(stats.written, 1);
        assert_eq!(lines(&events_out.join("2023-06-30.jsonl")).len(), 1);

        let snapshot = Exporter::open(ExportConfig::new(dir.path().join("snapshot"))).unwrap();
        let stats = snapshot.export_snapshot(DID, &build()).unwrap();
        assert_eq!(stats.skipped_commits, 1);
        assert_eq!(stats.written, 1);

        let aborting = Exporter::open(
            ExportConfig::new(dir.path().join("abort")).error_policy(ErrorPolicy::Abort),
        )
        .unwrap();
        assert!(matches!(
            aborting.export_events(DID, &build()),
            Err(ExportError::Storage(StorageError::InvalidCommit { .. }))
        ));
        assert!(matches!(
            aborting.export_snapshot(DID, &build()),
            Err(ExportError::Storage(StorageError::InvalidCommit { .. }))
        ));
    }

    #[test]
    fn test_export_repo_leads_with_actor() {
        let mut builder = StoreBuilder::new();
        let first = like(&mut builder, "2023-06-30T09:00:00.000Z");
        let tree = builder.node(None, &[("app.bsky.feed.like/1", first, None)]);
        builder.commit("3jzfcijpj2z2a", &tree);
        let export = export_of(builder);

        let dir = TempDir::new().unwrap();
        let exporter = Exporter::open(ExportConfig::new(dir.path())).unwrap();
        let stats = exporter
            .export_repo(DID, &export, ExportMode::Events, Some("2023-06-30T00:00:00.000Z"))
            .unwrap();
        exporter.finish().unwrap();

        assert_eq!(stats.commits, 1);
        assert_eq!(stats.written, 2);
        let day = lines(&dir.path().join("2023-06-30.jsonl"));
        assert_eq!(day[0]["$type"], "app.bsky.actor.profile");
        assert_eq!(day[0]["did"], DID);
        assert_eq!(day[1]["op"], "create");
    }

    #[test]
    fn test_exporter_caps_open_files() {
        let mut builder = StoreBuilder::new();
        let entries: Vec<(String, BlockId)> = (1..=9)
            .map(|d| {
                let id = like(&mut builder, &format!("2023-04-0{}T00:00:00.000Z", d));
                (format!("app.bsky.feed.like/{}", d), id)
            })
            .collect();
        let root = builder.tree_with_values(&entries, 4);
        builder.commit("3jzfcijpj2z2a", &root);
        let export = export_of(builder);

        let dir = TempDir::new().unwrap();
        let exporter = Exporter::open(ExportConfig::new(dir.path()).max_open_files(2)).unwrap();
        let stats = exporter.export_snapshot(DID, &export).unwrap();
        exporter.finish().unwrap();

        assert_eq!(stats.written, 9);
        for d in 1..=9 {
            let day = lines(&dir.path().join(format!("2023-04-0{}.jsonl", d)));
            assert_eq!(day.len(), 1);
        }
    }

    #[test]
    fn test_write_actor() {
        let dir = TempDir::new().unwrap();
        let exporter = Exporter::open(ExportConfig::new(dir.path())).unwrap();
        let stats = exporter.write_actor(DID, "2023-03-03T03:03:03.000Z").unwrap();
        exporter.finish().unwrap();

        assert_eq!(stats.written, 1);
        let day = lines(&dir.path().join("2023-03-03.jsonl"));
        assert_eq!(
            day,
            vec![json!({
                "did": DID,
                "$type": "app.bsky.actor.profile",
                "createdAt": "2023-03-03T03:03:03.000Z"
            })]
        );
    }
}
