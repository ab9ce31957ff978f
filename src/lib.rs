//! repowalk - history and record extraction for content-addressed repositories
//!
//! This crate reads a decoded repository export (commits, Merkle search tree
//! nodes and records, keyed by content id), enumerates the keys of every
//! revision and diffs consecutive revisions to recover what each commit
//! created or deleted. On top of that it parses the known record collections
//! and writes snapshots or event streams as day-partitioned JSON Lines.
//!
//! # Example
//!
//! ```no_run
//! use repowalk::export::{ExportConfig, Exporter};
//! use repowalk::storage::RepoExport;
//!
//! let export = RepoExport::open("./repo.json").unwrap();
//! let exporter = Exporter::open(ExportConfig::new("./stream")).unwrap();
//! exporter.export_events("did:plc:example", &export).unwrap();
//! exporter.finish().unwrap();
//! ```

pub mod export;
pub mod records;
pub mod storage;
