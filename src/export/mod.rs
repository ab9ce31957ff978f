//! Export layer - writes snapshots and event streams to disk.

mod api;
mod sink;

pub use api::{
    ErrorPolicy, ExportConfig, ExportError, ExportMode, ExportResult, ExportStats, Exporter,
};
pub use sink::{
    partition_date, prepare_dir, DateWindow, PartitionedSink, DEFAULT_MAX_OPEN_FILES,
};
