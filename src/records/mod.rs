//! Record extraction on top of the storage layer.
//!
//! `parse` reads a cached record block as one of the known collections and
//! `event` turns each commit's diff into create/delete events carrying those
//! parsed bodies.

mod error;
mod event;
mod parse;

pub use error::{RecordError, RecordResult};
pub use event::{EventBatch, EventBuilder, RepoEvent};
pub use parse::{
    parse_record, Collection, FollowRecord, ImageRef, PostRecord, ProfileRecord, RecordBody,
    SubjectRecord, MAX_IMAGES,
};
