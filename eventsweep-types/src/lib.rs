#![forbid(unsafe_code)]
#![deny(bad_style, rust_2018_idioms, unused_must_use)]

//! Shared vocabulary types for the eventsweep projection engine.
//!
//! This crate holds the types that both the projection engine (`eventsweep`)
//! and store adapters (`eventsweep-memory`) need to agree on, so adapters do
//! not have to depend on the engine itself.
//!
//! # Overview
//!
//! - Log vocabulary: `LogPosition`, `StreamName`, `EventRecord`, `ResolvedEvent`
//! - Store collaborator: `EventStoreClient` and its message/option types
//! - Errors: `EventStoreError`, `Operation`

mod event;
mod store;

pub use event::{
    EventRecord, LogPosition, ResolvedEvent, StreamName, StreamNameError, JSON_CONTENT_TYPE,
    SYSTEM_PREFIX,
};
pub use store::{
    DeleteResult, EventFilter, EventStoreClient, EventStoreError, ExpectedState, FromAll,
    MessageStream, Operation, StreamMessage, StreamMetadata, WriteResult,
};
