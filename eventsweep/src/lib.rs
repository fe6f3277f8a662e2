//! `eventsweep` - resumable projections over an event store's global log
//!
//! A projection folds every event of the log into an accumulator state and
//! checkpoints that state so a later run resumes where the last one stopped.
//! On top of the fold sits a retention engine that deletes or caps streams
//! under an explicit policy, with a safe mode that only reports what it
//! would have done.
//!
//! # Building blocks
//!
//! - [`Projector`]: the domain step of a projection
//! - [`FoldProjection`]: a projector plus count and position bookkeeping
//! - [`ProjectionService`]: feeds a projection from an [`EventStoreClient`],
//!   checkpoints it and restarts it after failures
//! - [`RetentionPolicy`]: what the removal projection prunes
//! - [`CheckpointStore`]: where snapshots are kept
//! - [`ShutdownSignal`]: stops a run cooperatively
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use eventsweep::{
//!     FileCheckpointStore, FoldProjection, ProjectionService, RetentionPolicy,
//!     StreamRemovalProjector, TracingLog,
//! };
//!
//! let policy = RetentionPolicy::delete_stream(stream_name);
//! let projector = StreamRemovalProjector::new(client.clone(), policy, Arc::new(TracingLog));
//! let checkpoints = Arc::new(FileCheckpointStore::new("checkpoints"));
//! let projection = FoldProjection::reload(projector, checkpoints.as_ref(), true).await;
//!
//! let final_state = ProjectionService::new(projection, client, checkpoints)
//!     .run(&cancel)
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod log;
pub mod projection;
pub mod projections;
pub mod retention;
pub mod runner;
pub mod service;
pub mod shutdown;
pub mod state;
pub mod support;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
pub use config::{
    AnalyserConfig, DeleteOptions, ProjectionConfig, ProjectionSelection, ValidatedConfig,
};
pub use errors::{CheckpointError, ConfigError, ProjectionError, RetentionError, ServiceError};
pub use log::{init_tracing, LogChannel, MemoryLog, OperatorLog, TracingLog, SAFE_MODE_PREFIX};
pub use projection::{FoldProjection, Handled, Projection, Projector, ReadMode};
pub use projections::{
    DeleteState, EventError, EventInfo, EventTypeSizeProjection, EventTypeSizeProjector,
    EventTypeSizeState, StartPositionFromDateProjection, StartPositionFromDateProjector,
    StartPositionFromDateState, StreamRemovalProjection, StreamRemovalProjector,
};
pub use retention::{MaxEventCount, Mutation, PolicyKind, RetentionPolicy, LEGACY_SALE_EVENT_TYPE};
pub use runner::{run_configured, run_selection, ProjectionReport};
pub use service::{CheckpointCount, ProjectionService, ServiceOptions, DEFAULT_PAGE_SIZE};
pub use shutdown::ShutdownSignal;
pub use state::{ProjectionState, StateBase};

pub use eventsweep_types::{
    EventRecord, EventStoreClient, EventStoreError, LogPosition, ResolvedEvent, StreamName,
};
