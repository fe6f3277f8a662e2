//! The event store collaborator contract.
//!
//! eventsweep never implements an event store; it consumes one through the
//! four operations of [`EventStoreClient`]: a live subscription over the
//! global log, a bounded backward read of the global log, stream deletion
//! and stream metadata writes.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::event::{EventRecord, LogPosition, ResolvedEvent, StreamName};

/// Where a subscription to the global log begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FromAll {
    /// From the first event in the log.
    Start,
    /// From the first event strictly after the given position.
    After(LogPosition),
}

impl FromAll {
    /// Resume token for a consumer whose last processed position is `position`.
    ///
    /// The default position means nothing has been consumed yet.
    pub fn resume_after(position: LogPosition) -> Self {
        if position.is_start() {
            Self::Start
        } else {
            Self::After(position)
        }
    }
}

/// Server-side filter applied to reads and subscriptions of the global log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventFilter {
    /// Deliver every event.
    None,
    /// Drop events whose type carries the store's reserved prefix.
    #[default]
    ExcludeSystemEvents,
}

impl EventFilter {
    /// Whether `record` passes this filter.
    pub fn matches(self, record: &EventRecord) -> bool {
        match self {
            Self::None => true,
            Self::ExcludeSystemEvents => !record.is_system_event(),
        }
    }
}

/// Optimistic concurrency expectation for stream mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedState {
    /// No check; the mutation applies to whatever state the stream is in.
    Any,
    /// The stream must not exist.
    NoStream,
    /// The stream must exist.
    StreamExists,
    /// The stream's last revision must equal the given value.
    Revision(u64),
}

/// Retention metadata for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamMetadata {
    max_count: Option<u64>,
}

impl StreamMetadata {
    /// Metadata with no retention limits.
    pub const fn new() -> Self {
        Self { max_count: None }
    }

    /// Keep at most `max_count` of the most recent events of the stream.
    #[must_use]
    pub fn with_max_count(mut self, max_count: u64) -> Self {
        self.max_count = Some(max_count);
        self
    }

    /// The absolute event count cap, if any.
    pub const fn max_count(&self) -> Option<u64> {
        self.max_count
    }
}

/// Outcome of a stream deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteResult {
    /// Log position of the deletion marker.
    pub position: LogPosition,
}

/// Outcome of a metadata write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    /// Revision the metadata stream is at after the write.
    pub next_expected_revision: u64,
    /// Log position of the written metadata event.
    pub position: LogPosition,
}

/// A message delivered by a subscription or read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    /// A data event.
    Event(ResolvedEvent),
    /// The subscription has delivered every event that existed when it opened.
    CaughtUp,
    /// The server scanned the log up to the given position (filtered subscriptions).
    CheckpointReached(LogPosition),
}

/// Boxed stream of messages from a subscription or read.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<StreamMessage, EventStoreError>> + Send>>;

/// Identifies the store operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Opening or iterating a subscription to the global log.
    SubscribeToAll,
    /// Reading the global log backwards.
    ReadAllBackwards,
    /// Deleting a stream.
    DeleteStream,
    /// Writing stream metadata.
    SetStreamMetadata,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SubscribeToAll => write!(f, "subscribe_to_all"),
            Self::ReadAllBackwards => write!(f, "read_all_backwards"),
            Self::DeleteStream => write!(f, "delete_stream"),
            Self::SetStreamMetadata => write!(f, "set_stream_metadata"),
        }
    }
}

/// Errors surfaced by an [`EventStoreClient`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EventStoreError {
    /// The stream does not exist.
    #[error("stream {0} not found")]
    StreamNotFound(StreamName),

    /// The stream was deleted.
    #[error("stream {0} has been deleted")]
    StreamDeleted(StreamName),

    /// The stream was not in the expected state for the mutation.
    #[error("wrong expected state for stream {stream}: expected {expected:?}, actual revision {actual:?}")]
    WrongExpectedState {
        /// The stream being mutated.
        stream: StreamName,
        /// The expectation passed by the caller.
        expected: ExpectedState,
        /// The stream's last revision, `None` if it does not exist.
        actual: Option<u64>,
    },

    /// The subscription was dropped by the server.
    #[error("subscription dropped: {0}")]
    SubscriptionDropped(String),

    /// Infrastructure failure (connection loss, timeout, server error).
    #[error("{operation} operation failed: {detail}")]
    StoreFailure {
        /// The operation that failed.
        operation: Operation,
        /// Backend-specific detail.
        detail: String,
    },
}

/// The four store operations eventsweep depends on.
///
/// Implementations must deliver global-log messages in log order.
#[async_trait]
pub trait EventStoreClient: Send + Sync {
    /// Subscribe to the global log, catching up from `from` and then staying live.
    ///
    /// The stream yields a [`StreamMessage::CaughtUp`] once every event that
    /// existed when the subscription opened has been delivered.
    async fn subscribe_to_all(
        &self,
        from: FromAll,
        filter: EventFilter,
    ) -> Result<MessageStream, EventStoreError>;

    /// Read at most `max_count` events backwards from the end of the global log.
    async fn read_all_backwards(
        &self,
        filter: EventFilter,
        max_count: usize,
    ) -> Result<MessageStream, EventStoreError>;

    /// Delete a stream.
    async fn delete_stream(
        &self,
        stream: &StreamName,
        expected: ExpectedState,
    ) -> Result<DeleteResult, EventStoreError>;

    /// Replace a stream's metadata.
    async fn set_stream_metadata(
        &self,
        stream: &StreamName,
        expected: ExpectedState,
        metadata: StreamMetadata,
    ) -> Result<WriteResult, EventStoreError>;
}

// cargo-mutants: skip (trivial forwarding impl)
#[async_trait]
impl<T: EventStoreClient + ?Sized> EventStoreClient for Arc<T> {
    async fn subscribe_to_all(
        &self,
        from: FromAll,
        filter: EventFilter,
    ) -> Result<MessageStream, EventStoreError> {
        (**self).subscribe_to_all(from, filter).await
    }

    async fn read_all_backwards(
        &self,
        filter: EventFilter,
        max_count: usize,
    ) -> Result<MessageStream, EventStoreError> {
        (**self).read_all_backwards(filter, max_count).await
    }

    async fn delete_stream(
        &self,
        stream: &StreamName,
        expected: ExpectedState,
    ) -> Result<DeleteResult, EventStoreError> {
        (**self).delete_stream(stream, expected).await
    }

    async fn set_stream_metadata(
        &self,
        stream: &StreamName,
        expected: ExpectedState,
        metadata: StreamMetadata,
    ) -> Result<WriteResult, EventStoreError> {
        (**self).set_stream_metadata(stream, expected, metadata).await
    }
}
