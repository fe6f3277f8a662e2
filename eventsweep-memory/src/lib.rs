//! In-memory event store for eventsweep.
//!
//! `InMemoryEventStore` implements [`EventStoreClient`] with the semantics
//! eventsweep relies on from a real store: a single globally ordered log,
//! catch-up-then-live subscriptions, bounded backward reads, soft stream
//! deletion and `max_count` retention metadata. It also records every
//! mutation call and can inject failures, which is what the projection tests
//! need to observe.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventsweep_types::{
    DeleteResult, EventFilter, EventRecord, EventStoreClient, EventStoreError, ExpectedState,
    FromAll, LogPosition, MessageStream, Operation, ResolvedEvent, StreamMessage, StreamMetadata,
    StreamName, WriteResult, JSON_CONTENT_TYPE, SYSTEM_PREFIX,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Event type the store writes to `$$<stream>` when stream metadata changes.
pub const METADATA_EVENT_TYPE: &str = "$metadata";

const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

/// An event to append to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    /// Unique id of the event.
    pub event_id: Uuid,
    /// Event type name.
    pub event_type: String,
    /// Content type of `data`.
    pub content_type: String,
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Metadata bytes.
    pub metadata: Vec<u8>,
    /// Creation time to record; the append time when `None`.
    pub created: Option<DateTime<Utc>>,
}

impl NewEvent {
    /// A JSON event with the given payload.
    pub fn json(event_type: impl Into<String>, payload: &serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            content_type: JSON_CONTENT_TYPE.to_string(),
            data: payload.to_string().into_bytes(),
            metadata: Vec::new(),
            created: None,
        }
    }

    /// A binary (non-JSON) event.
    pub fn binary(event_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            content_type: BINARY_CONTENT_TYPE.to_string(),
            data,
            metadata: Vec::new(),
            created: None,
        }
    }

    /// Override the recorded creation time.
    #[must_use]
    pub fn created_at(mut self, created: DateTime<Utc>) -> Self {
        self.created = Some(created);
        self
    }

    /// Attach metadata bytes.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Vec<u8>) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Default)]
struct StoredStream {
    events: Vec<EventRecord>,
    metadata: StreamMetadata,
    metadata_revision: Option<u64>,
    deleted: bool,
}

impl StoredStream {
    fn revision(&self) -> Option<u64> {
        if self.deleted || self.events.is_empty() {
            None
        } else {
            u64::try_from(self.events.len() - 1).ok()
        }
    }

    fn visible_events(&self) -> Vec<EventRecord> {
        let keep = self
            .metadata
            .max_count()
            .and_then(|max| usize::try_from(max).ok())
            .unwrap_or(usize::MAX);
        let skip = self.events.len().saturating_sub(keep);
        self.events.iter().skip(skip).cloned().collect()
    }
}

#[derive(Debug, Default)]
struct FaultPlan {
    failing_deletes: HashSet<StreamName>,
    failing_subscriptions: u32,
    drop_subscription_after: Option<usize>,
}

#[derive(Debug, Default)]
struct StoreState {
    log: Vec<EventRecord>,
    streams: HashMap<StreamName, StoredStream>,
    next_position: u64,
    deleted_streams: Vec<StreamName>,
    metadata_writes: Vec<(StreamName, StreamMetadata)>,
    faults: FaultPlan,
}

impl StoreState {
    fn append_record(
        &mut self,
        stream: &StreamName,
        event: NewEvent,
        now: DateTime<Utc>,
    ) -> EventRecord {
        self.next_position += 1;
        let record = EventRecord {
            stream_id: stream.clone(),
            event_id: event.event_id,
            event_type: event.event_type,
            content_type: event.content_type,
            data: event.data,
            metadata: event.metadata,
            position: LogPosition::new(self.next_position),
            created: event.created.unwrap_or(now),
        };
        self.log.push(record.clone());

        let stored = self.streams.entry(stream.clone()).or_default();
        if stored.deleted {
            stored.deleted = false;
            stored.events.clear();
        }
        stored.events.push(record.clone());
        record
    }

    fn tail_position(&self) -> LogPosition {
        LogPosition::new(self.next_position)
    }
}

fn check_expected(
    stream: &StreamName,
    expected: ExpectedState,
    actual: Option<u64>,
) -> Result<(), EventStoreError> {
    let satisfied = match expected {
        ExpectedState::Any => true,
        ExpectedState::NoStream => actual.is_none(),
        ExpectedState::StreamExists => actual.is_some(),
        ExpectedState::Revision(revision) => actual == Some(revision),
    };

    if satisfied {
        Ok(())
    } else {
        Err(EventStoreError::WrongExpectedState {
            stream: stream.clone(),
            expected,
            actual,
        })
    }
}

fn metadata_stream_for(stream: &StreamName) -> Result<StreamName, EventStoreError> {
    StreamName::try_new(format!("{SYSTEM_PREFIX}{SYSTEM_PREFIX}{stream}")).map_err(|error| {
        EventStoreError::StoreFailure {
            operation: Operation::SetStreamMetadata,
            detail: error.to_string(),
        }
    })
}

/// Receive from the broadcast channel, giving up after `timeout` when set.
async fn recv_with_optional_timeout<T: Clone>(
    rx: &mut broadcast::Receiver<T>,
    timeout: Option<Duration>,
) -> Option<Result<T, broadcast::error::RecvError>> {
    match timeout {
        Some(duration) => tokio::time::timeout(duration, rx.recv()).await.ok(),
        None => Some(rx.recv().await),
    }
}

/// In-memory event store for development and testing.
///
/// # Subscription behavior
///
/// A subscription delivers every matching event after its start position
/// that exists when it opens, then [`StreamMessage::CaughtUp`] followed by a
/// [`StreamMessage::CheckpointReached`] at the log tail, then live events
/// appended afterwards. With an idle timeout configured the live phase ends
/// once no event arrives for that long; otherwise it runs until the store is
/// dropped.
///
/// Live delivery goes through a bounded broadcast channel (1024 events). A
/// subscriber that falls further behind receives
/// [`EventStoreError::SubscriptionDropped`] rather than silently missing
/// events.
pub struct InMemoryEventStore {
    state: Mutex<StoreState>,
    broadcast_tx: broadcast::Sender<EventRecord>,
    idle_timeout: Option<Duration>,
}

impl InMemoryEventStore {
    /// Create an empty store whose subscriptions stay live indefinitely.
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            state: Mutex::new(StoreState::default()),
            broadcast_tx,
            idle_timeout: None,
        }
    }

    /// End the live phase of subscriptions after `timeout` without new events.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Append events to a stream, returning the position of the last one.
    pub fn append(
        &self,
        stream: &StreamName,
        events: Vec<NewEvent>,
    ) -> Result<LogPosition, EventStoreError> {
        let now = Utc::now();
        let appended: Vec<EventRecord> = {
            let mut state = self.state.lock();
            events
                .into_iter()
                .map(|event| state.append_record(stream, event, now))
                .collect()
        };

        let last = appended
            .last()
            .map_or_else(LogPosition::default, |record| record.position);
        for record in appended {
            // No receivers is fine.
            let _ = self.broadcast_tx.send(record);
        }
        Ok(last)
    }

    /// Read a stream forwards, honoring its `max_count` metadata.
    pub fn read_stream(&self, stream: &StreamName) -> Result<Vec<EventRecord>, EventStoreError> {
        let state = self.state.lock();
        match state.streams.get(stream) {
            Some(stored) if !stored.deleted && !stored.events.is_empty() => {
                Ok(stored.visible_events())
            }
            _ => Err(EventStoreError::StreamNotFound(stream.clone())),
        }
    }

    /// Whether the stream exists and has not been deleted.
    pub fn stream_exists(&self, stream: &StreamName) -> bool {
        self.read_stream(stream).is_ok()
    }

    /// Every stream deleted through [`EventStoreClient::delete_stream`], in call order.
    pub fn deleted_streams(&self) -> Vec<StreamName> {
        self.state.lock().deleted_streams.clone()
    }

    /// Every metadata write issued through [`EventStoreClient::set_stream_metadata`].
    pub fn metadata_writes(&self) -> Vec<(StreamName, StreamMetadata)> {
        self.state.lock().metadata_writes.clone()
    }

    /// Total number of successful mutation calls.
    pub fn mutation_count(&self) -> usize {
        let state = self.state.lock();
        state.deleted_streams.len() + state.metadata_writes.len()
    }

    /// Position of the newest event in the log.
    pub fn tail_position(&self) -> LogPosition {
        self.state.lock().tail_position()
    }

    /// Make every delete of `stream` fail with a store failure.
    pub fn fail_deletes_of(&self, stream: &StreamName) {
        let _ = self.state.lock().faults.failing_deletes.insert(stream.clone());
    }

    /// Make the next `count` subscription attempts fail to open.
    pub fn fail_next_subscriptions(&self, count: u32) {
        self.state.lock().faults.failing_subscriptions = count;
    }

    /// Make the next subscription drop after delivering `events` events.
    pub fn drop_next_subscription_after(&self, events: usize) {
        self.state.lock().faults.drop_subscription_after = Some(events);
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStoreClient for InMemoryEventStore {
    #[tracing::instrument(name = "subscribe_to_all", skip(self), fields(from = ?from, filter = ?filter))]
    async fn subscribe_to_all(
        &self,
        from: FromAll,
        filter: EventFilter,
    ) -> Result<MessageStream, EventStoreError> {
        // Subscribe to the broadcast channel before snapshotting the log so no
        // event appended in between is lost.
        let mut broadcast_rx = self.broadcast_tx.subscribe();

        let (historical, catchup_tail, drop_after) = {
            let mut state = self.state.lock();
            if state.faults.failing_subscriptions > 0 {
                state.faults.failing_subscriptions -= 1;
                tracing::warn!("injected subscription failure");
                return Err(EventStoreError::StoreFailure {
                    operation: Operation::SubscribeToAll,
                    detail: "injected failure".to_string(),
                });
            }

            let after = match from {
                FromAll::Start => LogPosition::default(),
                FromAll::After(position) => position,
            };
            let historical: Vec<EventRecord> = state
                .log
                .iter()
                .filter(|record| record.position > after && filter.matches(record))
                .cloned()
                .collect();
            let drop_after = state.faults.drop_subscription_after.take();
            (historical, state.tail_position(), drop_after)
        };

        tracing::debug!(historical = historical.len(), "subscription opened");

        let idle_timeout = self.idle_timeout;
        let stream = async_stream::stream! {
            let mut delivered = 0usize;

            for record in historical {
                if drop_after == Some(delivered) {
                    yield Err(EventStoreError::SubscriptionDropped("injected drop".to_string()));
                    return;
                }
                delivered += 1;
                yield Ok(StreamMessage::Event(ResolvedEvent::new(record)));
            }

            yield Ok(StreamMessage::CaughtUp);
            yield Ok(StreamMessage::CheckpointReached(catchup_tail));

            loop {
                match recv_with_optional_timeout(&mut broadcast_rx, idle_timeout).await {
                    Some(Ok(record)) => {
                        // Already delivered during catch-up.
                        if record.position <= catchup_tail || !filter.matches(&record) {
                            continue;
                        }
                        if drop_after == Some(delivered) {
                            yield Err(EventStoreError::SubscriptionDropped("injected drop".to_string()));
                            return;
                        }
                        delivered += 1;
                        yield Ok(StreamMessage::Event(ResolvedEvent::new(record)));
                    }
                    Some(Err(broadcast::error::RecvError::Lagged(missed))) => {
                        yield Err(EventStoreError::SubscriptionDropped(format!(
                            "subscriber lagged behind by {missed} events"
                        )));
                        return;
                    }
                    Some(Err(broadcast::error::RecvError::Closed)) | None => break,
                }
            }
        };

        Ok(Box::pin(stream))
    }

    #[tracing::instrument(name = "read_all_backwards", skip(self), fields(filter = ?filter, max_count))]
    async fn read_all_backwards(
        &self,
        filter: EventFilter,
        max_count: usize,
    ) -> Result<MessageStream, EventStoreError> {
        let page: Vec<Result<StreamMessage, EventStoreError>> = {
            let state = self.state.lock();
            state
                .log
                .iter()
                .rev()
                .filter(|record| filter.matches(record))
                .take(max_count)
                .cloned()
                .map(|record| Ok(StreamMessage::Event(ResolvedEvent::new(record))))
                .collect()
        };

        Ok(Box::pin(futures::stream::iter(page)))
    }

    #[tracing::instrument(name = "delete_stream", skip(self), fields(stream = %stream))]
    async fn delete_stream(
        &self,
        stream: &StreamName,
        expected: ExpectedState,
    ) -> Result<DeleteResult, EventStoreError> {
        let mut state = self.state.lock();
        if state.faults.failing_deletes.contains(stream) {
            return Err(EventStoreError::StoreFailure {
                operation: Operation::DeleteStream,
                detail: format!("injected failure deleting {stream}"),
            });
        }

        let actual = state.streams.get(stream).and_then(StoredStream::revision);
        check_expected(stream, expected, actual)?;

        if let Some(stored) = state.streams.get_mut(stream) {
            stored.deleted = true;
            stored.events.clear();
        }
        state.deleted_streams.push(stream.clone());
        tracing::debug!(revision = ?actual, "stream deleted");

        Ok(DeleteResult {
            position: state.tail_position(),
        })
    }

    #[tracing::instrument(name = "set_stream_metadata", skip(self), fields(stream = %stream, max_count = ?metadata.max_count()))]
    async fn set_stream_metadata(
        &self,
        stream: &StreamName,
        expected: ExpectedState,
        metadata: StreamMetadata,
    ) -> Result<WriteResult, EventStoreError> {
        let metadata_stream = metadata_stream_for(stream)?;
        let payload = serde_json::json!({ "$maxCount": metadata.max_count() });

        let (record, revision) = {
            let mut state = self.state.lock();
            let actual = state
                .streams
                .get(stream)
                .and_then(|stored| stored.metadata_revision);
            check_expected(stream, expected, actual)?;

            let record = state.append_record(
                &metadata_stream,
                NewEvent::json(METADATA_EVENT_TYPE, &payload),
                Utc::now(),
            );
            let stored = state.streams.entry(stream.clone()).or_default();
            stored.metadata = metadata;
            let revision = stored.metadata_revision.map_or(0, |revision| revision + 1);
            stored.metadata_revision = Some(revision);
            state.metadata_writes.push((stream.clone(), metadata));
            (record, revision)
        };

        let position = record.position;
        let _ = self.broadcast_tx.send(record);

        Ok(WriteResult {
            next_expected_revision: revision,
            position,
        })
    }
}
