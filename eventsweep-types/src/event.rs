//! Event log vocabulary: positions, stream names and delivered events.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content type the store assigns to JSON payloads.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Prefix reserved by the store for its own bookkeeping event types and streams.
pub const SYSTEM_PREFIX: &str = "$";

/// Position of an event in the global, totally ordered event log.
///
/// Positions are opaque tokens: the only meaningful operations are
/// comparison and "resume after". The default value (zero) means "no
/// position yet" and is never assigned to a stored event.
#[nutype(
    default = 0,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Default,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct LogPosition(u64);

impl LogPosition {
    /// Whether this is the default "nothing consumed yet" position.
    pub fn is_start(self) -> bool {
        self.into_inner() == 0
    }
}

/// Name of a stream in the event store.
///
/// Stream names are guaranteed to be non-empty and at most 255 characters.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct StreamName(String);

impl StreamName {
    /// Whether the stream belongs to the store's internal bookkeeping.
    pub fn is_system_stream(&self) -> bool {
        self.as_ref().starts_with(SYSTEM_PREFIX)
    }
}

/// One event as delivered by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Stream the event was appended to.
    pub stream_id: StreamName,
    /// Unique id of the event.
    pub event_id: Uuid,
    /// Event type name, e.g. `SaleStarted`.
    pub event_type: String,
    /// Content type of `data`.
    pub content_type: String,
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Metadata bytes.
    pub metadata: Vec<u8>,
    /// Position of the event in the global log.
    pub position: LogPosition,
    /// When the store recorded the event.
    pub created: DateTime<Utc>,
}

impl EventRecord {
    /// Whether the payload is declared as JSON.
    pub fn is_json(&self) -> bool {
        self.content_type == JSON_CONTENT_TYPE
    }

    /// Whether the event type is reserved by the store.
    pub fn is_system_event(&self) -> bool {
        self.event_type.starts_with(SYSTEM_PREFIX)
    }

    /// Payload decoded as UTF-8, with invalid sequences replaced.
    pub fn data_as_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

/// A delivered message wrapping an event and, for link events, the link itself.
///
/// `event` is `None` when a link could not be resolved; such a message has
/// no payload reference and must not be folded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEvent {
    /// The resolved event, if any.
    pub event: Option<EventRecord>,
    /// The link event that pointed at `event`, if the message came through a link.
    pub link: Option<EventRecord>,
}

impl ResolvedEvent {
    /// Wrap a plain (non-link) event.
    pub const fn new(event: EventRecord) -> Self {
        Self {
            event: Some(event),
            link: None,
        }
    }

    /// A link whose target no longer exists.
    pub const fn unresolved_link(link: EventRecord) -> Self {
        Self {
            event: None,
            link: Some(link),
        }
    }

    /// The event carrying the payload, if present.
    pub const fn event(&self) -> Option<&EventRecord> {
        self.event.as_ref()
    }

    /// Position of the message in the log being read (the link's, when present).
    pub fn original_position(&self) -> Option<LogPosition> {
        self.link
            .as_ref()
            .or(self.event.as_ref())
            .map(|record| record.position)
    }
}
