//! Storage footprint per event type.

use std::collections::BTreeMap;

use async_trait::async_trait;
use eventsweep_types::EventRecord;
use serde::{Deserialize, Serialize};

use crate::errors::ProjectionError;
use crate::projection::{FoldProjection, Projector};
use crate::shutdown::ShutdownSignal;
use crate::state::{ProjectionState, StateBase};

const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;
const TWO_POW_32: f64 = 4_294_967_296.0;

/// Widen a byte or event total to `f64`, rounding above 2^53.
fn as_float(value: u64) -> f64 {
    let high = u32::try_from(value >> 32).unwrap_or(u32::MAX);
    let low = u32::try_from(value & u64::from(u32::MAX)).unwrap_or(u32::MAX);
    f64::from(high).mul_add(TWO_POW_32, f64::from(low))
}

/// Count and size of the events of one type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInfo {
    /// Number of events.
    pub count: u64,
    /// Sum of the events' footprints.
    pub size_in_bytes: u64,
}

/// Accumulator of the footprint audit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTypeSizeState {
    /// Shared bookkeeping.
    #[serde(flatten)]
    pub base: StateBase,
    /// Footprint keyed by event type.
    pub event_types: BTreeMap<String, EventInfo>,
}

impl EventTypeSizeState {
    /// Events counted across all types.
    pub fn total_events(&self) -> u64 {
        self.event_types.values().map(|info| info.count).sum()
    }

    /// Bytes counted across all types.
    pub fn total_size_in_bytes(&self) -> u64 {
        self.event_types.values().map(|info| info.size_in_bytes).sum()
    }

    /// Bytes counted across all types, in megabytes.
    pub fn total_size_in_megabytes(&self) -> f64 {
        as_float(self.total_size_in_bytes()) / BYTES_PER_MEGABYTE
    }

    /// Mean footprint of an event, zero before any event is counted.
    pub fn average_size_in_bytes(&self) -> f64 {
        match self.total_events() {
            0 => 0.0,
            events => as_float(self.total_size_in_bytes()) / as_float(events),
        }
    }

    /// Event types ordered largest footprint first.
    pub fn largest_first(&self) -> Vec<(&str, EventInfo)> {
        let mut types: Vec<(&str, EventInfo)> = self
            .event_types
            .iter()
            .map(|(event_type, info)| (event_type.as_str(), *info))
            .collect();
        types.sort_by(|left, right| right.1.size_in_bytes.cmp(&left.1.size_in_bytes));
        types
    }
}

impl ProjectionState for EventTypeSizeState {
    fn base(&self) -> &StateBase {
        &self.base
    }

    fn with_base(self, base: StateBase) -> Self {
        Self { base, ..self }
    }
}

/// Bytes an event occupies: payload, metadata, type name and stream id.
pub fn event_footprint(event: &EventRecord) -> u64 {
    let bytes = event.data.len()
        + event.metadata.len()
        + event.event_type.len()
        + event.stream_id.as_ref().len();
    u64::try_from(bytes).unwrap_or(u64::MAX)
}

/// Audits the footprint of every event it is fed, by event type.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventTypeSizeProjector;

/// The footprint audit with its fold bookkeeping.
pub type EventTypeSizeProjection = FoldProjection<EventTypeSizeProjector>;

#[async_trait]
impl Projector for EventTypeSizeProjector {
    type State = EventTypeSizeState;

    fn name(&self) -> String {
        "EventTypeSizeProjection".to_string()
    }

    fn initial_state(&self) -> EventTypeSizeState {
        EventTypeSizeState::default()
    }

    async fn apply(
        &self,
        state: &EventTypeSizeState,
        event: &EventRecord,
        _cancel: &ShutdownSignal,
    ) -> Result<EventTypeSizeState, ProjectionError> {
        let mut event_types = state.event_types.clone();
        let info = event_types.entry(event.event_type.clone()).or_default();
        info.count += 1;
        info.size_in_bytes += event_footprint(event);

        Ok(EventTypeSizeState {
            event_types,
            ..state.clone()
        })
    }
}
