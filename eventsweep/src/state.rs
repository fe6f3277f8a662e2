//! Projection state shared bookkeeping.

use std::fmt::Debug;

use eventsweep_types::LogPosition;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Bookkeeping carried by every projection state.
///
/// Serialized flattened into the owning state, so a checkpoint is a single
/// self-describing JSON object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateBase {
    /// Number of events folded.
    pub count: u64,
    /// Position of the newest event folded.
    pub last_position: LogPosition,
    /// Request an out-of-band checkpoint after the current event.
    #[serde(default)]
    pub force_state_save: bool,
    /// Stop the run after the current event.
    #[serde(default)]
    pub finish_projection: bool,
}

impl StateBase {
    /// Bookkeeping after one more event at `position` has been folded.
    ///
    /// The position never moves backwards, which keeps it monotonic for
    /// backward scans too.
    #[must_use]
    pub fn advanced(self, position: LogPosition) -> Self {
        Self {
            count: self.count + 1,
            last_position: self.last_position.max(position),
            ..self
        }
    }

    /// Control flags reset for a new run.
    #[must_use]
    pub const fn without_control_flags(self) -> Self {
        Self {
            force_state_save: false,
            finish_projection: false,
            ..self
        }
    }
}

/// An immutable accumulator snapshot.
///
/// Transitions produce new values; a state is never mutated once a
/// projection holds it.
pub trait ProjectionState:
    Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// The shared bookkeeping.
    fn base(&self) -> &StateBase;

    /// This state with its bookkeeping replaced.
    #[must_use]
    fn with_base(self, base: StateBase) -> Self;
}
