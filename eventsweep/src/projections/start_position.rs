//! Locating the first log position of a calendar date.
//!
//! The log is scanned backwards from its tail. While events are newer than
//! the target date the projection keeps track of the oldest one seen; once
//! it passes an event older than the target, the last recorded position is
//! the answer: the first event of the target day, or the first event after
//! it when nothing happened on that day.

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::NaiveDate;
use eventsweep_types::{EventRecord, LogPosition};
use serde::{Deserialize, Serialize};

use crate::errors::ProjectionError;
use crate::projection::{FoldProjection, Projector, ReadMode};
use crate::shutdown::ShutdownSignal;
use crate::state::{ProjectionState, StateBase};

/// Accumulator of the date scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartPositionFromDateState {
    /// Shared bookkeeping.
    #[serde(flatten)]
    pub base: StateBase,
    /// The date being looked for.
    pub target_date: NaiveDate,
    /// Day of the oldest event examined so far.
    pub current_date: Option<NaiveDate>,
    /// Position of the oldest event examined on or after the target date.
    pub position_for_date: LogPosition,
    /// Whether an event on the target date was seen.
    pub target_reached: bool,
}

impl StartPositionFromDateState {
    /// Fresh scan for `target_date`.
    pub fn new(target_date: NaiveDate) -> Self {
        Self {
            base: StateBase::default(),
            target_date,
            current_date: None,
            position_for_date: LogPosition::default(),
            target_reached: false,
        }
    }

    /// The located position, if the scan saw any event on or after the target date.
    pub fn located_position(&self) -> Option<LogPosition> {
        (!self.position_for_date.is_start()).then_some(self.position_for_date)
    }
}

impl ProjectionState for StartPositionFromDateState {
    fn base(&self) -> &StateBase {
        &self.base
    }

    fn with_base(self, base: StateBase) -> Self {
        Self { base, ..self }
    }
}

/// Scans the log backwards for the first position of a date.
#[derive(Debug, Clone, Copy)]
pub struct StartPositionFromDateProjector {
    target_date: NaiveDate,
}

/// The date scan with its fold bookkeeping.
pub type StartPositionFromDateProjection = FoldProjection<StartPositionFromDateProjector>;

impl StartPositionFromDateProjector {
    /// Look for the first position of `target_date`.
    pub const fn new(target_date: NaiveDate) -> Self {
        Self { target_date }
    }
}

#[async_trait]
impl Projector for StartPositionFromDateProjector {
    type State = StartPositionFromDateState;

    fn name(&self) -> String {
        "StartPositionFromDateProjection".to_string()
    }

    fn read_mode(&self) -> ReadMode {
        ReadMode::BackwardScan
    }

    fn initial_state(&self) -> StartPositionFromDateState {
        StartPositionFromDateState::new(self.target_date)
    }

    fn accepts_checkpoint(&self, state: &StartPositionFromDateState) -> bool {
        state.target_date == self.target_date
    }

    async fn apply(
        &self,
        state: &StartPositionFromDateState,
        event: &EventRecord,
        _cancel: &ShutdownSignal,
    ) -> Result<StartPositionFromDateState, ProjectionError> {
        let day = event.created.date_naive();

        let next = match day.cmp(&self.target_date) {
            Ordering::Greater => StartPositionFromDateState {
                current_date: Some(day),
                position_for_date: event.position,
                ..state.clone()
            },
            Ordering::Equal => StartPositionFromDateState {
                current_date: Some(day),
                position_for_date: event.position,
                target_reached: true,
                ..state.clone()
            },
            Ordering::Less => {
                let base = StateBase {
                    force_state_save: true,
                    finish_projection: true,
                    ..state.base
                };
                state.clone().with_base(base)
            }
        };
        Ok(next)
    }
}
