//! The projection fold.
//!
//! A projection folds events from the global log into an accumulator state,
//! one event at a time, in delivery order. The domain step lives in a
//! [`Projector`]; [`FoldProjection`] wraps it with the bookkeeping every
//! projection shares (counting, position tracking, checkpoint restore), and
//! the [`Projection`] trait is all the service needs to drive it.

use async_trait::async_trait;
use eventsweep_types::{EventRecord, ResolvedEvent};
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::errors::{CheckpointError, ProjectionError};
use crate::shutdown::ShutdownSignal;
use crate::state::{ProjectionState, StateBase};

/// How the service feeds a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Catch up on the global log, then stay live.
    Subscribe,
    /// Read one bounded page backwards from the tail of the log.
    BackwardScan,
}

/// Whether [`Projection::handle`] folded the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// The event was folded into the state.
    Folded,
    /// The message carried no payload and was ignored.
    Skipped,
}

/// The domain step of a projection.
#[async_trait]
pub trait Projector: Send + Sync + 'static {
    /// The accumulator this projector folds into.
    type State: ProjectionState;

    /// Name the projection's checkpoint is stored under.
    fn name(&self) -> String;

    /// How the projection is fed.
    fn read_mode(&self) -> ReadMode {
        ReadMode::Subscribe
    }

    /// State to start from when there is no checkpoint.
    fn initial_state(&self) -> Self::State;

    /// Whether a restored snapshot was produced for this projector's settings.
    ///
    /// Rejected snapshots are discarded in favour of [`Self::initial_state`].
    fn accepts_checkpoint(&self, _state: &Self::State) -> bool {
        true
    }

    /// Fold one event into `state`, producing the next state.
    ///
    /// Count and position are maintained by the caller. Domain failures must
    /// be recorded in the returned state; an error stops the fold and is
    /// reserved for cancellation.
    async fn apply(
        &self,
        state: &Self::State,
        event: &EventRecord,
        cancel: &ShutdownSignal,
    ) -> Result<Self::State, ProjectionError>;
}

/// What [`crate::ProjectionService`] needs from a projection.
#[async_trait]
pub trait Projection: Send + Sync {
    /// The accumulator type.
    type State: ProjectionState;

    /// Name the checkpoint is stored under.
    fn formatted_name(&self) -> String;

    /// How the projection is fed.
    fn read_mode(&self) -> ReadMode;

    /// The current accumulator.
    fn current_state(&self) -> &Self::State;

    /// Replace the current accumulator.
    fn restore(&mut self, state: Self::State);

    /// Fold one delivered message.
    ///
    /// Messages without a payload are skipped and not counted.
    async fn handle(
        &mut self,
        event: &ResolvedEvent,
        cancel: &ShutdownSignal,
    ) -> Result<Handled, ProjectionError>;

    /// Serialize the current accumulator.
    fn checkpoint_json(&self) -> Result<String, ProjectionError> {
        serde_json::to_string(self.current_state()).map_err(|source| {
            ProjectionError::Checkpoint(CheckpointError::Serialization {
                name: self.formatted_name(),
                source,
            })
        })
    }

    /// Clear the forced-checkpoint request once it has been honored.
    fn clear_force_state_save(&mut self) {
        let state = self.current_state().clone();
        let base = StateBase {
            force_state_save: false,
            ..*state.base()
        };
        self.restore(state.with_base(base));
    }

    /// Ask the projection to stop after the current message.
    fn request_finish(&mut self) {
        let state = self.current_state().clone();
        let base = StateBase {
            finish_projection: true,
            ..*state.base()
        };
        self.restore(state.with_base(base));
    }
}

/// A [`Projector`] together with its current state.
#[derive(Debug)]
pub struct FoldProjection<P: Projector> {
    projector: P,
    state: P::State,
}

impl<P: Projector> FoldProjection<P> {
    /// Start from the projector's initial state.
    pub fn new(projector: P) -> Self {
        let state = projector.initial_state();
        Self { projector, state }
    }

    /// Start from a known state.
    pub const fn with_state(projector: P, state: P::State) -> Self {
        Self { projector, state }
    }

    /// Build the projection, restoring its last checkpoint when asked to.
    ///
    /// A missing, unreadable or undecodable checkpoint falls back to the
    /// initial state with a warning. Control flags from the snapshot are
    /// reset so a finished run does not end the next one immediately.
    pub async fn reload(
        projector: P,
        checkpoints: &dyn CheckpointStore,
        reload_from_checkpoint: bool,
    ) -> Self {
        let mut projection = Self::new(projector);
        if !reload_from_checkpoint {
            return projection;
        }

        let name = projection.projector.name();
        match checkpoints.load(&name).await {
            Ok(Some(snapshot)) => match serde_json::from_str::<P::State>(&snapshot) {
                Ok(state) if !projection.projector.accepts_checkpoint(&state) => {
                    warn!(projection = %name, "checkpoint was taken with different settings, starting from a fresh state");
                }
                Ok(state) => {
                    let base = state.base().without_control_flags();
                    info!(
                        projection = %name,
                        count = base.count,
                        last_position = %base.last_position,
                        "restored projection from checkpoint"
                    );
                    projection.state = state.with_base(base);
                }
                Err(error) => {
                    warn!(projection = %name, %error, "checkpoint could not be decoded, starting from a fresh state");
                }
            },
            Ok(None) => debug!(projection = %name, "no checkpoint found, starting from a fresh state"),
            Err(error) => {
                warn!(projection = %name, %error, "checkpoint could not be loaded, starting from a fresh state");
            }
        }
        projection
    }

    /// The domain step.
    pub const fn projector(&self) -> &P {
        &self.projector
    }

    /// Consume the projection, returning its state.
    pub fn into_state(self) -> P::State {
        self.state
    }
}

#[async_trait]
impl<P: Projector> Projection for FoldProjection<P> {
    type State = P::State;

    fn formatted_name(&self) -> String {
        self.projector.name()
    }

    fn read_mode(&self) -> ReadMode {
        self.projector.read_mode()
    }

    fn current_state(&self) -> &Self::State {
        &self.state
    }

    fn restore(&mut self, state: Self::State) {
        self.state = state;
    }

    async fn handle(
        &mut self,
        event: &ResolvedEvent,
        cancel: &ShutdownSignal,
    ) -> Result<Handled, ProjectionError> {
        let Some(record) = event.event() else {
            return Ok(Handled::Skipped);
        };

        let next = self.projector.apply(&self.state, record, cancel).await?;
        let position = event.original_position().unwrap_or(record.position);
        let base = next.base().advanced(position);
        self.state = next.with_base(base);
        Ok(Handled::Folded)
    }
}
