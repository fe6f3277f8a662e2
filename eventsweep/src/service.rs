//! The projection service.
//!
//! [`ProjectionService`] feeds one projection from the event store, decides
//! when to checkpoint, and restarts the feed after failures. Progress
//! survives restarts up to the last persisted checkpoint, so delivery is
//! at-least-once bounded by the checkpoint interval.

use std::sync::Arc;
use std::time::Duration;

use eventsweep_types::{EventFilter, EventStoreClient, FromAll, LogPosition, StreamMessage};
use futures::StreamExt;
use nutype::nutype;
use tracing::{debug, info, instrument, warn};

use crate::checkpoint::CheckpointStore;
use crate::errors::ServiceError;
use crate::log::{OperatorLog, TracingLog};
use crate::projection::{Handled, Projection, ReadMode};
use crate::shutdown::ShutdownSignal;
use crate::state::ProjectionState;

/// Page size of a backward scan.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Checkpoint every this many folded events; zero disables count-based checkpoints.
#[nutype(
    default = 1000,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        Display,
        Default,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct CheckpointCount(u64);

impl CheckpointCount {
    /// Only checkpoint on caught-up signals and forced saves.
    pub fn disabled() -> Self {
        Self::new(0)
    }

    /// Whether a checkpoint is due after `count` folded events.
    pub fn is_due(self, count: u64) -> bool {
        let every = self.into_inner();
        every > 0 && count % every == 0
    }
}

/// Configuration for the projection service.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// How often to checkpoint, in folded events.
    pub checkpoint_count: CheckpointCount,
    /// Where to start when the projection has no position yet.
    pub start_position: Option<LogPosition>,
    /// How long to wait before restarting after a failure.
    pub restart_delay: Duration,
    /// Maximum number of events read by a backward scan.
    pub page_size: usize,
    /// Finish when the store reports a checkpoint, for bounded runs.
    pub finish_on_checkpoint_reached: bool,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            checkpoint_count: CheckpointCount::default(),
            start_position: None,
            restart_delay: Duration::from_secs(1),
            page_size: DEFAULT_PAGE_SIZE,
            finish_on_checkpoint_reached: false,
        }
    }
}

/// Drives one projection against an event store.
pub struct ProjectionService<P: Projection> {
    projection: P,
    client: Arc<dyn EventStoreClient>,
    checkpoints: Arc<dyn CheckpointStore>,
    log: Arc<dyn OperatorLog>,
    options: ServiceOptions,
    persisted: P::State,
}

impl<P: Projection> ProjectionService<P> {
    /// Drive `projection` from `client`, checkpointing into `checkpoints`.
    pub fn new(
        projection: P,
        client: Arc<dyn EventStoreClient>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let persisted = projection.current_state().clone();
        Self {
            projection,
            client,
            checkpoints,
            log: Arc::new(TracingLog),
            options: ServiceOptions::default(),
            persisted,
        }
    }

    /// Replace the default options.
    #[must_use]
    pub fn with_options(mut self, options: ServiceOptions) -> Self {
        self.options = options;
        self
    }

    /// Send operator messages to `log`.
    #[must_use]
    pub fn with_log(mut self, log: Arc<dyn OperatorLog>) -> Self {
        self.log = log;
        self
    }

    /// The driven projection.
    pub const fn projection(&self) -> &P {
        &self.projection
    }

    /// Consume the service, returning the projection.
    pub fn into_projection(self) -> P {
        self.projection
    }

    /// Where the next feed will start.
    pub fn resume_point(&self) -> FromAll {
        let last_position = self.projection.current_state().base().last_position;
        if !last_position.is_start() {
            return FromAll::After(last_position);
        }
        self.options
            .start_position
            .map_or(FromAll::Start, FromAll::resume_after)
    }

    /// Run the projection until it finishes or `cancel` fires.
    ///
    /// Failures of the store or the checkpoint store are logged and the feed
    /// restarts from the last persisted checkpoint after the restart delay.
    /// Returns the final state, or [`ServiceError::Cancelled`].
    #[instrument(name = "projection_service", skip_all, fields(projection = %self.projection.formatted_name()))]
    pub async fn run(&mut self, cancel: &ShutdownSignal) -> Result<P::State, ServiceError> {
        let name = self.projection.formatted_name();
        self.persisted = self.projection.current_state().clone();
        self.log.info(&format!("Starting {name}"));

        loop {
            match self.run_once(cancel).await {
                Ok(()) => {
                    let state = self.projection.current_state().clone();
                    let base = state.base();
                    info!(
                        count = base.count,
                        last_position = %base.last_position,
                        "projection finished"
                    );
                    self.log
                        .info(&format!("{name} finished after {} events", base.count));
                    return Ok(state);
                }
                Err(ServiceError::Cancelled) => {
                    info!("projection cancelled");
                    return Err(ServiceError::Cancelled);
                }
                Err(error) => {
                    let delay = self.options.restart_delay;
                    warn!(%error, delay_ms = delay.as_millis(), "projection failed, restarting");
                    self.log.warn(&format!(
                        "{name} failed, restarting in {}ms: {error}",
                        delay.as_millis()
                    ));

                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(ServiceError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                    self.projection.restore(self.persisted.clone());
                }
            }
        }
    }

    async fn run_once(&mut self, cancel: &ShutdownSignal) -> Result<(), ServiceError> {
        let mode = self.projection.read_mode();
        let from = self.resume_point();
        let page_size = self.options.page_size;
        let client = Arc::clone(&self.client);
        let opening = async move {
            match mode {
                ReadMode::Subscribe => {
                    debug!(?from, "subscribing to the global log");
                    client
                        .subscribe_to_all(from, EventFilter::ExcludeSystemEvents)
                        .await
                }
                ReadMode::BackwardScan => {
                    debug!(page_size, "scanning the global log backwards");
                    client
                        .read_all_backwards(EventFilter::ExcludeSystemEvents, page_size)
                        .await
                }
            }
        };
        let mut messages = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ServiceError::Cancelled),
            opened = opening => opened?,
        };

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ServiceError::Cancelled),
                next = messages.next() => next,
            };

            let Some(message) = next else {
                return match mode {
                    ReadMode::BackwardScan => Ok(()),
                    ReadMode::Subscribe => Err(ServiceError::SubscriptionEnded(
                        self.projection.formatted_name(),
                    )),
                };
            };

            let checkpoint_due = match message? {
                StreamMessage::Event(resolved) => {
                    if self.projection.handle(&resolved, cancel).await? == Handled::Skipped {
                        continue;
                    }
                    let base = *self.projection.current_state().base();
                    if base.force_state_save {
                        self.projection.clear_force_state_save();
                    }
                    base.force_state_save || self.options.checkpoint_count.is_due(base.count)
                }
                StreamMessage::CaughtUp => {
                    debug!("caught up with the head of the log");
                    true
                }
                StreamMessage::CheckpointReached(position) => {
                    debug!(%position, "store checkpoint reached");
                    if self.options.finish_on_checkpoint_reached {
                        self.projection.request_finish();
                    }
                    false
                }
            };

            if checkpoint_due {
                self.save_checkpoint().await?;
            }

            if self.projection.current_state().base().finish_projection {
                return Ok(());
            }
        }
    }

    async fn save_checkpoint(&mut self) -> Result<(), ServiceError> {
        let name = self.projection.formatted_name();
        let snapshot = self.projection.checkpoint_json()?;
        self.checkpoints.save(&name, &snapshot).await?;
        self.persisted = self.projection.current_state().clone();

        let base = self.persisted.base();
        debug!(
            count = base.count,
            last_position = %base.last_position,
            "checkpoint saved"
        );
        Ok(())
    }
}
