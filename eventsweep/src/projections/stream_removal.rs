//! Policy-driven stream removal.

use std::sync::Arc;

use async_trait::async_trait;
use eventsweep_types::{EventRecord, EventStoreClient, EventStoreError, ExpectedState, StreamMetadata};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{ProjectionError, RetentionError};
use crate::log::{OperatorLog, SAFE_MODE_PREFIX};
use crate::projection::{FoldProjection, Projector};
use crate::retention::{Mutation, RetentionPolicy};
use crate::shutdown::ShutdownSignal;
use crate::state::{ProjectionState, StateBase};

/// One event the removal projection could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventError {
    /// The event payload as text.
    pub payload: String,
    /// Why it failed.
    pub message: String,
}

/// Accumulator of the removal projection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteState {
    /// Shared bookkeeping.
    #[serde(flatten)]
    pub base: StateBase,
    /// Events the policy matched, whether or not the mutation was issued.
    pub deleted_count: u64,
    /// Per-event failures, in delivery order.
    pub errors: Vec<EventError>,
}

impl DeleteState {
    fn matched(&self) -> Self {
        Self {
            deleted_count: self.deleted_count + 1,
            ..self.clone()
        }
    }

    fn with_error(&self, event: &EventRecord, error: &RetentionError) -> Self {
        let mut errors = self.errors.clone();
        errors.push(EventError {
            payload: event.data_as_text().into_owned(),
            message: error.to_string(),
        });
        Self {
            errors,
            ..self.clone()
        }
    }
}

impl ProjectionState for DeleteState {
    fn base(&self) -> &StateBase {
        &self.base
    }

    fn with_base(self, base: StateBase) -> Self {
        Self { base, ..self }
    }
}

/// Applies one [`RetentionPolicy`] to every event it is fed.
///
/// Non-JSON events and events of system types are never evaluated. Each
/// match increments `deleted_count` and, outside safe mode, issues the
/// policy's mutation. A failure on one event is recorded in `errors` and the
/// fold moves on.
pub struct StreamRemovalProjector {
    client: Arc<dyn EventStoreClient>,
    policy: RetentionPolicy,
    log: Arc<dyn OperatorLog>,
}

/// The removal projector with its fold bookkeeping.
pub type StreamRemovalProjection = FoldProjection<StreamRemovalProjector>;

impl StreamRemovalProjector {
    /// Apply `policy` to streams in the store behind `client`.
    pub fn new(
        client: Arc<dyn EventStoreClient>,
        policy: RetentionPolicy,
        log: Arc<dyn OperatorLog>,
    ) -> Self {
        Self {
            client,
            policy,
            log,
        }
    }

    /// The active policy.
    pub const fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    async fn execute(&self, mutation: &Mutation) -> Result<(), EventStoreError> {
        match mutation {
            Mutation::DeleteStream(stream) => {
                let _ = self.client.delete_stream(stream, ExpectedState::Any).await?;
            }
            Mutation::SetMaxCount { stream, max_count } => {
                let metadata = StreamMetadata::new().with_max_count((*max_count).into());
                let _ = self
                    .client
                    .set_stream_metadata(stream, ExpectedState::Any, metadata)
                    .await?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for StreamRemovalProjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRemovalProjector")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Projector for StreamRemovalProjector {
    type State = DeleteState;

    fn name(&self) -> String {
        format!("StreamRemovalProjection-{}", self.policy.kind())
    }

    fn initial_state(&self) -> DeleteState {
        DeleteState::default()
    }

    async fn apply(
        &self,
        state: &DeleteState,
        event: &EventRecord,
        cancel: &ShutdownSignal,
    ) -> Result<DeleteState, ProjectionError> {
        if !event.is_json() || event.is_system_event() {
            return Ok(state.clone());
        }

        let mutation = match self.policy.decide(event) {
            Ok(Some(mutation)) => mutation,
            Ok(None) => return Ok(state.clone()),
            Err(error) => {
                debug!(stream = %event.stream_id, %error, "policy evaluation failed");
                return Ok(state.with_error(event, &error));
            }
        };

        if self.policy.safe_mode() {
            self.log
                .info(&format!("{SAFE_MODE_PREFIX}{}", mutation.describe()));
            return Ok(state.matched());
        }

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProjectionError::Cancelled),
            outcome = self.execute(&mutation) => outcome,
        };

        match outcome {
            Ok(()) => {
                self.log.info(&mutation.describe());
                Ok(state.matched())
            }
            Err(error) => {
                warn!(stream = %event.stream_id, %error, "mutation failed");
                Ok(state.with_error(event, &RetentionError::Store(error)))
            }
        }
    }
}
