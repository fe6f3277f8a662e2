//! Running the configured projection.

use std::sync::Arc;

use eventsweep_types::EventStoreClient;
use serde::Serialize;
use tracing::instrument;

use crate::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::config::{ProjectionSelection, ValidatedConfig};
use crate::errors::ServiceError;
use crate::log::OperatorLog;
use crate::projection::{FoldProjection, Projector};
use crate::projections::{
    DeleteState, EventTypeSizeProjector, EventTypeSizeState, StartPositionFromDateProjector,
    StartPositionFromDateState, StreamRemovalProjector,
};
use crate::service::{ProjectionService, ServiceOptions};
use crate::shutdown::ShutdownSignal;

/// Final state of a finished run, by projection.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionReport {
    /// Footprint per event type.
    EventTypeSize(EventTypeSizeState),
    /// The located start position.
    StartPositionFromDate(StartPositionFromDateState),
    /// Removal counts and per-event errors.
    StreamRemoval(DeleteState),
}

#[derive(Serialize)]
struct EventTypeSizeReport<'a> {
    total_events: u64,
    total_size_in_megabytes: f64,
    average_size_in_bytes: f64,
    event_types: Vec<EventTypeSizeLine<'a>>,
}

#[derive(Serialize)]
struct EventTypeSizeLine<'a> {
    event_type: &'a str,
    count: u64,
    size_in_bytes: u64,
}

impl ProjectionReport {
    /// Operator-facing summary of the run.
    pub fn summary(&self) -> String {
        match self {
            Self::EventTypeSize(state) => {
                let report = EventTypeSizeReport {
                    total_events: state.total_events(),
                    total_size_in_megabytes: state.total_size_in_megabytes(),
                    average_size_in_bytes: state.average_size_in_bytes(),
                    event_types: state
                        .largest_first()
                        .into_iter()
                        .map(|(event_type, info)| EventTypeSizeLine {
                            event_type,
                            count: info.count,
                            size_in_bytes: info.size_in_bytes,
                        })
                        .collect(),
                };
                serde_json::to_string_pretty(&report)
                    .unwrap_or_else(|error| format!("event type size report unavailable: {error}"))
            }
            Self::StartPositionFromDate(state) => match state.located_position() {
                Some(position) if state.target_reached => {
                    format!("First position for {}: {position}", state.target_date)
                }
                Some(position) => format!(
                    "No events on {}; first position after it: {position}",
                    state.target_date
                ),
                None => format!("No events on or after {}", state.target_date),
            },
            Self::StreamRemoval(state) => format!(
                "Matched {} events after {} examined, {} errors",
                state.deleted_count,
                state.base.count,
                state.errors.len()
            ),
        }
    }
}

/// Build the selected projection and run it to completion.
///
/// Checkpoints are kept as files in the configured directory.
#[instrument(skip_all, fields(selection = ?config.selection))]
pub async fn run_configured(
    config: &ValidatedConfig,
    client: Arc<dyn EventStoreClient>,
    log: Arc<dyn OperatorLog>,
    cancel: &ShutdownSignal,
) -> Result<ProjectionReport, ServiceError> {
    let checkpoints: Arc<dyn CheckpointStore> =
        Arc::new(FileCheckpointStore::new(&config.checkpoint_directory));
    run_selection(
        &config.selection,
        config.options.clone(),
        config.reload_from_checkpoint,
        client,
        checkpoints,
        log,
        cancel,
    )
    .await
}

/// Build `selection` and run it with the given collaborators.
pub async fn run_selection(
    selection: &ProjectionSelection,
    options: ServiceOptions,
    reload_from_checkpoint: bool,
    client: Arc<dyn EventStoreClient>,
    checkpoints: Arc<dyn CheckpointStore>,
    log: Arc<dyn OperatorLog>,
    cancel: &ShutdownSignal,
) -> Result<ProjectionReport, ServiceError> {
    let collaborators = Collaborators {
        options,
        reload_from_checkpoint,
        client: Arc::clone(&client),
        checkpoints,
        log: Arc::clone(&log),
    };

    let report = match selection {
        ProjectionSelection::EventTypeSize => {
            ProjectionReport::EventTypeSize(collaborators.drive(EventTypeSizeProjector, cancel).await?)
        }
        ProjectionSelection::StartPositionFromDate(date) => {
            ProjectionReport::StartPositionFromDate(
                collaborators
                    .drive(StartPositionFromDateProjector::new(*date), cancel)
                    .await?,
            )
        }
        ProjectionSelection::StreamRemoval(policy) => {
            let projector =
                StreamRemovalProjector::new(client, policy.clone(), Arc::clone(&log));
            ProjectionReport::StreamRemoval(collaborators.drive(projector, cancel).await?)
        }
    };

    log.info(&report.summary());
    Ok(report)
}

struct Collaborators {
    options: ServiceOptions,
    reload_from_checkpoint: bool,
    client: Arc<dyn EventStoreClient>,
    checkpoints: Arc<dyn CheckpointStore>,
    log: Arc<dyn OperatorLog>,
}

impl Collaborators {
    async fn drive<P: Projector>(
        self,
        projector: P,
        cancel: &ShutdownSignal,
    ) -> Result<P::State, ServiceError> {
        let projection = FoldProjection::reload(
            projector,
            self.checkpoints.as_ref(),
            self.reload_from_checkpoint,
        )
        .await;

        let mut service = ProjectionService::new(projection, self.client, self.checkpoints)
            .with_options(self.options)
            .with_log(self.log);
        service.run(cancel).await
    }
}
