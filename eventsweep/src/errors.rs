//! Error types for eventsweep.
//!
//! Errors are split by where they surface:
//!
//! - **`RetentionError`**: a single event could not be evaluated or its
//!   mutation failed. Never escapes a projection; it becomes an entry in
//!   the removal state's error list.
//! - **`CheckpointError`**: a snapshot could not be read, written or
//!   (de)serialized.
//! - **`ProjectionError`**: the fold itself could not continue.
//! - **`ServiceError`**: what the projection service reports. Everything but
//!   cancellation is handled inside the service by restarting.
//! - **`ConfigError`**: startup configuration is invalid. Raised before any
//!   event is consumed.

use std::path::PathBuf;

use eventsweep_types::EventStoreError;
use thiserror::Error;

/// Failure to evaluate or act on one event under a retention policy.
#[derive(Debug, Error)]
pub enum RetentionError {
    /// The payload could not be parsed as JSON.
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// None of the candidate date fields is present in the payload.
    #[error("no date field found in payload (expected one of {expected})")]
    MissingDate {
        /// Comma separated list of the candidate field names.
        expected: String,
    },

    /// A date field is present but its value is not a recognised date.
    #[error("date field `{field}` has unparseable value `{value}`")]
    InvalidDate {
        /// The field that was read.
        field: String,
        /// The raw value found.
        value: String,
    },

    /// The store rejected the mutation.
    #[error("store mutation failed: {0}")]
    Store(#[from] EventStoreError),
}

/// Failure to persist or restore a projection snapshot.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Reading or writing the checkpoint medium failed.
    #[error("checkpoint I/O failed at {path}: {source}")]
    Io {
        /// File involved in the failed operation.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The snapshot could not be serialized or deserialized.
    #[error("checkpoint {name} could not be (de)serialized: {source}")]
    Serialization {
        /// Formatted name of the projection.
        name: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// Injected or backend-reported failure that carries no richer detail.
    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
}

/// Failure that stops a projection fold.
///
/// Ordinary per-event failures are not projection errors; projectors record
/// them in their state and return normally.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// The cancellation token fired while the fold was waiting.
    #[error("projection cancelled")]
    Cancelled,

    /// The projection state could not be snapshotted.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Outcome reported by [`crate::ProjectionService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The run was cancelled. The last persisted checkpoint is the recovery point.
    #[error("projection service cancelled")]
    Cancelled,

    /// The event store failed while opening or iterating the event stream.
    #[error("event store failure: {0}")]
    Store(#[from] EventStoreError),

    /// A checkpoint could not be written.
    #[error("checkpoint failure: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// A live subscription ended before the projection finished.
    #[error("subscription for {0} ended before the projection finished")]
    SubscriptionEnded(String),
}

impl From<ProjectionError> for ServiceError {
    fn from(error: ProjectionError) -> Self {
        match error {
            ProjectionError::Cancelled => Self::Cancelled,
            ProjectionError::Checkpoint(inner) => Self::Checkpoint(inner),
        }
    }
}

/// Invalid startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        /// Path of the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration document is not valid.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// No event store connection string was given.
    #[error("no event store connection string has been specified")]
    MissingConnectionString,

    /// No projection was selected.
    #[error("no projection has been selected")]
    NoProjectionSelected,

    /// The retention policy type is not one of the known variants.
    #[error("unknown retention policy type `{0}`")]
    UnknownPolicyType(String),

    /// A parameter required by the selected policy is missing.
    #[error("{policy} requires `{parameter}` to be specified")]
    MissingParameter {
        /// The policy being configured.
        policy: String,
        /// Name of the missing parameter.
        parameter: &'static str,
    },

    /// A date parameter could not be parsed.
    #[error("invalid date `{0}`")]
    InvalidDate(String),

    /// The organisation id is not a UUID.
    #[error("invalid organisation id `{0}`")]
    InvalidOrganisationId(String),

    /// The max event count is missing.
    #[error("Invalid max event count, no value has been specified")]
    MissingMaxEventCount,

    /// The max event count is zero or negative.
    #[error("Invalid max event count, {0} must be greater than zero")]
    InvalidMaxEventCount(i64),

    /// The stream name is empty or too long.
    #[error("invalid stream name `{0}`")]
    InvalidStreamName(String),

    /// The event type allow-list is empty.
    #[error("{0} requires at least one event type")]
    EmptyEventTypes(String),

    /// An environment override holds a value of the wrong shape.
    #[error("environment variable {name} has invalid value `{value}`")]
    InvalidEnvOverride {
        /// Variable name.
        name: &'static str,
        /// The offending value.
        value: String,
    },
}
