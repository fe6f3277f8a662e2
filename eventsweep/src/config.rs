//! Startup configuration.
//!
//! The configuration document selects exactly one projection and supplies
//! the checkpoint and restart settings of the service that drives it. It is
//! validated as a whole before any event is consumed.
//!
//! ```json
//! {
//!   "connection_string": "esdb://localhost:2113?tls=false",
//!   "checkpoint_count": 1000,
//!   "reload_from_checkpoint": true,
//!   "projection": {
//!     "kind": "StreamRemoval",
//!     "type": "DeleteStreamBefore",
//!     "safe_mode": true,
//!     "before_date_time": "2025-10-30",
//!     "event_types": "SaleStarted,SaleCompleted"
//!   }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use eventsweep_types::{LogPosition, StreamName};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ConfigError;
use crate::retention::{parse_event_types, MaxEventCount, PolicyKind, RetentionPolicy};
use crate::service::{CheckpointCount, ServiceOptions};
use crate::support::parse_date_text;

/// Overrides the connection string.
pub const CONNECTION_STRING_ENV: &str = "EVENTSWEEP_CONNECTION_STRING";
/// Overrides the checkpoint interval.
pub const CHECKPOINT_COUNT_ENV: &str = "EVENTSWEEP_CHECKPOINT_COUNT";

const fn default_checkpoint_count() -> u64 {
    1000
}

const fn default_restart_delay_ms() -> u64 {
    1000
}

const fn default_safe_mode() -> bool {
    true
}

fn default_checkpoint_directory() -> PathBuf {
    PathBuf::from("checkpoints")
}

/// The configuration document as written by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyserConfig {
    /// Event store endpoint.
    #[serde(default)]
    pub connection_string: Option<String>,
    /// Checkpoint every this many events; zero disables count-based checkpoints.
    #[serde(default = "default_checkpoint_count")]
    pub checkpoint_count: u64,
    /// Log position to start from when there is no checkpoint.
    #[serde(default)]
    pub start_position: Option<u64>,
    /// Where checkpoint files are kept.
    #[serde(default = "default_checkpoint_directory")]
    pub checkpoint_directory: PathBuf,
    /// Resume from the last checkpoint instead of starting fresh.
    #[serde(default)]
    pub reload_from_checkpoint: bool,
    /// Delay before restarting after a failure, in milliseconds.
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
    /// The projection to run.
    #[serde(default)]
    pub projection: Option<ProjectionConfig>,
}

/// Projection selection as written by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ProjectionConfig {
    /// Audit storage footprint per event type.
    EventTypeSize,
    /// Find the first log position of a date.
    StartPositionFromDate {
        /// The date, `YYYY-MM-DD` or a timestamp.
        date: String,
    },
    /// Apply a retention policy.
    StreamRemoval(DeleteOptions),
}

/// Retention policy parameters as written by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOptions {
    /// Policy variant name, e.g. `DeleteStreamBefore`.
    #[serde(rename = "type")]
    pub policy_type: String,
    /// Log instead of mutating. Defaults to `true`.
    #[serde(default = "default_safe_mode")]
    pub safe_mode: bool,
    /// For `DeleteOrganisation`.
    #[serde(default)]
    pub organisation_id: Option<String>,
    /// For `DeleteSalesBefore` and `DeleteStreamBefore`.
    #[serde(default)]
    pub before_date_time: Option<String>,
    /// Comma separated, for `DeleteStreamBefore` and `SetStreamMaxEventCount`.
    #[serde(default)]
    pub event_types: Option<String>,
    /// For `SetStreamMaxEventCount`.
    #[serde(default)]
    pub max_event_count: Option<i64>,
    /// For `DeleteStream`.
    #[serde(default)]
    pub stream_name: Option<String>,
}

/// The projection to run, validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionSelection {
    /// Audit storage footprint per event type.
    EventTypeSize,
    /// Find the first log position of the date.
    StartPositionFromDate(NaiveDate),
    /// Apply the retention policy.
    StreamRemoval(RetentionPolicy),
}

/// A configuration that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    /// Event store endpoint.
    pub connection_string: String,
    /// The projection to run.
    pub selection: ProjectionSelection,
    /// Options for the projection service.
    pub options: ServiceOptions,
    /// Where checkpoint files are kept.
    pub checkpoint_directory: PathBuf,
    /// Resume from the last checkpoint instead of starting fresh.
    pub reload_from_checkpoint: bool,
}

impl AnalyserConfig {
    /// Parse a configuration document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides looked up by variable name.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(connection_string) = lookup(CONNECTION_STRING_ENV) {
            self.connection_string = Some(connection_string);
        }
        if let Some(raw) = lookup(CHECKPOINT_COUNT_ENV) {
            self.checkpoint_count =
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidEnvOverride {
                        name: CHECKPOINT_COUNT_ENV,
                        value: raw.clone(),
                    })?;
        }
        Ok(self)
    }

    /// Check the document and turn it into typed settings.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let connection_string = self
            .connection_string
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingConnectionString)?
            .to_string();

        let selection = match self
            .projection
            .as_ref()
            .ok_or(ConfigError::NoProjectionSelected)?
        {
            ProjectionConfig::EventTypeSize => ProjectionSelection::EventTypeSize,
            ProjectionConfig::StartPositionFromDate { date } => {
                let parsed =
                    parse_date_text(date).ok_or_else(|| ConfigError::InvalidDate(date.clone()))?;
                ProjectionSelection::StartPositionFromDate(parsed.date_naive())
            }
            ProjectionConfig::StreamRemoval(options) => {
                ProjectionSelection::StreamRemoval(options.to_policy()?)
            }
        };

        let options = ServiceOptions {
            checkpoint_count: CheckpointCount::new(self.checkpoint_count),
            start_position: self.start_position.map(LogPosition::new),
            restart_delay: Duration::from_millis(self.restart_delay_ms),
            ..ServiceOptions::default()
        };

        Ok(ValidatedConfig {
            connection_string,
            selection,
            options,
            checkpoint_directory: self.checkpoint_directory.clone(),
            reload_from_checkpoint: self.reload_from_checkpoint,
        })
    }
}

impl DeleteOptions {
    /// Build the retention policy these options describe.
    pub fn to_policy(&self) -> Result<RetentionPolicy, ConfigError> {
        let kind = PolicyKind::from_name(&self.policy_type)
            .ok_or_else(|| ConfigError::UnknownPolicyType(self.policy_type.clone()))?;

        let policy = match kind {
            PolicyKind::DeleteOrganisation => {
                let raw = required(kind, "organisation_id", self.organisation_id.as_deref())?;
                let organisation_id = Uuid::parse_str(raw)
                    .map_err(|_| ConfigError::InvalidOrganisationId(raw.to_string()))?;
                RetentionPolicy::delete_organisation(organisation_id)
            }
            PolicyKind::DeleteSalesBefore => {
                RetentionPolicy::delete_sales_before(self.before_date_time(kind)?)
            }
            PolicyKind::DeleteStreamBefore => RetentionPolicy::delete_stream_before(
                self.before_date_time(kind)?,
                self.event_types(kind)?,
            ),
            PolicyKind::SetStreamMaxEventCount => RetentionPolicy::set_stream_max_event_count(
                self.max_event_count()?,
                self.event_types(kind)?,
            ),
            PolicyKind::DeleteStream => {
                let raw = required(kind, "stream_name", self.stream_name.as_deref())?;
                let stream = StreamName::try_new(raw)
                    .map_err(|_| ConfigError::InvalidStreamName(raw.to_string()))?;
                RetentionPolicy::delete_stream(stream)
            }
        };

        Ok(policy.with_safe_mode(self.safe_mode))
    }

    fn before_date_time(&self, kind: PolicyKind) -> Result<chrono::DateTime<chrono::Utc>, ConfigError> {
        let raw = required(kind, "before_date_time", self.before_date_time.as_deref())?;
        parse_date_text(raw).ok_or_else(|| ConfigError::InvalidDate(raw.to_string()))
    }

    fn event_types(&self, kind: PolicyKind) -> Result<Vec<String>, ConfigError> {
        let raw = required(kind, "event_types", self.event_types.as_deref())?;
        let event_types = parse_event_types(raw);
        if event_types.is_empty() {
            return Err(ConfigError::EmptyEventTypes(kind.to_string()));
        }
        Ok(event_types)
    }

    fn max_event_count(&self) -> Result<MaxEventCount, ConfigError> {
        let raw = self
            .max_event_count
            .ok_or(ConfigError::MissingMaxEventCount)?;
        u64::try_from(raw)
            .ok()
            .and_then(|count| MaxEventCount::try_new(count).ok())
            .ok_or(ConfigError::InvalidMaxEventCount(raw))
    }
}

fn required<'a>(
    kind: PolicyKind,
    parameter: &'static str,
    value: Option<&'a str>,
) -> Result<&'a str, ConfigError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ConfigError::MissingParameter {
            policy: kind.to_string(),
            parameter,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn with_projection(projection: serde_json::Value) -> AnalyserConfig {
        AnalyserConfig::from_json(
            &json!({
                "connection_string": "esdb://localhost:2113?tls=false",
                "projection": projection,
            })
            .to_string(),
        )
        .expect("parse config")
    }

    #[test]
    fn defaults_apply_to_omitted_fields() {
        let config = with_projection(json!({ "kind": "EventTypeSize" }));

        assert_eq!(config.checkpoint_count, 1000);
        assert_eq!(config.checkpoint_directory, PathBuf::from("checkpoints"));
        assert!(!config.reload_from_checkpoint);

        let validated = config.validate().expect("valid");
        assert_eq!(validated.selection, ProjectionSelection::EventTypeSize);
        assert_eq!(validated.options.checkpoint_count, CheckpointCount::new(1000));
        assert_eq!(validated.options.restart_delay, Duration::from_secs(1));
    }

    #[test]
    fn safe_mode_defaults_to_true() {
        let config = with_projection(json!({
            "kind": "StreamRemoval",
            "type": "DeleteStream",
            "stream_name": "Sale-1",
        }));

        match config.validate().expect("valid").selection {
            ProjectionSelection::StreamRemoval(policy) => assert!(policy.safe_mode()),
            other => panic!("unexpected selection {other:?}"),
        }
    }

    #[test]
    fn stream_before_parses_cutoff_and_type_list() {
        let config = with_projection(json!({
            "kind": "StreamRemoval",
            "type": "DeleteStreamBefore",
            "safe_mode": false,
            "before_date_time": "2025-10-30",
            "event_types": "A, B",
        }));

        match config.validate().expect("valid").selection {
            ProjectionSelection::StreamRemoval(RetentionPolicy::DeleteStreamBefore {
                before,
                event_types,
                safe_mode,
            }) => {
                assert_eq!(before.to_rfc3339(), "2025-10-30T00:00:00+00:00");
                assert_eq!(event_types, vec!["A".to_string(), "B".to_string()]);
                assert!(!safe_mode);
            }
            other => panic!("unexpected selection {other:?}"),
        }
    }

    #[test]
    fn missing_max_event_count_is_rejected() {
        let config = with_projection(json!({
            "kind": "StreamRemoval",
            "type": "SetStreamMaxEventCount",
            "event_types": "TestEvent",
        }));

        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingMaxEventCount)
        ));
    }

    #[test]
    fn non_positive_max_event_count_is_rejected() {
        for count in [0, -3] {
            let config = with_projection(json!({
                "kind": "StreamRemoval",
                "type": "SetStreamMaxEventCount",
                "event_types": "TestEvent",
                "max_event_count": count,
            }));

            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidMaxEventCount(rejected)) if rejected == count
            ));
        }
    }

    #[test]
    fn missing_policy_parameter_names_the_parameter() {
        let config = with_projection(json!({
            "kind": "StreamRemoval",
            "type": "DeleteOrganisation",
        }));

        let error = config.validate().expect_err("missing organisation");
        assert_eq!(
            error.to_string(),
            "DeleteOrganisation requires `organisation_id` to be specified"
        );
    }

    #[test]
    fn invalid_organisation_id_is_rejected() {
        let config = with_projection(json!({
            "kind": "StreamRemoval",
            "type": "DeleteOrganisation",
            "organisation_id": "not-a-uuid",
        }));

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidOrganisationId(_))
        ));
    }

    #[test]
    fn unknown_policy_type_is_rejected() {
        let config = with_projection(json!({
            "kind": "StreamRemoval",
            "type": "DeleteEverything",
        }));

        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownPolicyType(name)) if name == "DeleteEverything"
        ));
    }

    #[test]
    fn missing_projection_and_connection_are_rejected() {
        let empty = AnalyserConfig::from_json("{}").expect("parse");
        assert!(matches!(
            empty.validate(),
            Err(ConfigError::MissingConnectionString)
        ));

        let no_projection = AnalyserConfig::from_json(r#"{"connection_string":"esdb://x"}"#)
            .expect("parse");
        assert!(matches!(
            no_projection.validate(),
            Err(ConfigError::NoProjectionSelected)
        ));
    }

    #[test]
    fn start_position_date_accepts_timestamps() {
        let config = with_projection(json!({
            "kind": "StartPositionFromDate",
            "date": "2025-10-01T13:45:00Z",
        }));

        assert_eq!(
            config.validate().expect("valid").selection,
            ProjectionSelection::StartPositionFromDate(
                NaiveDate::from_ymd_opt(2025, 10, 1).expect("valid date")
            )
        );
    }

    #[test]
    fn environment_overrides_replace_document_values() {
        let config = with_projection(json!({ "kind": "EventTypeSize" }))
            .with_overrides_from(|name| match name {
                CONNECTION_STRING_ENV => Some("esdb://override".to_string()),
                CHECKPOINT_COUNT_ENV => Some("0".to_string()),
                _ => None,
            })
            .expect("overrides");

        let validated = config.validate().expect("valid");
        assert_eq!(validated.connection_string, "esdb://override");
        assert_eq!(validated.options.checkpoint_count, CheckpointCount::disabled());
    }

    #[test]
    fn malformed_checkpoint_override_is_rejected() {
        let result = with_projection(json!({ "kind": "EventTypeSize" })).with_overrides_from(
            |name| (name == CHECKPOINT_COUNT_ENV).then(|| "often".to_string()),
        );

        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnvOverride { name: CHECKPOINT_COUNT_ENV, .. })
        ));
    }

    #[test]
    fn config_file_is_read_from_disk() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("appsettings.json");
        std::fs::write(
            &path,
            r#"{"connection_string":"esdb://x","checkpoint_count":5,"projection":{"kind":"EventTypeSize"}}"#,
        )
        .expect("write config");

        let config = AnalyserConfig::from_file(&path).expect("read config");
        assert_eq!(config.checkpoint_count, 5);

        assert!(matches!(
            AnalyserConfig::from_file(dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
