//! Retention policies and the per-event decision they make.
//!
//! A [`RetentionPolicy`] is evaluated against one event at a time and yields
//! the [`Mutation`] to issue against the event's stream, if any. Executing
//! the mutation (or suppressing it in safe mode) is the job of
//! [`crate::projections::StreamRemovalProjector`].

use chrono::{DateTime, Utc};
use eventsweep_types::{EventRecord, StreamName};
use nutype::nutype;
use uuid::Uuid;

use crate::errors::RetentionError;
use crate::support::extract_event_date;

/// Event type of the legacy sale event targeted by [`RetentionPolicy::DeleteSalesBefore`].
pub const LEGACY_SALE_EVENT_TYPE: &str = "SalesTransactionStartedEvent";

/// Absolute cap on the number of events a stream keeps.
#[nutype(
    validate(greater = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct MaxEventCount(u64);

/// Which variant a policy is, without its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    /// See [`RetentionPolicy::DeleteOrganisation`].
    DeleteOrganisation,
    /// See [`RetentionPolicy::DeleteSalesBefore`].
    DeleteSalesBefore,
    /// See [`RetentionPolicy::DeleteStreamBefore`].
    DeleteStreamBefore,
    /// See [`RetentionPolicy::SetStreamMaxEventCount`].
    SetStreamMaxEventCount,
    /// See [`RetentionPolicy::DeleteStream`].
    DeleteStream,
}

impl PolicyKind {
    /// Parse the policy type name used in configuration.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "DeleteOrganisation" => Some(Self::DeleteOrganisation),
            "DeleteSalesBefore" => Some(Self::DeleteSalesBefore),
            "DeleteStreamBefore" => Some(Self::DeleteStreamBefore),
            "SetStreamMaxEventCount" => Some(Self::SetStreamMaxEventCount),
            "DeleteStream" => Some(Self::DeleteStream),
            _ => None,
        }
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::DeleteOrganisation => "DeleteOrganisation",
            Self::DeleteSalesBefore => "DeleteSalesBefore",
            Self::DeleteStreamBefore => "DeleteStreamBefore",
            Self::SetStreamMaxEventCount => "SetStreamMaxEventCount",
            Self::DeleteStream => "DeleteStream",
        };
        f.write_str(name)
    }
}

/// What to prune, and when.
///
/// Every variant carries `safe_mode`; when set, matches are logged but no
/// mutation reaches the store. Constructors default it to `true`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Delete every stream with an event whose payload mentions the organisation.
    DeleteOrganisation {
        /// Organisation to remove.
        organisation_id: Uuid,
        /// Log instead of deleting.
        safe_mode: bool,
    },
    /// Delete streams of legacy sale events dated before `before`.
    DeleteSalesBefore {
        /// Exclusive cutoff.
        before: DateTime<Utc>,
        /// Log instead of deleting.
        safe_mode: bool,
    },
    /// Delete streams of events of the listed types dated before `before`.
    DeleteStreamBefore {
        /// Exclusive cutoff.
        before: DateTime<Utc>,
        /// Event types the policy applies to.
        event_types: Vec<String>,
        /// Log instead of deleting.
        safe_mode: bool,
    },
    /// Cap streams of events of the listed types to their newest events.
    SetStreamMaxEventCount {
        /// Number of events each stream keeps.
        max_event_count: MaxEventCount,
        /// Event types the policy applies to.
        event_types: Vec<String>,
        /// Log instead of writing metadata.
        safe_mode: bool,
    },
    /// Delete one named stream.
    DeleteStream {
        /// Stream to delete.
        stream: StreamName,
        /// Log instead of deleting.
        safe_mode: bool,
    },
}

/// A store mutation decided by a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Delete the stream, whatever its revision.
    DeleteStream(StreamName),
    /// Set the stream's absolute max event count.
    SetMaxCount {
        /// Stream to cap.
        stream: StreamName,
        /// The cap.
        max_count: MaxEventCount,
    },
}

impl Mutation {
    /// Operator-facing description of the mutation.
    pub fn describe(&self) -> String {
        match self {
            Self::DeleteStream(stream) => format!("Deleted stream: {stream}"),
            Self::SetMaxCount { stream, max_count } => {
                format!("Set max event count {max_count} on stream: {stream}")
            }
        }
    }
}

/// Split a comma separated event type list, dropping blanks.
pub fn parse_event_types(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|event_type| !event_type.is_empty())
        .map(str::to_string)
        .collect()
}

impl RetentionPolicy {
    /// Delete every stream mentioning `organisation_id`, in safe mode.
    pub const fn delete_organisation(organisation_id: Uuid) -> Self {
        Self::DeleteOrganisation {
            organisation_id,
            safe_mode: true,
        }
    }

    /// Delete legacy sale streams dated before `before`, in safe mode.
    pub const fn delete_sales_before(before: DateTime<Utc>) -> Self {
        Self::DeleteSalesBefore {
            before,
            safe_mode: true,
        }
    }

    /// Delete streams of `event_types` dated before `before`, in safe mode.
    pub fn delete_stream_before<I, S>(before: DateTime<Utc>, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::DeleteStreamBefore {
            before,
            event_types: event_types.into_iter().map(Into::into).collect(),
            safe_mode: true,
        }
    }

    /// Cap streams of `event_types` to `max_event_count` events, in safe mode.
    pub fn set_stream_max_event_count<I, S>(max_event_count: MaxEventCount, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::SetStreamMaxEventCount {
            max_event_count,
            event_types: event_types.into_iter().map(Into::into).collect(),
            safe_mode: true,
        }
    }

    /// Delete `stream`, in safe mode.
    pub const fn delete_stream(stream: StreamName) -> Self {
        Self::DeleteStream {
            stream,
            safe_mode: true,
        }
    }

    /// This policy with safe mode switched on or off.
    #[must_use]
    pub fn with_safe_mode(mut self, enabled: bool) -> Self {
        match &mut self {
            Self::DeleteOrganisation { safe_mode, .. }
            | Self::DeleteSalesBefore { safe_mode, .. }
            | Self::DeleteStreamBefore { safe_mode, .. }
            | Self::SetStreamMaxEventCount { safe_mode, .. }
            | Self::DeleteStream { safe_mode, .. } => *safe_mode = enabled,
        }
        self
    }

    /// Whether mutations are suppressed.
    pub const fn safe_mode(&self) -> bool {
        match self {
            Self::DeleteOrganisation { safe_mode, .. }
            | Self::DeleteSalesBefore { safe_mode, .. }
            | Self::DeleteStreamBefore { safe_mode, .. }
            | Self::SetStreamMaxEventCount { safe_mode, .. }
            | Self::DeleteStream { safe_mode, .. } => *safe_mode,
        }
    }

    /// The variant of this policy.
    pub const fn kind(&self) -> PolicyKind {
        match self {
            Self::DeleteOrganisation { .. } => PolicyKind::DeleteOrganisation,
            Self::DeleteSalesBefore { .. } => PolicyKind::DeleteSalesBefore,
            Self::DeleteStreamBefore { .. } => PolicyKind::DeleteStreamBefore,
            Self::SetStreamMaxEventCount { .. } => PolicyKind::SetStreamMaxEventCount,
            Self::DeleteStream { .. } => PolicyKind::DeleteStream,
        }
    }

    /// Decide what to do about `event`.
    ///
    /// Returns `Ok(None)` when the policy does not match. Callers are
    /// expected to have dropped non-JSON and system events already.
    pub fn decide(&self, event: &EventRecord) -> Result<Option<Mutation>, RetentionError> {
        let delete = || Mutation::DeleteStream(event.stream_id.clone());

        match self {
            Self::DeleteOrganisation {
                organisation_id, ..
            } => {
                let needle = organisation_id.hyphenated().to_string();
                Ok(event.data_as_text().contains(&needle).then(delete))
            }
            Self::DeleteSalesBefore { before, .. } => {
                if event.event_type != LEGACY_SALE_EVENT_TYPE {
                    return Ok(None);
                }
                Ok(dated_before(event, *before)?.then(delete))
            }
            Self::DeleteStreamBefore {
                before,
                event_types,
                ..
            } => {
                if !event_types.contains(&event.event_type) {
                    return Ok(None);
                }
                Ok(dated_before(event, *before)?.then(delete))
            }
            Self::SetStreamMaxEventCount {
                max_event_count,
                event_types,
                ..
            } => Ok(event_types
                .contains(&event.event_type)
                .then(|| Mutation::SetMaxCount {
                    stream: event.stream_id.clone(),
                    max_count: *max_event_count,
                })),
            Self::DeleteStream { stream, .. } => Ok((event.stream_id == *stream).then(delete)),
        }
    }
}

fn dated_before(event: &EventRecord, cutoff: DateTime<Utc>) -> Result<bool, RetentionError> {
    let payload: serde_json::Value = serde_json::from_slice(&event.data)?;
    Ok(extract_event_date(&payload)? < cutoff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use eventsweep_types::{LogPosition, JSON_CONTENT_TYPE};
    use serde_json::json;

    fn cutoff() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 30, 0, 0, 0)
            .single()
            .expect("valid date")
    }

    fn event(stream: &str, event_type: &str, payload: &serde_json::Value) -> EventRecord {
        EventRecord {
            stream_id: StreamName::try_new(stream).expect("valid stream name"),
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            content_type: JSON_CONTENT_TYPE.to_string(),
            data: payload.to_string().into_bytes(),
            metadata: Vec::new(),
            position: LogPosition::new(1),
            created: Utc::now(),
        }
    }

    fn stream(name: &str) -> StreamName {
        StreamName::try_new(name).expect("valid stream name")
    }

    #[test]
    fn constructors_default_to_safe_mode() {
        assert!(RetentionPolicy::delete_stream(stream("Sale-1")).safe_mode());
        assert!(!RetentionPolicy::delete_stream(stream("Sale-1"))
            .with_safe_mode(false)
            .safe_mode());
    }

    #[test]
    fn kind_round_trips_through_its_name() {
        for kind in [
            PolicyKind::DeleteOrganisation,
            PolicyKind::DeleteSalesBefore,
            PolicyKind::DeleteStreamBefore,
            PolicyKind::SetStreamMaxEventCount,
            PolicyKind::DeleteStream,
        ] {
            assert_eq!(PolicyKind::from_name(&kind.to_string()), Some(kind));
        }
        assert_eq!(PolicyKind::from_name("DeleteEverything"), None);
    }

    #[test]
    fn organisation_match_is_a_substring_search() {
        let organisation = Uuid::new_v4();
        let policy = RetentionPolicy::delete_organisation(organisation);

        let mentioning = event(
            "Sale-1",
            "SaleStarted",
            &json!({ "nested": { "org": organisation.to_string() } }),
        );
        let unrelated = event("Sale-2", "SaleStarted", &json!({ "org": Uuid::new_v4() }));

        assert_eq!(
            policy.decide(&mentioning).expect("decide"),
            Some(Mutation::DeleteStream(stream("Sale-1")))
        );
        assert_eq!(policy.decide(&unrelated).expect("decide"), None);
    }

    #[test]
    fn sales_before_only_considers_the_legacy_type() {
        let policy = RetentionPolicy::delete_sales_before(cutoff());
        let old = json!({ "dt": "2025-09-01T00:00:00.0000000Z" });

        assert!(policy
            .decide(&event("Sale-1", LEGACY_SALE_EVENT_TYPE, &old))
            .expect("decide")
            .is_some());
        assert!(policy
            .decide(&event("Sale-1", "SaleStarted", &old))
            .expect("decide")
            .is_none());
    }

    #[test]
    fn stream_before_cutoff_is_exclusive() {
        let policy = RetentionPolicy::delete_stream_before(cutoff(), ["A", "B"]);

        let day_before = event("S-1", "A", &json!({ "dateTime": "2025-10-29T23:59:59Z" }));
        let on_cutoff = event("S-2", "B", &json!({ "dateTime": "2025-10-30T00:00:00Z" }));
        let other_type = event("S-3", "C", &json!({ "dateTime": "2025-01-01T00:00:00Z" }));

        assert!(policy.decide(&day_before).expect("decide").is_some());
        assert!(policy.decide(&on_cutoff).expect("decide").is_none());
        assert!(policy.decide(&other_type).expect("decide").is_none());
    }

    #[test]
    fn stream_before_reports_missing_dates() {
        let policy = RetentionPolicy::delete_stream_before(cutoff(), ["A"]);
        let undated = event("S-1", "A", &json!({ "id": 1 }));

        assert!(matches!(
            policy.decide(&undated),
            Err(RetentionError::MissingDate { .. })
        ));
    }

    #[test]
    fn stream_before_reports_invalid_json() {
        let policy = RetentionPolicy::delete_stream_before(cutoff(), ["A"]);
        let mut broken = event("S-1", "A", &json!({}));
        broken.data = b"{\"dateTime\":".to_vec();

        assert!(matches!(
            policy.decide(&broken),
            Err(RetentionError::InvalidJson(_))
        ));
    }

    #[test]
    fn max_count_applies_to_listed_types_without_dates() {
        let max = MaxEventCount::try_new(2).expect("positive");
        let policy = RetentionPolicy::set_stream_max_event_count(max, ["TestEvent"]);

        assert_eq!(
            policy
                .decide(&event("Test-1", "TestEvent", &json!({})))
                .expect("decide"),
            Some(Mutation::SetMaxCount {
                stream: stream("Test-1"),
                max_count: max
            })
        );
    }

    #[test]
    fn delete_stream_matches_stream_id() {
        let policy = RetentionPolicy::delete_stream(stream("Sale-9"));

        assert!(policy
            .decide(&event("Sale-9", "Anything", &json!({})))
            .expect("decide")
            .is_some());
        assert!(policy
            .decide(&event("Sale-10", "Anything", &json!({})))
            .expect("decide")
            .is_none());
    }

    #[test]
    fn event_type_lists_are_trimmed_and_blank_entries_dropped() {
        assert_eq!(
            parse_event_types(" A, B ,,C "),
            vec!["A".to_string(), "B".to_string(), "C".to_string()]
        );
    }

    #[test]
    fn max_event_count_must_be_positive() {
        assert!(MaxEventCount::try_new(0).is_err());
    }
}
