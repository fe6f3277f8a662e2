use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, TimeZone, Utc};
use eventsweep::{
    EventStoreClient, FoldProjection, InMemoryCheckpointStore, LogPosition, ProjectionService,
    ServiceOptions, ShutdownSignal, StartPositionFromDateProjector, StartPositionFromDateState,
    StreamName,
};
use eventsweep_memory::{InMemoryEventStore, NewEvent};
use serde_json::json;

fn day(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, month, day).expect("valid date")
}

/// Six events: two on 1 October, three on 3 October and one on 4 October.
fn october_log() -> Arc<InMemoryEventStore> {
    let store = Arc::new(InMemoryEventStore::new());
    let days = [(10, 1), (10, 1), (10, 3), (10, 3), (10, 3), (10, 4)];
    for (index, (month, date)) in days.into_iter().enumerate() {
        let created = Utc
            .with_ymd_and_hms(2024, month, date, 9, 30, 0)
            .single()
            .expect("unambiguous time");
        let name = StreamName::try_new(format!("Sale-{index}")).expect("valid stream name");
        let _ = store
            .append(
                &name,
                vec![NewEvent::json("SaleStarted", &json!({ "id": index })).created_at(created)],
            )
            .expect("append");
    }
    store
}

async fn locate(
    store: &Arc<InMemoryEventStore>,
    checkpoints: &Arc<InMemoryCheckpointStore>,
    target: NaiveDate,
    page_size: usize,
) -> StartPositionFromDateState {
    let client: Arc<dyn EventStoreClient> = store.clone();
    let options = ServiceOptions {
        page_size,
        restart_delay: Duration::from_millis(10),
        ..ServiceOptions::default()
    };
    let mut service = ProjectionService::new(
        FoldProjection::new(StartPositionFromDateProjector::new(target)),
        client,
        checkpoints.clone(),
    )
    .with_options(options);
    service.run(&ShutdownSignal::new()).await.expect("scan")
}

#[tokio::test]
async fn finds_first_event_of_a_day_with_events() {
    // Given
    let store = october_log();
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());

    // When
    let state = locate(&store, &checkpoints, day(10, 3), 4096).await;

    // Then: the earliest 3 October event sits at position 3
    assert_eq!(state.located_position(), Some(LogPosition::new(3)));
    assert!(state.target_reached);
    assert_eq!(state.current_date, Some(day(10, 3)));
    assert!(state.base.finish_projection);
}

#[tokio::test]
async fn day_without_events_resolves_to_the_next_day() {
    let store = october_log();
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());

    let state = locate(&store, &checkpoints, day(10, 2), 4096).await;

    assert_eq!(state.located_position(), Some(LogPosition::new(3)));
    assert!(!state.target_reached);
}

#[tokio::test]
async fn date_before_the_log_resolves_to_its_first_event() {
    // Given: a target older than every event, so the scan runs out
    let store = october_log();
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());

    // When
    let state = locate(&store, &checkpoints, day(9, 1), 4096).await;

    // Then: the scan ended without passing the target and nothing was forced to disk
    assert_eq!(state.located_position(), Some(LogPosition::new(1)));
    assert!(!state.target_reached);
    assert_eq!(state.base.count, 6);
    assert_eq!(checkpoints.save_count(), 0);
}

#[tokio::test]
async fn date_after_the_log_finds_nothing() {
    let store = october_log();
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());

    let state = locate(&store, &checkpoints, day(11, 1), 4096).await;

    assert_eq!(state.located_position(), None);
    assert_eq!(state.current_date, None);
    assert_eq!(state.base.count, 1);
}

#[tokio::test]
async fn passing_the_target_forces_one_checkpoint() {
    // Given
    let store = october_log();
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());

    // When
    let _ = locate(&store, &checkpoints, day(10, 3), 4096).await;

    // Then: exactly one snapshot, written when the scan crossed into 1 October
    let history = checkpoints.history("StartPositionFromDateProjection");
    assert_eq!(history.len(), 1);
    let saved: StartPositionFromDateState =
        serde_json::from_str(&history[0]).expect("decodable snapshot");
    assert_eq!(saved.located_position(), Some(LogPosition::new(3)));
    assert!(!saved.base.force_state_save);
}

#[tokio::test]
async fn scan_stops_at_the_page_size() {
    // Given: a page covering only the two newest events
    let store = october_log();
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());

    // When
    let state = locate(&store, &checkpoints, day(9, 1), 2).await;

    // Then
    assert_eq!(state.base.count, 2);
    assert_eq!(state.located_position(), Some(LogPosition::new(5)));
    assert_eq!(state.current_date, Some(day(10, 3)));
}

#[tokio::test]
#[tracing_test::traced_test]
async fn reload_for_a_new_date_discards_the_previous_scan() {
    // Given: a finished scan for 3 October left its snapshot behind
    let store = october_log();
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let first = locate(&store, &checkpoints, day(10, 3), 4096).await;
    assert_eq!(first.located_position(), Some(LogPosition::new(3)));

    // When: the operator reloads with 4 October as the target
    let projection = FoldProjection::reload(
        StartPositionFromDateProjector::new(day(10, 4)),
        &*checkpoints,
        true,
    )
    .await;
    let client: Arc<dyn EventStoreClient> = store.clone();
    let mut service = ProjectionService::new(projection, client, checkpoints.clone());
    let state = service.run(&ShutdownSignal::new()).await.expect("scan");

    // Then: the new date is scanned from the tail
    assert_eq!(state.target_date, day(10, 4));
    assert!(state.target_reached);
    assert_eq!(state.located_position(), Some(LogPosition::new(6)));
    assert!(logs_contain("checkpoint was taken with different settings"));
}

#[tokio::test]
async fn reload_for_the_same_date_keeps_the_snapshot() {
    let store = october_log();
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let _ = locate(&store, &checkpoints, day(10, 3), 4096).await;

    let projection = FoldProjection::reload(
        StartPositionFromDateProjector::new(day(10, 3)),
        &*checkpoints,
        true,
    )
    .await;

    let restored = eventsweep::Projection::current_state(&projection);
    assert_eq!(restored.located_position(), Some(LogPosition::new(3)));
    assert!(!restored.base.finish_projection);
}
