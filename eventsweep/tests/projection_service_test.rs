use std::sync::Arc;
use std::time::Duration;

use eventsweep::{
    CheckpointCount, EventStoreClient, EventTypeSizeProjector, EventTypeSizeState, FoldProjection,
    InMemoryCheckpointStore, LogChannel, LogPosition, MemoryLog, Projection, ProjectionService,
    ServiceError, ServiceOptions, ShutdownSignal, StreamName,
};
use eventsweep_memory::{InMemoryEventStore, NewEvent};
use serde_json::json;

const AUDIT: &str = "EventTypeSizeProjection";

fn stream(name: &str) -> StreamName {
    StreamName::try_new(name).expect("valid stream name")
}

/// Append `count` single-event streams, returning the position of each event.
fn seed(store: &InMemoryEventStore, count: usize) -> Vec<LogPosition> {
    (0..count)
        .map(|id| {
            store
                .append(
                    &stream(&format!("Sale-{id}")),
                    vec![NewEvent::json("SaleStarted", &json!({ "id": id }))],
                )
                .expect("append")
        })
        .collect()
}

fn bounded(checkpoint_count: u64) -> ServiceOptions {
    ServiceOptions {
        checkpoint_count: CheckpointCount::new(checkpoint_count),
        restart_delay: Duration::from_millis(10),
        finish_on_checkpoint_reached: true,
        ..ServiceOptions::default()
    }
}

fn audit_service(
    store: &Arc<InMemoryEventStore>,
    checkpoints: &Arc<InMemoryCheckpointStore>,
    projection: FoldProjection<EventTypeSizeProjector>,
    options: ServiceOptions,
) -> ProjectionService<FoldProjection<EventTypeSizeProjector>> {
    let client: Arc<dyn EventStoreClient> = store.clone();
    ProjectionService::new(projection, client, checkpoints.clone()).with_options(options)
}

fn saved_counts(checkpoints: &InMemoryCheckpointStore) -> Vec<u64> {
    checkpoints
        .history(AUDIT)
        .iter()
        .map(|snapshot| {
            serde_json::from_str::<EventTypeSizeState>(snapshot)
                .expect("decodable snapshot")
                .base
                .count
        })
        .collect()
}

#[tokio::test]
async fn checkpoints_every_interval_and_when_caught_up() {
    // Given: ten events and a checkpoint interval of three
    let store = Arc::new(InMemoryEventStore::new());
    let _ = seed(&store, 10);
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());

    // When
    let mut service = audit_service(
        &store,
        &checkpoints,
        FoldProjection::new(EventTypeSizeProjector),
        bounded(3),
    );
    let state = service.run(&ShutdownSignal::new()).await.expect("run");

    // Then: snapshots were taken after events 3, 6 and 9, then on catching up
    assert_eq!(saved_counts(&checkpoints), vec![3, 6, 9, 10]);
    assert_eq!(state.total_events(), 10);
}

#[tokio::test]
async fn zero_interval_checkpoints_only_when_caught_up() {
    let store = Arc::new(InMemoryEventStore::new());
    let _ = seed(&store, 10);
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());

    let mut service = audit_service(
        &store,
        &checkpoints,
        FoldProjection::new(EventTypeSizeProjector),
        bounded(0),
    );
    let _ = service.run(&ShutdownSignal::new()).await.expect("run");

    assert_eq!(saved_counts(&checkpoints), vec![10]);
}

#[tokio::test]
async fn dropped_subscription_resumes_from_last_checkpoint() {
    // Given: ten events and a subscription that drops after five of them
    let store = Arc::new(InMemoryEventStore::new());
    let positions = seed(&store, 10);
    store.drop_next_subscription_after(5);
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let log = Arc::new(MemoryLog::new());

    // When: the projection checkpoints every two events
    let mut service = audit_service(
        &store,
        &checkpoints,
        FoldProjection::new(EventTypeSizeProjector),
        bounded(2),
    )
    .with_log(log.clone());
    let state = service.run(&ShutdownSignal::new()).await.expect("run");

    // Then: the fifth event was rolled back and folded once more after the restart
    assert_eq!(state.base.count, 10);
    assert_eq!(state.total_events(), 10);
    assert_eq!(state.base.last_position, positions[9]);
    assert_eq!(saved_counts(&checkpoints), vec![2, 4, 6, 8, 10, 10]);

    // And: the restart was reported to the operator
    let warnings = log.messages(LogChannel::Warn);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("subscription dropped"));
}

#[tokio::test]
#[tracing_test::traced_test]
async fn failed_subscription_attempts_are_retried() {
    // Given: a store that refuses the first two subscriptions
    let store = Arc::new(InMemoryEventStore::new());
    let _ = seed(&store, 4);
    store.fail_next_subscriptions(2);
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let log = Arc::new(MemoryLog::new());

    // When
    let mut service = audit_service(
        &store,
        &checkpoints,
        FoldProjection::new(EventTypeSizeProjector),
        bounded(1000),
    )
    .with_log(log.clone());
    let state = service.run(&ShutdownSignal::new()).await.expect("run");

    // Then: the run completes after two restarts
    assert_eq!(state.total_events(), 4);
    assert_eq!(log.messages(LogChannel::Warn).len(), 2);
    assert!(logs_contain("projection failed, restarting"));
    assert!(logs_contain("injected failure"));
}

#[tokio::test]
async fn failed_checkpoint_write_rolls_back_and_restarts() {
    // Given: a checkpoint store whose first save fails
    let store = Arc::new(InMemoryEventStore::new());
    let _ = seed(&store, 6);
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    checkpoints.fail_next_saves(1);

    // When
    let mut service = audit_service(
        &store,
        &checkpoints,
        FoldProjection::new(EventTypeSizeProjector),
        bounded(2),
    );
    let state = service.run(&ShutdownSignal::new()).await.expect("run");

    // Then: nothing was counted twice
    assert_eq!(state.total_events(), 6);
    assert_eq!(saved_counts(&checkpoints), vec![2, 4, 6, 6]);
}

#[tokio::test]
async fn reloaded_projection_resumes_after_its_checkpoint() {
    // Given: a first run over five events
    let store = Arc::new(InMemoryEventStore::new());
    let first_batch = seed(&store, 5);
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let mut first = audit_service(
        &store,
        &checkpoints,
        FoldProjection::new(EventTypeSizeProjector),
        bounded(1000),
    );
    let _ = first.run(&ShutdownSignal::new()).await.expect("first run");

    // And: three more events appended afterwards
    let _ = store
        .append(
            &stream("Refund-1"),
            (0..3)
                .map(|id| NewEvent::json("RefundIssued", &json!({ "id": id })))
                .collect(),
        )
        .expect("append");

    // When: a new projection is reloaded from the checkpoint
    let projection = FoldProjection::reload(EventTypeSizeProjector, &*checkpoints, true).await;
    let mut second = audit_service(&store, &checkpoints, projection, bounded(1000));
    assert_eq!(
        second.resume_point(),
        eventsweep_types::FromAll::After(first_batch[4])
    );
    let state = second.run(&ShutdownSignal::new()).await.expect("second run");

    // Then: only the new events were folded on top of the restored state
    assert_eq!(state.base.count, 8);
    assert_eq!(state.event_types["SaleStarted"].count, 5);
    assert_eq!(state.event_types["RefundIssued"].count, 3);
}

#[tokio::test]
async fn configured_start_position_applies_without_a_checkpoint() {
    let store = Arc::new(InMemoryEventStore::new());
    let positions = seed(&store, 5);
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());

    let options = ServiceOptions {
        start_position: Some(positions[2]),
        ..bounded(1000)
    };
    let mut service = audit_service(
        &store,
        &checkpoints,
        FoldProjection::new(EventTypeSizeProjector),
        options,
    );
    let state = service.run(&ShutdownSignal::new()).await.expect("run");

    assert_eq!(state.total_events(), 2);
    assert_eq!(state.base.last_position, positions[4]);
}

#[tokio::test]
async fn cancellation_stops_a_live_subscription() {
    // Given: a live run with no bounded finish
    let store = Arc::new(InMemoryEventStore::new());
    let _ = seed(&store, 3);
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let options = ServiceOptions {
        finish_on_checkpoint_reached: false,
        ..bounded(1000)
    };
    let mut service = audit_service(
        &store,
        &checkpoints,
        FoldProjection::new(EventTypeSizeProjector),
        options,
    );

    // When: the token fires while the service waits for live events
    let cancel = ShutdownSignal::new();
    let trigger = cancel.clone();
    let _timer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let outcome = service.run(&cancel).await;

    // Then: the run reports cancellation and the caught-up checkpoint remains
    assert!(matches!(outcome, Err(ServiceError::Cancelled)));
    assert_eq!(saved_counts(&checkpoints), vec![3]);
    assert_eq!(service.projection().current_state().total_events(), 3);
}

#[tokio::test]
async fn live_events_are_folded_after_catching_up() {
    // Given: a live run over an initially empty log
    let store = Arc::new(InMemoryEventStore::new());
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let options = ServiceOptions {
        finish_on_checkpoint_reached: false,
        ..bounded(2)
    };
    let mut service = audit_service(
        &store,
        &checkpoints,
        FoldProjection::new(EventTypeSizeProjector),
        options,
    );

    // When: events arrive while the service is live, then the run is cancelled
    let cancel = ShutdownSignal::new();
    let producer = {
        let store = Arc::clone(&store);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = seed(&store, 2);
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };
    let outcome = service.run(&cancel).await;
    producer.await.expect("producer task");

    // Then: both live events were folded and checkpointed
    assert!(matches!(outcome, Err(ServiceError::Cancelled)));
    assert_eq!(service.projection().current_state().total_events(), 2);
    assert_eq!(saved_counts(&checkpoints), vec![0, 2]);
}
