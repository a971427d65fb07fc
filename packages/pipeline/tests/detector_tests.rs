//! Integration tests for stale score detection.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use pipeline::stores::memory::MemoryStore;
use pipeline::testing::RecordingQueue;
use pipeline::{PassOutcome, PipelineConfig, PipelineError, StaleScoreDetector, StoreError};

fn now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
}

#[tokio::test]
async fn test_outdated_score_is_enqueued_exactly_once() {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(RecordingQueue::new());
    let campaign_id = Uuid::new_v4();
    let domain_id = Uuid::new_v4();

    // Features rematerialized two hours after scoring; max age is one hour.
    store.set_score(campaign_id, domain_id, now() - chrono::Duration::hours(2));
    store.set_feature(campaign_id, domain_id, now());

    let detector = StaleScoreDetector::new(store, queue.clone(), PipelineConfig::default());

    let first = detector.run_once().await.unwrap();
    assert_eq!(first.stale_found, 1);
    assert_eq!(first.enqueued, 1);
    assert_eq!(first.duplicates, 0);
    assert_eq!(queue.entries(), vec![(campaign_id, domain_id)]);

    // The pair is stale again next pass but the enqueue collapses.
    let second = detector.run_once().await.unwrap();
    assert_eq!(second.stale_found, 1);
    assert_eq!(second.enqueued, 0);
    assert_eq!(second.duplicates, 1);
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn test_staleness_threshold_is_strict() {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(RecordingQueue::new());
    let campaign_id = Uuid::new_v4();

    // Exactly max_age apart: not stale.
    let on_edge = Uuid::new_v4();
    store.set_score(campaign_id, on_edge, now() - chrono::Duration::hours(1));
    store.set_feature(campaign_id, on_edge, now());

    // One second past max_age: stale.
    let over_edge = Uuid::new_v4();
    store.set_score(
        campaign_id,
        over_edge,
        now() - chrono::Duration::hours(1) - chrono::Duration::seconds(1),
    );
    store.set_feature(campaign_id, over_edge, now());

    let detector = StaleScoreDetector::new(store, queue.clone(), PipelineConfig::default());
    let result = detector.run_once().await.unwrap();

    assert_eq!(result.stale_found, 1);
    assert_eq!(queue.entries(), vec![(campaign_id, over_edge)]);
}

#[tokio::test]
async fn test_unscored_features_are_not_stale() {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(RecordingQueue::new());

    // A feature record with no score at all.
    store.set_feature(Uuid::new_v4(), Uuid::new_v4(), now());

    let detector = StaleScoreDetector::new(store, queue.clone(), PipelineConfig::default());
    let result = detector.run_once().await.unwrap();

    assert_eq!(result.stale_found, 0);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_enqueue_failures_are_counted_not_fatal() {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(RecordingQueue::new());
    let campaign_id = Uuid::new_v4();

    for _ in 0..3 {
        let domain_id = Uuid::new_v4();
        store.set_score(campaign_id, domain_id, now() - chrono::Duration::hours(3));
        store.set_feature(campaign_id, domain_id, now());
    }
    queue.fail_with(StoreError::Query("queue insert failed".into()));

    let detector = StaleScoreDetector::new(store, queue, PipelineConfig::default());
    let result = detector.run_once().await.unwrap();

    assert_eq!(result.outcome, PassOutcome::Completed);
    assert_eq!(result.stale_found, 3);
    assert_eq!(result.enqueued, 0);
    assert_eq!(result.row_errors, 3);
}

#[tokio::test]
async fn test_query_failure_is_counted_not_escalated() {
    let store = Arc::new(MemoryStore::new());
    store.fail_with(StoreError::Query("relation does not exist".into()));

    let detector = StaleScoreDetector::new(
        store,
        Arc::new(RecordingQueue::new()),
        PipelineConfig::default(),
    );
    let result = detector.run_once().await.unwrap();

    assert_eq!(result.outcome, PassOutcome::Completed);
    assert_eq!(result.stale_found, 0);
    assert_eq!(result.row_errors, 1);
}

#[tokio::test]
async fn test_unavailable_store_aborts_the_pass() {
    let store = Arc::new(MemoryStore::new());
    store.fail_with(StoreError::Unavailable("connection refused".into()));

    let detector = StaleScoreDetector::new(
        store,
        Arc::new(RecordingQueue::new()),
        PipelineConfig::default(),
    );
    let err = detector.run_once().await.unwrap_err();
    assert!(matches!(err, PipelineError::StoreUnavailable(_)));
}

#[tokio::test]
async fn test_slow_store_times_out_the_pass() {
    let store = Arc::new(MemoryStore::new());
    store.set_query_delay(Duration::from_millis(300));

    let config = PipelineConfig {
        pass_timeout: Duration::from_millis(50),
        ..PipelineConfig::default()
    };
    let detector = StaleScoreDetector::new(store, Arc::new(RecordingQueue::new()), config);
    let err = detector.run_once().await.unwrap_err();
    assert!(matches!(err, PipelineError::PassTimeout(_)));
}

#[tokio::test]
async fn test_concurrent_passes_collapse_to_one() {
    let store = Arc::new(MemoryStore::new());
    store.set_query_delay(Duration::from_millis(100));

    let detector = Arc::new(StaleScoreDetector::new(
        store,
        Arc::new(RecordingQueue::new()),
        PipelineConfig::default(),
    ));

    let (first, second) = tokio::join!(
        {
            let d = detector.clone();
            async move { d.run_once().await }
        },
        {
            let d = detector.clone();
            async move { d.run_once().await }
        }
    );

    let outcomes = [first.unwrap().outcome, second.unwrap().outcome];
    assert!(outcomes.contains(&PassOutcome::Completed));
    assert!(outcomes.contains(&PassOutcome::Skipped));
}
