//! Integration tests for the extraction reconciler.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use pipeline::stores::memory::MemoryStore;
use pipeline::testing::{task_aged, ManualClock};
use pipeline::{
    Category, Clock, ExtractionReconciler, PassOutcome, PipelineConfig, PipelineError, StoreError,
    TaskState,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fixed_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap(),
    ))
}

fn reconciler_with(
    store: Arc<MemoryStore>,
    config: PipelineConfig,
    clock: Arc<ManualClock>,
) -> ExtractionReconciler<MemoryStore, Arc<ManualClock>> {
    ExtractionReconciler::with_clock(store, config, clock)
}

#[tokio::test]
async fn test_stuck_running_tasks_reset_to_pending() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let clock = fixed_clock();
    let now = clock.now();
    let campaign_id = Uuid::new_v4();

    let mut ids = Vec::new();
    for _ in 0..5 {
        let task = task_aged(
            campaign_id,
            TaskState::Running,
            0,
            now,
            chrono::Duration::hours(2),
        );
        ids.push(task.id);
        store.insert_task(task);
    }
    // A fresh running task stays untouched.
    let fresh = task_aged(
        campaign_id,
        TaskState::Running,
        0,
        now,
        chrono::Duration::minutes(5),
    );
    let fresh_id = fresh.id;
    store.insert_task(fresh);

    let reconciler = reconciler_with(store.clone(), PipelineConfig::default(), clock);
    let result = reconciler.run_once().await.unwrap();

    assert_eq!(result.outcome, PassOutcome::Completed);
    assert_eq!(result.adjusted_in(Category::StuckRunning), 5);
    for id in ids {
        let task = store.task(id).unwrap();
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.attempt_count, 1);
    }
    assert_eq!(store.task(fresh_id).unwrap().state, TaskState::Running);
}

#[tokio::test]
async fn test_second_pass_adjusts_nothing() {
    let store = Arc::new(MemoryStore::new());
    let clock = fixed_clock();
    let now = clock.now();
    let campaign_id = Uuid::new_v4();

    for _ in 0..3 {
        store.insert_task(task_aged(
            campaign_id,
            TaskState::Running,
            0,
            now,
            chrono::Duration::hours(1),
        ));
    }

    let reconciler = reconciler_with(store, PipelineConfig::default(), clock);
    let first = reconciler.run_once().await.unwrap();
    assert_eq!(first.total_adjusted(), 3);

    let second = reconciler.run_once().await.unwrap();
    assert_eq!(second.total_adjusted(), 0);
}

#[tokio::test]
async fn test_retry_budget_splits_error_tasks() {
    let store = Arc::new(MemoryStore::new());
    let clock = fixed_clock();
    let now = clock.now();
    let campaign_id = Uuid::new_v4();

    // max_retries = 3: attempt 2 retries, attempt 3 goes fatal.
    let retryable = task_aged(campaign_id, TaskState::Error, 2, now, chrono::Duration::hours(1));
    let exhausted = task_aged(campaign_id, TaskState::Error, 3, now, chrono::Duration::hours(1));
    let (retryable_id, exhausted_id) = (retryable.id, exhausted.id);
    store.insert_task(retryable);
    store.insert_task(exhausted);

    let reconciler = reconciler_with(store.clone(), PipelineConfig::default(), clock);
    let result = reconciler.run_once().await.unwrap();

    assert_eq!(result.adjusted_in(Category::ErrorRetryable), 2);
    let retried = store.task(retryable_id).unwrap();
    assert_eq!(retried.state, TaskState::Pending);
    assert_eq!(retried.attempt_count, 3);
    let dead = store.task(exhausted_id).unwrap();
    assert_eq!(dead.state, TaskState::Fatal);
    assert_eq!(dead.attempt_count, 3);
    assert!(dead.last_error.is_some());
}

#[tokio::test]
async fn test_completed_without_features_is_requeued() {
    let store = Arc::new(MemoryStore::new());
    let clock = fixed_clock();
    let now = clock.now();
    let campaign_id = Uuid::new_v4();

    let orphan = task_aged(
        campaign_id,
        TaskState::Completed,
        1,
        now,
        chrono::Duration::minutes(30),
    );
    let orphan_id = orphan.id;
    store.insert_task(orphan);

    // Completed with features materialized: left alone.
    let healthy = task_aged(
        campaign_id,
        TaskState::Completed,
        1,
        now,
        chrono::Duration::minutes(30),
    );
    let healthy_id = healthy.id;
    store.set_feature(campaign_id, healthy.domain_id, now);
    store.insert_task(healthy);

    let reconciler = reconciler_with(store.clone(), PipelineConfig::default(), clock);
    let result = reconciler.run_once().await.unwrap();

    assert_eq!(result.adjusted_in(Category::MissingFeatures), 1);
    assert_eq!(store.task(orphan_id).unwrap().state, TaskState::Pending);
    assert_eq!(store.task(healthy_id).unwrap().state, TaskState::Completed);
}

#[tokio::test]
async fn test_orphaned_completed_with_exhausted_retries_goes_error() {
    let store = Arc::new(MemoryStore::new());
    let clock = fixed_clock();
    let now = clock.now();

    let orphan = task_aged(
        Uuid::new_v4(),
        TaskState::Completed,
        3,
        now,
        chrono::Duration::minutes(30),
    );
    let orphan_id = orphan.id;
    store.insert_task(orphan);

    let reconciler = reconciler_with(store.clone(), PipelineConfig::default(), clock);
    reconciler.run_once().await.unwrap();

    let task = store.task(orphan_id).unwrap();
    assert_eq!(task.state, TaskState::Error);
    assert_eq!(task.attempt_count, 3);
}

#[tokio::test]
async fn test_concurrent_passes_collapse_to_one() {
    let store = Arc::new(MemoryStore::new());
    store.set_query_delay(Duration::from_millis(100));

    let reconciler = Arc::new(ExtractionReconciler::new(
        store,
        PipelineConfig::default(),
    ));

    let (first, second) = tokio::join!(
        {
            let r = reconciler.clone();
            async move { r.run_once().await }
        },
        {
            let r = reconciler.clone();
            async move { r.run_once().await }
        }
    );

    let outcomes = [first.unwrap().outcome, second.unwrap().outcome];
    assert!(outcomes.contains(&PassOutcome::Completed));
    assert!(outcomes.contains(&PassOutcome::Skipped));
}

#[tokio::test]
async fn test_slow_store_times_out_the_pass() {
    let store = Arc::new(MemoryStore::new());
    store.set_query_delay(Duration::from_millis(300));

    let config = PipelineConfig {
        pass_timeout: Duration::from_millis(50),
        ..PipelineConfig::default()
    };
    let reconciler = ExtractionReconciler::new(store, config);
    let err = reconciler.run_once().await.unwrap_err();
    assert!(matches!(err, PipelineError::PassTimeout(_)));
}

#[tokio::test]
async fn test_unavailable_store_aborts_the_pass() {
    let store = Arc::new(MemoryStore::new());
    store.fail_with(StoreError::Unavailable("pool closed".into()));

    let reconciler = ExtractionReconciler::new(store, PipelineConfig::default());
    let err = reconciler.run_once().await.unwrap_err();
    assert!(matches!(err, PipelineError::StoreUnavailable(_)));
}

#[tokio::test]
async fn test_query_failures_are_counted_not_fatal() {
    let store = Arc::new(MemoryStore::new());
    store.fail_with(StoreError::Query("relation does not exist".into()));

    let reconciler = ExtractionReconciler::new(store, PipelineConfig::default());
    let result = reconciler.run_once().await.unwrap();

    assert_eq!(result.outcome, PassOutcome::Completed);
    // One failure per category.
    assert_eq!(result.row_errors, 4);
    assert_eq!(result.total_adjusted(), 0);
}
