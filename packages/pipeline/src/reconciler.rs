//! Extraction task reconciler.
//!
//! A periodic corrective pass over extraction task state. Each pass
//! examines four disjoint categories, each bounded to
//! `category_limit` rows and applied as one transaction:
//!
//! - `stuck_running`: running rows whose worker went quiet → back to
//!   pending (transient crash), or fatal once retries are exhausted.
//! - `stuck_pending`: pending rows aging past the starvation threshold →
//!   re-enqueued (attempt bumped, `updated_at` refreshed), or fatal.
//! - `error_retryable`: error rows → pending with attempt bumped while
//!   retries remain, else forced to fatal.
//! - `missing_features`: completed rows whose features never materialized
//!   past the grace period → re-queued for extraction, or marked error.
//!
//! Passes are single-flight guarded, deadline-bounded, and idempotent:
//! a second pass over unchanged data adjusts zero rows.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result, StoreError};
use crate::metrics;
use crate::single_flight::SingleFlight;
use crate::traits::TaskStore;
use crate::types::{Category, ExtractionTask, PassOutcome, ReconcilePassResult, TaskState, TaskTransition};

/// Periodic corrective pass over extraction task state.
pub struct ExtractionReconciler<S, C = SystemClock> {
    store: Arc<S>,
    config: PipelineConfig,
    clock: C,
    flight: SingleFlight,
}

impl<S: TaskStore> ExtractionReconciler<S> {
    pub fn new(store: Arc<S>, config: PipelineConfig) -> Self {
        Self::with_clock(store, config, SystemClock)
    }
}

impl<S: TaskStore, C: Clock> ExtractionReconciler<S, C> {
    pub fn with_clock(store: Arc<S>, config: PipelineConfig, clock: C) -> Self {
        Self {
            store,
            config,
            clock,
            flight: SingleFlight::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute a single reconciliation pass.
    ///
    /// Returns a `Skipped` result when a pass is already in flight. Aborts
    /// with [`PipelineError::PassTimeout`] when the configured deadline is
    /// exceeded (unexamined rows untouched) and with
    /// [`PipelineError::StoreUnavailable`] on infrastructure faults.
    /// Statement-level failures are counted into `row_errors` and do not
    /// abort the remaining categories.
    pub async fn run_once(&self) -> Result<ReconcilePassResult> {
        let Some(_permit) = self.flight.try_acquire() else {
            debug!("reconciliation pass skipped, already running");
            metrics::record_reconcile_pass("skipped");
            return Ok(ReconcilePassResult::skipped());
        };

        let started = Instant::now();
        let deadline = self.config.pass_timeout;
        let mut result = ReconcilePassResult {
            outcome: PassOutcome::Completed,
            examined: Default::default(),
            adjusted: Default::default(),
            row_errors: 0,
            duration: Default::default(),
        };

        for category in Category::ALL {
            let Some(remaining) = deadline.checked_sub(started.elapsed()) else {
                metrics::record_reconcile_pass("timeout");
                warn!(category = %category, "reconciliation pass deadline exhausted");
                return Err(PipelineError::PassTimeout(deadline));
            };

            match tokio::time::timeout(remaining, self.reconcile_category(category)).await {
                Err(_) => {
                    metrics::record_reconcile_pass("timeout");
                    warn!(category = %category, "reconciliation category timed out");
                    return Err(PipelineError::PassTimeout(deadline));
                }
                Ok(Err(StoreError::Unavailable(msg))) => {
                    metrics::record_reconcile_pass("error");
                    error!(category = %category, error = %msg, "store unavailable during pass");
                    return Err(PipelineError::StoreUnavailable(msg.into()));
                }
                Ok(Err(StoreError::Query(msg))) => {
                    // Category-level statement failure: count it, keep going.
                    result.row_errors += 1;
                    warn!(category = %category, error = %msg, "reconciliation category failed");
                }
                Ok(Ok((examined, adjusted))) => {
                    metrics::record_reconcile_category(category, examined, adjusted);
                    result.examined.insert(category, examined);
                    result.adjusted.insert(category, adjusted);
                }
            }
        }

        result.duration = started.elapsed();
        metrics::record_reconcile_duration(result.duration);
        metrics::record_reconcile_pass("success");
        info!(
            duration_ms = result.duration.as_millis() as u64,
            stuck_running = result.adjusted_in(Category::StuckRunning),
            stuck_pending = result.adjusted_in(Category::StuckPending),
            error_retryable = result.adjusted_in(Category::ErrorRetryable),
            missing_features = result.adjusted_in(Category::MissingFeatures),
            row_errors = result.row_errors,
            "reconciliation pass complete"
        );

        Ok(result)
    }

    /// Query one category and apply its transitions atomically.
    async fn reconcile_category(&self, category: Category) -> std::result::Result<(usize, u64), StoreError> {
        let now = self.clock.now();
        let limit = self.config.category_limit;

        let tasks = match category {
            Category::StuckRunning => {
                self.store
                    .stuck_running(cutoff(now, self.config.stuck_running_max_age), limit)
                    .await?
            }
            Category::StuckPending => {
                self.store
                    .stuck_pending(cutoff(now, self.config.stuck_pending_max_age), limit)
                    .await?
            }
            Category::ErrorRetryable => self.store.error_tasks(limit).await?,
            Category::MissingFeatures => {
                self.store
                    .completed_missing_features(cutoff(now, self.config.missing_feature_grace), limit)
                    .await?
            }
        };

        let examined = tasks.len();
        let transitions: Vec<TaskTransition> = tasks
            .iter()
            .filter_map(|task| self.plan_transition(category, task))
            .collect();

        let adjusted = if transitions.is_empty() {
            0
        } else {
            self.store.apply_transitions(&transitions, now).await?
        };

        Ok((examined, adjusted))
    }

    /// Decide the corrective transition for one row, honoring the task
    /// state machine. Pure so the rules are unit-testable.
    fn plan_transition(&self, category: Category, task: &ExtractionTask) -> Option<TaskTransition> {
        // Terminal rows never move, whatever the query returned.
        if task.state.is_terminal() {
            return None;
        }

        let retries_left = task.attempt_count < self.config.max_retries;

        match category {
            Category::StuckRunning => Some(if retries_left {
                TaskTransition {
                    task_id: task.id,
                    to: TaskState::Pending,
                    bump_attempt: true,
                    last_error: Some("reset after worker went quiet".to_string()),
                }
            } else {
                fatal(task, "retries exhausted while stuck in running")
            }),
            Category::StuckPending => Some(if retries_left {
                // Re-enqueue signal: bump the attempt and refresh
                // `updated_at` so the row re-enters the worker queue scan.
                TaskTransition {
                    task_id: task.id,
                    to: TaskState::Pending,
                    bump_attempt: true,
                    last_error: None,
                }
            } else {
                fatal(task, "retries exhausted while stuck in pending")
            }),
            Category::ErrorRetryable => Some(if retries_left {
                TaskTransition {
                    task_id: task.id,
                    to: TaskState::Pending,
                    bump_attempt: true,
                    last_error: None,
                }
            } else {
                fatal(task, "retries exhausted")
            }),
            Category::MissingFeatures => Some(if retries_left {
                TaskTransition {
                    task_id: task.id,
                    to: TaskState::Pending,
                    bump_attempt: true,
                    last_error: Some("features never materialized, re-queued".to_string()),
                }
            } else {
                TaskTransition {
                    task_id: task.id,
                    to: TaskState::Error,
                    bump_attempt: false,
                    last_error: Some("features never materialized after grace period".to_string()),
                }
            }),
        }
    }
}

fn fatal(task: &ExtractionTask, reason: &str) -> TaskTransition {
    TaskTransition {
        task_id: task.id,
        to: TaskState::Fatal,
        bump_attempt: false,
        last_error: Some(reason.to_string()),
    }
}

fn cutoff(now: DateTime<Utc>, age: std::time::Duration) -> DateTime<Utc> {
    now - chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::hours(24))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn task(state: TaskState, attempts: i32) -> ExtractionTask {
        ExtractionTask {
            id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            domain_id: Uuid::new_v4(),
            state,
            attempt_count: attempts,
            started_at: None,
            updated_at: Utc::now(),
            last_error: None,
        }
    }

    fn reconciler() -> ExtractionReconciler<crate::stores::memory::MemoryStore> {
        ExtractionReconciler::new(
            Arc::new(crate::stores::memory::MemoryStore::new()),
            PipelineConfig::default(),
        )
    }

    #[test]
    fn test_error_with_retries_left_goes_pending_with_bump() {
        let r = reconciler();
        let t = task(TaskState::Error, 2); // max_retries = 3
        let plan = r.plan_transition(Category::ErrorRetryable, &t).unwrap();
        assert_eq!(plan.to, TaskState::Pending);
        assert!(plan.bump_attempt);
    }

    #[test]
    fn test_error_with_exhausted_retries_goes_fatal() {
        let r = reconciler();
        let t = task(TaskState::Error, 3);
        let plan = r.plan_transition(Category::ErrorRetryable, &t).unwrap();
        assert_eq!(plan.to, TaskState::Fatal);
        assert!(!plan.bump_attempt);
    }

    #[test]
    fn test_missing_features_exhausted_goes_error_not_fatal() {
        let r = reconciler();
        let t = task(TaskState::Completed, 3);
        let plan = r.plan_transition(Category::MissingFeatures, &t).unwrap();
        assert_eq!(plan.to, TaskState::Error);
    }

    #[test]
    fn test_fatal_rows_are_never_planned() {
        let r = reconciler();
        let t = task(TaskState::Fatal, 0);
        for category in Category::ALL {
            assert!(r.plan_transition(category, &t).is_none());
        }
    }
}
