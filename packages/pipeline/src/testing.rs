//! Test doubles and fixture helpers.
//!
//! Shipped in the library (not behind `cfg(test)`) so integration tests
//! and downstream consumers can exercise the pipeline without Postgres.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{StoreError, StoreResult};
use crate::traits::RescoreQueue;
use crate::types::{EnqueueOutcome, ExtractionTask, TaskState};

// ============================================================================
// MANUAL CLOCK
// ============================================================================

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ============================================================================
// RECORDING QUEUE
// ============================================================================

/// Rescore queue that records enqueues in memory.
///
/// Mirrors the idempotency of the real queue: a (campaign, domain) pair
/// already recorded reports `Duplicate`.
#[derive(Default)]
pub struct RecordingQueue {
    entries: Mutex<Vec<(Uuid, Uuid)>>,
    keys: Mutex<HashSet<(Uuid, Uuid)>>,
    fail_with: Mutex<Option<StoreError>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// All enqueues observed, in order, duplicates excluded.
    pub fn entries(&self) -> Vec<(Uuid, Uuid)> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Make every subsequent enqueue fail with `err` until cleared.
    pub fn fail_with(&self, err: StoreError) {
        *self.fail_with.lock().unwrap() = Some(err);
    }

    pub fn clear_failure(&self) {
        *self.fail_with.lock().unwrap() = None;
    }
}

#[async_trait]
impl RescoreQueue for RecordingQueue {
    async fn enqueue(&self, campaign_id: Uuid, domain_id: Uuid) -> StoreResult<EnqueueOutcome> {
        if let Some(err) = self.fail_with.lock().unwrap().clone() {
            return Err(err);
        }
        let key = (campaign_id, domain_id);
        if self.keys.lock().unwrap().insert(key) {
            self.entries.lock().unwrap().push(key);
            Ok(EnqueueOutcome::Created)
        } else {
            Ok(EnqueueOutcome::Duplicate)
        }
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// Build a task in `state` whose `updated_at` lies `age` in the past of
/// `now`.
pub fn task_aged(
    campaign_id: Uuid,
    state: TaskState,
    attempt_count: i32,
    now: DateTime<Utc>,
    age: Duration,
) -> ExtractionTask {
    ExtractionTask {
        id: Uuid::new_v4(),
        campaign_id,
        domain_id: Uuid::new_v4(),
        state,
        attempt_count,
        started_at: matches!(state, TaskState::Running).then(|| now - age),
        updated_at: now - age,
        last_error: None,
    }
}
