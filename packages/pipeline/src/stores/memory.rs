//! In-memory store used by tests.
//!
//! Implements the same seams as the Postgres stores over mutexed maps,
//! plus two test hooks: injected failures (every call returns the
//! injected error until cleared) and an artificial per-query delay for
//! exercising timeouts and single-flight behavior.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::cursor::DomainCursor;
use crate::error::{StoreError, StoreResult};
use crate::traits::{DomainStore, ScoreStore, TaskStore};
use crate::types::{EligibleDomain, ExtractionTask, StaleScore, TaskState, TaskTransition};

#[derive(Default)]
struct Inner {
    domains: HashMap<Uuid, Vec<EligibleDomain>>,
    tasks: HashMap<Uuid, ExtractionTask>,
    features: HashMap<(Uuid, Uuid), DateTime<Utc>>,
    scores: HashMap<(Uuid, Uuid), DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_with: Mutex<Option<StoreError>>,
    query_delay_ms: AtomicU64,
    page_fetches: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    pub fn insert_domains(&self, campaign_id: Uuid, domains: Vec<EligibleDomain>) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.domains.entry(campaign_id).or_default();
        entry.extend(domains);
        entry.sort_by_key(|d| (d.offset_index, d.domain_id));
    }

    pub fn insert_task(&self, task: ExtractionTask) {
        self.inner.lock().unwrap().tasks.insert(task.id, task);
    }

    pub fn set_feature(&self, campaign_id: Uuid, domain_id: Uuid, materialized_at: DateTime<Utc>) {
        self.inner
            .lock()
            .unwrap()
            .features
            .insert((campaign_id, domain_id), materialized_at);
    }

    pub fn set_score(&self, campaign_id: Uuid, domain_id: Uuid, scored_at: DateTime<Utc>) {
        self.inner
            .lock()
            .unwrap()
            .scores
            .insert((campaign_id, domain_id), scored_at);
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn task(&self, id: Uuid) -> Option<ExtractionTask> {
        self.inner.lock().unwrap().tasks.get(&id).cloned()
    }

    pub fn tasks_in_state(&self, state: TaskState) -> Vec<ExtractionTask> {
        self.inner
            .lock()
            .unwrap()
            .tasks
            .values()
            .filter(|t| t.state == state)
            .cloned()
            .collect()
    }

    /// Total `eligible_page` calls served so far.
    pub fn page_fetches(&self) -> u64 {
        self.page_fetches.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------

    /// Make every subsequent store call fail with `err` until cleared.
    pub fn fail_with(&self, err: StoreError) {
        *self.fail_with.lock().unwrap() = Some(err);
    }

    pub fn clear_failure(&self) {
        *self.fail_with.lock().unwrap() = None;
    }

    /// Delay every store call by `delay` before touching data.
    pub fn set_query_delay(&self, delay: Duration) {
        self.query_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    async fn gate(&self) -> StoreResult<()> {
        let delay_ms = self.query_delay_ms.load(Ordering::Relaxed);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if let Some(err) = self.fail_with.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
impl DomainStore for MemoryStore {
    async fn eligible_page(
        &self,
        campaign_id: Uuid,
        after: Option<&DomainCursor>,
        limit: i64,
    ) -> StoreResult<Vec<EligibleDomain>> {
        self.gate().await?;
        self.page_fetches.fetch_add(1, Ordering::Relaxed);

        let inner = self.inner.lock().unwrap();
        let Some(domains) = inner.domains.get(&campaign_id) else {
            return Ok(Vec::new());
        };

        let page = domains
            .iter()
            .filter(|d| match after {
                Some(cursor) => {
                    (d.offset_index, d.domain_id) > (cursor.offset_index, cursor.domain_id)
                }
                None => true,
            })
            .take(limit.max(0) as usize)
            .copied()
            .collect();
        Ok(page)
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn stuck_running(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ExtractionTask>> {
        self.gate().await?;
        Ok(self.tasks_matching(TaskState::Running, Some(cutoff), limit))
    }

    async fn stuck_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ExtractionTask>> {
        self.gate().await?;
        Ok(self.tasks_matching(TaskState::Pending, Some(cutoff), limit))
    }

    async fn error_tasks(&self, limit: i64) -> StoreResult<Vec<ExtractionTask>> {
        self.gate().await?;
        Ok(self.tasks_matching(TaskState::Error, None, limit))
    }

    async fn completed_missing_features(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ExtractionTask>> {
        self.gate().await?;
        let inner = self.inner.lock().unwrap();
        let mut tasks: Vec<ExtractionTask> = inner
            .tasks
            .values()
            .filter(|t| {
                t.state == TaskState::Completed
                    && t.updated_at < cutoff
                    && !inner.features.contains_key(&(t.campaign_id, t.domain_id))
            })
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.updated_at);
        tasks.truncate(limit.max(0) as usize);
        Ok(tasks)
    }

    async fn apply_transitions(
        &self,
        transitions: &[TaskTransition],
        at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        self.gate().await?;
        let mut inner = self.inner.lock().unwrap();
        let mut changed = 0u64;
        for transition in transitions {
            let Some(task) = inner.tasks.get_mut(&transition.task_id) else {
                continue;
            };
            if task.state == TaskState::Fatal {
                continue;
            }
            task.state = transition.to;
            if transition.bump_attempt {
                task.attempt_count += 1;
            }
            if let Some(msg) = &transition.last_error {
                task.last_error = Some(msg.clone());
            }
            task.updated_at = at;
            changed += 1;
        }
        Ok(changed)
    }
}

#[async_trait]
impl ScoreStore for MemoryStore {
    async fn stale_scores(
        &self,
        max_age: Duration,
        limit: i64,
    ) -> StoreResult<Vec<StaleScore>> {
        self.gate().await?;
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| StoreError::Query(format!("max_age out of range: {e}")))?;

        let inner = self.inner.lock().unwrap();
        let mut stale: Vec<StaleScore> = inner
            .scores
            .iter()
            .filter_map(|(key, scored_at)| {
                let materialized_at = inner.features.get(key)?;
                if *materialized_at - *scored_at > max_age {
                    Some(StaleScore {
                        campaign_id: key.0,
                        domain_id: key.1,
                        scored_at: *scored_at,
                        materialized_at: *materialized_at,
                    })
                } else {
                    None
                }
            })
            .collect();
        stale.sort_by_key(|s| s.scored_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }
}

impl MemoryStore {
    fn tasks_matching(
        &self,
        state: TaskState,
        cutoff: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Vec<ExtractionTask> {
        let inner = self.inner.lock().unwrap();
        let mut tasks: Vec<ExtractionTask> = inner
            .tasks
            .values()
            .filter(|t| t.state == state && cutoff.map_or(true, |c| t.updated_at < c))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.updated_at);
        tasks.truncate(limit.max(0) as usize);
        tasks
    }
}
