//! Postgres-backed stores.
//!
//! All queries are bounded: page fetches carry a LIMIT driven by the
//! cursor, category queries carry the per-pass row cap, and corrective
//! updates for one category run in a single transaction.
//!
//! The eligible-domain keyset relies on a composite index over
//! `(campaign_id, offset_index, domain_id)`; without it every page fetch
//! degrades to a scan.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use uuid::Uuid;

use crate::cursor::DomainCursor;
use crate::error::{StoreError, StoreResult};
use crate::traits::{DomainStore, RescoreQueue, ScoreStore, TaskStore};
use crate::types::{EligibleDomain, EnqueueOutcome, ExtractionTask, StaleScore, TaskState, TaskTransition};

// ============================================================================
// DOMAIN STORE
// ============================================================================

#[derive(Clone)]
pub struct PgDomainStore {
    pool: PgPool,
}

impl PgDomainStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DomainStore for PgDomainStore {
    async fn eligible_page(
        &self,
        campaign_id: Uuid,
        after: Option<&DomainCursor>,
        limit: i64,
    ) -> StoreResult<Vec<EligibleDomain>> {
        let rows = match after {
            Some(cursor) => {
                sqlx::query(
                    r#"
                    SELECT domain_id, offset_index
                    FROM campaign_eligible_domains
                    WHERE campaign_id = $1
                      AND (offset_index, domain_id) > ($2, $3)
                    ORDER BY offset_index, domain_id
                    LIMIT $4
                    "#,
                )
                .bind(campaign_id)
                .bind(cursor.offset_index)
                .bind(cursor.domain_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT domain_id, offset_index
                    FROM campaign_eligible_domains
                    WHERE campaign_id = $1
                    ORDER BY offset_index, domain_id
                    LIMIT $2
                    "#,
                )
                .bind(campaign_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut page = Vec::with_capacity(rows.len());
        for row in rows {
            page.push(EligibleDomain {
                domain_id: row.try_get("domain_id")?,
                offset_index: row.try_get("offset_index")?,
            });
        }
        Ok(page)
    }
}

// ============================================================================
// TASK STORE
// ============================================================================

#[derive(Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn tasks_where(
        &self,
        state: TaskState,
        cutoff: Option<DateTime<Utc>>,
        limit: i64,
    ) -> StoreResult<Vec<ExtractionTask>> {
        let rows = match cutoff {
            Some(cutoff) => {
                sqlx::query(
                    r#"
                    SELECT id, campaign_id, domain_id, state, attempt_count,
                           started_at, updated_at, last_error
                    FROM extraction_tasks
                    WHERE state = $1 AND updated_at < $2
                    ORDER BY updated_at
                    LIMIT $3
                    "#,
                )
                .bind(state.as_str())
                .bind(cutoff)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, campaign_id, domain_id, state, attempt_count,
                           started_at, updated_at, last_error
                    FROM extraction_tasks
                    WHERE state = $1
                    ORDER BY updated_at
                    LIMIT $2
                    "#,
                )
                .bind(state.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(task_from_row).collect()
    }
}

fn task_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<ExtractionTask> {
    let raw_state: String = row.try_get("state")?;
    let state = TaskState::parse(&raw_state)
        .ok_or_else(|| StoreError::Query(format!("unknown task state '{raw_state}'")))?;
    Ok(ExtractionTask {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        domain_id: row.try_get("domain_id")?,
        state,
        attempt_count: row.try_get("attempt_count")?,
        started_at: row.try_get("started_at")?,
        updated_at: row.try_get("updated_at")?,
        last_error: row.try_get("last_error")?,
    })
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn stuck_running(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ExtractionTask>> {
        self.tasks_where(TaskState::Running, Some(cutoff), limit).await
    }

    async fn stuck_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ExtractionTask>> {
        self.tasks_where(TaskState::Pending, Some(cutoff), limit).await
    }

    async fn error_tasks(&self, limit: i64) -> StoreResult<Vec<ExtractionTask>> {
        self.tasks_where(TaskState::Error, None, limit).await
    }

    async fn completed_missing_features(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ExtractionTask>> {
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.campaign_id, t.domain_id, t.state, t.attempt_count,
                   t.started_at, t.updated_at, t.last_error
            FROM extraction_tasks t
            WHERE t.state = 'completed'
              AND t.updated_at < $1
              AND NOT EXISTS (
                  SELECT 1 FROM feature_records f
                  WHERE f.campaign_id = t.campaign_id
                    AND f.domain_id = t.domain_id
              )
            ORDER BY t.updated_at
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    async fn apply_transitions(
        &self,
        transitions: &[TaskTransition],
        at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        if transitions.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut changed = 0u64;
        for transition in transitions {
            // Fatal rows are immutable even if a query raced us here.
            let result = sqlx::query(
                r#"
                UPDATE extraction_tasks
                SET state = $2,
                    attempt_count = attempt_count + CASE WHEN $3 THEN 1 ELSE 0 END,
                    last_error = COALESCE($4, last_error),
                    updated_at = $5
                WHERE id = $1 AND state <> 'fatal'
                "#,
            )
            .bind(transition.task_id)
            .bind(transition.to.as_str())
            .bind(transition.bump_attempt)
            .bind(transition.last_error.as_deref())
            .bind(at)
            .execute(&mut *tx)
            .await?;
            changed += result.rows_affected();
        }
        tx.commit().await?;

        Ok(changed)
    }
}

// ============================================================================
// SCORE STORE
// ============================================================================

#[derive(Clone)]
pub struct PgScoreStore {
    pool: PgPool,
}

impl PgScoreStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScoreStore for PgScoreStore {
    async fn stale_scores(
        &self,
        max_age: std::time::Duration,
        limit: i64,
    ) -> StoreResult<Vec<StaleScore>> {
        // Strictly greater than max_age; features without a score never
        // join and so are never reported stale.
        let rows = sqlx::query(
            r#"
            SELECT s.campaign_id, s.domain_id, s.scored_at, f.materialized_at
            FROM analysis_scores s
            JOIN feature_records f
              ON f.campaign_id = s.campaign_id AND f.domain_id = s.domain_id
            WHERE f.materialized_at - s.scored_at > make_interval(secs => $1)
            ORDER BY s.scored_at
            LIMIT $2
            "#,
        )
        .bind(max_age.as_secs_f64())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut stale = Vec::with_capacity(rows.len());
        for row in rows {
            stale.push(StaleScore {
                campaign_id: row.try_get("campaign_id")?,
                domain_id: row.try_get("domain_id")?,
                scored_at: row.try_get("scored_at")?,
                materialized_at: row.try_get("materialized_at")?,
            });
        }
        Ok(stale)
    }
}

// ============================================================================
// RESCORE QUEUE
// ============================================================================

#[derive(Clone)]
pub struct PgRescoreQueue {
    pool: PgPool,
}

impl PgRescoreQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RescoreQueue for PgRescoreQueue {
    async fn enqueue(&self, campaign_id: Uuid, domain_id: Uuid) -> StoreResult<EnqueueOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO rescore_queue (campaign_id, domain_id, enqueued_at)
            VALUES ($1, $2, now())
            ON CONFLICT (campaign_id, domain_id) DO NOTHING
            "#,
        )
        .bind(campaign_id)
        .bind(domain_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(EnqueueOutcome::Duplicate)
        } else {
            Ok(EnqueueOutcome::Created)
        }
    }
}
