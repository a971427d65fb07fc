//! Storage and queue seams.
//!
//! The pipeline is storage-engine agnostic at these seams: production
//! uses the Postgres implementations in [`crate::stores::postgres`],
//! tests use [`crate::stores::memory::MemoryStore`]. Every method is a
//! bounded unit of work (one page, one category), so no implementation
//! ever holds a long-lived transaction across units.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::cursor::DomainCursor;
use crate::error::StoreResult;
use crate::types::{EligibleDomain, EnqueueOutcome, ExtractionTask, StaleScore, TaskTransition};

// ============================================================================
// DOMAIN STORE: keyset pagination over eligible domains
// ============================================================================

#[async_trait]
pub trait DomainStore: Send + Sync {
    /// Fetch one page of eligible domains for a campaign, in strict
    /// `(offset_index, domain_id)` order, strictly after `after`.
    ///
    /// `after == None` starts from the beginning of the ordering.
    async fn eligible_page(
        &self,
        campaign_id: Uuid,
        after: Option<&DomainCursor>,
        limit: i64,
    ) -> StoreResult<Vec<EligibleDomain>>;
}

// ============================================================================
// TASK STORE: bounded category queries + atomic corrective updates
// ============================================================================

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Tasks in `running` whose `updated_at` is older than `cutoff`.
    async fn stuck_running(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ExtractionTask>>;

    /// Tasks in `pending` whose `updated_at` is older than `cutoff`.
    async fn stuck_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ExtractionTask>>;

    /// Tasks in `error`, oldest first. Includes rows with exhausted
    /// retries so the reconciler can force them to `fatal`.
    async fn error_tasks(&self, limit: i64) -> StoreResult<Vec<ExtractionTask>>;

    /// Tasks in `completed` older than `cutoff` with no corresponding
    /// feature record.
    async fn completed_missing_features(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ExtractionTask>>;

    /// Apply one category's transitions as a single atomic set, stamping
    /// `updated_at = at`. Either all transitions commit or none do.
    /// Returns the number of rows actually changed.
    async fn apply_transitions(
        &self,
        transitions: &[TaskTransition],
        at: DateTime<Utc>,
    ) -> StoreResult<u64>;
}

// ============================================================================
// SCORE STORE: staleness queries
// ============================================================================

#[async_trait]
pub trait ScoreStore: Send + Sync {
    /// Scores whose source features were materialized more than `max_age`
    /// after the score was computed, oldest score first.
    ///
    /// Features with no score at all are "unscored", not stale, and are
    /// never returned here.
    async fn stale_scores(
        &self,
        max_age: std::time::Duration,
        limit: i64,
    ) -> StoreResult<Vec<StaleScore>>;
}

// ============================================================================
// RESCORE QUEUE: fire-and-forget hand-off to the external job system
// ============================================================================

#[async_trait]
pub trait RescoreQueue: Send + Sync {
    /// Enqueue a (campaign, domain) pair for rescoring.
    ///
    /// Idempotent from the caller's perspective: enqueuing a pair that is
    /// already queued returns [`EnqueueOutcome::Duplicate`], never an
    /// error.
    async fn enqueue(&self, campaign_id: Uuid, domain_id: Uuid) -> StoreResult<EnqueueOutcome>;
}
