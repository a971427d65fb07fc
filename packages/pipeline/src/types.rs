//! Data model for the extraction/analysis pipeline.
//!
//! One `ExtractionTask` row exists per (campaign, domain). Successful
//! extraction materializes a `FeatureRecord`; scoring produces an
//! `AnalysisScore`. The reconciler and detector operate on these rows
//! through the seams in [`crate::traits`].

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Task lifecycle
// ============================================================================

/// Lifecycle state of an extraction task.
///
/// `pending -> running -> {completed | error | fatal}`. `error -> pending`
/// is permitted only while retries remain; `fatal` is terminal and never
/// reconciled further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Error,
    Fatal,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Error => "error",
            TaskState::Fatal => "fatal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskState::Pending),
            "running" => Some(TaskState::Running),
            "completed" => Some(TaskState::Completed),
            "error" => Some(TaskState::Error),
            "fatal" => Some(TaskState::Fatal),
            _ => None,
        }
    }

    /// Terminal states are never touched by reconciliation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Fatal)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One extraction task row.
#[derive(Debug, Clone)]
pub struct ExtractionTask {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub domain_id: Uuid,
    pub state: TaskState,
    pub attempt_count: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// A corrective state change computed by the reconciler.
///
/// Transitions for one category are applied as a single atomic set by
/// [`crate::traits::TaskStore::apply_transitions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTransition {
    pub task_id: Uuid,
    pub to: TaskState,
    /// Increment `attempt_count` as part of the update.
    pub bump_attempt: bool,
    /// Replacement for `last_error`; `None` leaves the column untouched.
    pub last_error: Option<String>,
}

// ============================================================================
// Materialized output
// ============================================================================

/// Materialized extraction output for one (campaign, domain).
#[derive(Debug, Clone)]
pub struct FeatureRecord {
    pub campaign_id: Uuid,
    pub domain_id: Uuid,
    pub materialized_at: DateTime<Utc>,
}

/// Computed relevance score for one (campaign, domain).
#[derive(Debug, Clone)]
pub struct AnalysisScore {
    pub campaign_id: Uuid,
    pub domain_id: Uuid,
    pub scored_at: DateTime<Utc>,
}

/// A score whose source features are newer than the score itself, beyond
/// the configured max age.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleScore {
    pub campaign_id: Uuid,
    pub domain_id: Uuid,
    pub scored_at: DateTime<Utc>,
    pub materialized_at: DateTime<Utc>,
}

// ============================================================================
// Selection
// ============================================================================

/// One row of the eligible-domain ordering, as returned by a page fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibleDomain {
    pub domain_id: Uuid,
    /// Monotonic ordering key within the campaign.
    pub offset_index: i64,
}

// ============================================================================
// Pass results
// ============================================================================

/// Reconciliation categories, each bounded and transacted independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    StuckRunning,
    StuckPending,
    ErrorRetryable,
    MissingFeatures,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::StuckRunning,
        Category::StuckPending,
        Category::ErrorRetryable,
        Category::MissingFeatures,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::StuckRunning => "stuck_running",
            Category::StuckPending => "stuck_pending",
            Category::ErrorRetryable => "error_retryable",
            Category::MissingFeatures => "missing_features",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a pass ended. `Skipped` is the expected outcome of a single-flight
/// collision, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Completed,
    Skipped,
}

/// Summary of one reconciliation pass. Ephemeral; emitted to logs and
/// metrics, never persisted.
#[derive(Debug, Clone)]
pub struct ReconcilePassResult {
    pub outcome: PassOutcome,
    /// Rows examined per category.
    pub examined: HashMap<Category, usize>,
    /// Rows adjusted per category.
    pub adjusted: HashMap<Category, u64>,
    /// Row- and statement-level failures captured without aborting the pass.
    pub row_errors: u64,
    pub duration: Duration,
}

impl ReconcilePassResult {
    pub fn skipped() -> Self {
        Self {
            outcome: PassOutcome::Skipped,
            examined: HashMap::new(),
            adjusted: HashMap::new(),
            row_errors: 0,
            duration: Duration::ZERO,
        }
    }

    pub fn examined_in(&self, category: Category) -> usize {
        self.examined.get(&category).copied().unwrap_or(0)
    }

    pub fn adjusted_in(&self, category: Category) -> u64 {
        self.adjusted.get(&category).copied().unwrap_or(0)
    }

    pub fn total_adjusted(&self) -> u64 {
        self.adjusted.values().sum()
    }
}

/// Summary of one stale-score detection pass.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub outcome: PassOutcome,
    /// Stale pairs found by the query.
    pub stale_found: usize,
    /// Rescore jobs newly enqueued.
    pub enqueued: u64,
    /// Enqueues collapsed into an already-queued job (not errors).
    pub duplicates: u64,
    /// Per-row enqueue failures captured without aborting the pass.
    pub row_errors: u64,
    pub duration: Duration,
}

impl DetectionResult {
    pub fn skipped() -> Self {
        Self {
            outcome: PassOutcome::Skipped,
            stale_found: 0,
            enqueued: 0,
            duplicates: 0,
            row_errors: 0,
            duration: Duration::ZERO,
        }
    }
}

/// Result of a rescore enqueue that handles idempotency.
///
/// Enqueuing the same (campaign, domain) twice before it is processed
/// collapses into `Duplicate` rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Created,
    Duplicate,
}
