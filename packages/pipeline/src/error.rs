//! Typed errors for the pipeline library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.
//!
//! Two layers:
//!
//! - [`StoreError`] is what the storage seams return. It distinguishes
//!   infrastructure faults (`Unavailable`) from statement-level failures
//!   (`Query`) so callers can decide whether to abort or count-and-continue.
//! - [`PipelineError`] is the public taxonomy surfaced to callers and the
//!   external scheduler.
//!
//! A single-flight collision is deliberately NOT an error: it is reported
//! as a normal pass result with a `Skipped` outcome.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A pagination cursor could not be decoded. Recoverable: the caller
    /// restarts the traversal from the beginning.
    #[error("malformed cursor: {reason}")]
    MalformedCursor { reason: String },

    /// Candidate collection failed partway through a selection run.
    ///
    /// Covers store failures, timeouts, and panics inside the page loop.
    /// The selection surfaces this error rather than returning a partial
    /// subset; there is no alternate pagination strategy to fall back to.
    #[error("candidate collection failed: {0}")]
    CollectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A reconciliation or detection pass exceeded its configured timeout.
    /// Rows not yet examined are left unchanged; the next scheduled
    /// invocation retries.
    #[error("pass timed out after {0:?}")]
    PassTimeout(Duration),

    /// The underlying store is unreachable. Propagated to the scheduler,
    /// never swallowed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl PipelineError {
    /// Build a `CollectionFailed` from any error source.
    pub fn collection_failed<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        PipelineError::CollectionFailed(Box::new(source))
    }

    /// Build a `CollectionFailed` from a plain message (panic payloads).
    pub fn collection_failed_msg(msg: impl Into<String>) -> Self {
        PipelineError::CollectionFailed(msg.into().into())
    }
}

/// Errors returned by the storage seams.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store itself is unreachable (connection refused, pool closed,
    /// TLS failure). Aborts the surrounding pass.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A single statement failed. Counted per row/category; does not abort
    /// the surrounding pass.
    #[error("query failed: {0}")]
    Query(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_) => StoreError::Unavailable(e.to_string()),
            _ => StoreError::Query(e.to_string()),
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
