//! Campaign pipeline core: candidate selection, task reconciliation, and
//! stale score detection.
//!
//! ```text
//!                       ┌────────────────────┐
//!   select_candidates ─►│  StealthSelector   │── keyset pages ──► DomainStore
//!                       └────────────────────┘
//!                       ┌────────────────────┐
//!   interval tick ─────►│ExtractionReconciler│── 4 categories ──► TaskStore
//!                       └────────────────────┘
//!                       ┌────────────────────┐
//!   interval tick ─────►│ StaleScoreDetector │── stale pairs ───► ScoreStore
//!                       └────────────────────┘            └─────► RescoreQueue
//! ```
//!
//! Design constraints carried throughout:
//!
//! - Every unit of storage work is bounded (one page, one category, one
//!   detection batch) so no pass can monopolize the database.
//! - Periodic passes are single-flight: an overlapping invocation is a
//!   skip, never a queue.
//! - Corrective updates are idempotent; re-running a pass over unchanged
//!   data adjusts nothing.
//! - Collection failures in the selector are loud. There is no fallback
//!   pagination strategy.
//!
//! Production wires the Postgres stores from [`stores::postgres`]; tests
//! use [`stores::memory::MemoryStore`] and the doubles in [`testing`].

pub mod clock;
pub mod config;
pub mod cursor;
pub mod detector;
pub mod error;
pub mod metrics;
pub mod reconciler;
pub mod scheduler;
pub mod selector;
pub mod single_flight;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

pub use clock::{Clock, SystemClock};
pub use config::PipelineConfig;
pub use cursor::DomainCursor;
pub use detector::StaleScoreDetector;
pub use error::{PipelineError, Result, StoreError, StoreResult};
pub use reconciler::ExtractionReconciler;
pub use selector::StealthSelector;
pub use traits::{DomainStore, RescoreQueue, ScoreStore, TaskStore};
pub use types::{
    Category, DetectionResult, EligibleDomain, EnqueueOutcome, ExtractionTask, PassOutcome,
    ReconcilePassResult, StaleScore, TaskState, TaskTransition,
};
