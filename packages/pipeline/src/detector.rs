//! Stale score detector.
//!
//! A score is stale when its source features were re-materialized more
//! than `stale_score_max_age` after the score was computed. Each pass
//! finds up to `detect_limit` such pairs (oldest score first) and hands
//! each one to the rescore queue. Enqueueing is idempotent downstream, so
//! detecting the same pair across consecutive passes is harmless: the
//! second enqueue collapses into a duplicate.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result, StoreError};
use crate::metrics;
use crate::single_flight::SingleFlight;
use crate::traits::{RescoreQueue, ScoreStore};
use crate::types::{DetectionResult, EnqueueOutcome, PassOutcome};

/// Periodic detector that re-queues scoring for outdated scores.
pub struct StaleScoreDetector<S, Q> {
    scores: Arc<S>,
    queue: Arc<Q>,
    config: PipelineConfig,
    flight: SingleFlight,
}

impl<S: ScoreStore, Q: RescoreQueue> StaleScoreDetector<S, Q> {
    pub fn new(scores: Arc<S>, queue: Arc<Q>, config: PipelineConfig) -> Self {
        Self {
            scores,
            queue,
            config,
            flight: SingleFlight::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute a single detection pass.
    ///
    /// Returns a `Skipped` result when a pass is already in flight. An
    /// unreachable store aborts the pass; a statement-level failure of
    /// the staleness query is counted into `row_errors` like individual
    /// enqueue failures, and the pass completes.
    pub async fn run_once(&self) -> Result<DetectionResult> {
        let Some(_permit) = self.flight.try_acquire() else {
            debug!("detection pass skipped, already running");
            metrics::record_detect_pass("skipped");
            return Ok(DetectionResult::skipped());
        };

        let started = Instant::now();
        let pass = self.detect();
        match tokio::time::timeout(self.config.pass_timeout, pass).await {
            Err(_) => {
                metrics::record_detect_pass("timeout");
                warn!("detection pass timed out");
                Err(PipelineError::PassTimeout(self.config.pass_timeout))
            }
            Ok(Err(StoreError::Unavailable(msg))) => {
                metrics::record_detect_pass("error");
                error!(error = %msg, "store unavailable during detection");
                Err(PipelineError::StoreUnavailable(msg.into()))
            }
            Ok(Err(StoreError::Query(msg))) => {
                // Statement failure, not an infrastructure fault: counted,
                // and the next scheduled pass retries.
                warn!(error = %msg, "stale score query failed");
                let result = DetectionResult {
                    outcome: PassOutcome::Completed,
                    stale_found: 0,
                    enqueued: 0,
                    duplicates: 0,
                    row_errors: 1,
                    duration: started.elapsed(),
                };
                metrics::record_detect_pass("success");
                metrics::record_detect_duration(result.duration);
                Ok(result)
            }
            Ok(Ok(mut result)) => {
                result.duration = started.elapsed();
                metrics::record_detect_pass("success");
                metrics::record_detect_duration(result.duration);
                metrics::record_stale_detected(result.stale_found as u64);
                metrics::record_rescore_enqueued("created", result.enqueued);
                metrics::record_rescore_enqueued("duplicate", result.duplicates);
                info!(
                    stale_found = result.stale_found,
                    enqueued = result.enqueued,
                    duplicates = result.duplicates,
                    row_errors = result.row_errors,
                    duration_ms = result.duration.as_millis() as u64,
                    "stale score detection complete"
                );
                Ok(result)
            }
        }
    }

    async fn detect(&self) -> std::result::Result<DetectionResult, StoreError> {
        let stale = self
            .scores
            .stale_scores(self.config.stale_score_max_age, self.config.detect_limit)
            .await?;

        let mut result = DetectionResult {
            outcome: PassOutcome::Completed,
            stale_found: stale.len(),
            enqueued: 0,
            duplicates: 0,
            row_errors: 0,
            duration: Default::default(),
        };

        for score in stale {
            match self.queue.enqueue(score.campaign_id, score.domain_id).await {
                Ok(EnqueueOutcome::Created) => result.enqueued += 1,
                Ok(EnqueueOutcome::Duplicate) => result.duplicates += 1,
                Err(err) => {
                    result.row_errors += 1;
                    warn!(
                        campaign_id = %score.campaign_id,
                        domain_id = %score.domain_id,
                        error = %err,
                        "rescore enqueue failed"
                    );
                }
            }
        }

        Ok(result)
    }
}
