//! Environment-sourced pipeline configuration.
//!
//! All thresholds are loaded once at process start, validated, and
//! CLAMPED into safe bounds rather than rejecting startup: a zero or
//! negative interval is raised to the minimum, an absurd row limit is
//! capped. Components receive the built config by value and never
//! re-read the environment mid-operation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const MIN_DURATION: Duration = Duration::from_secs(1);
const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration shared by the selector, reconciler, and detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    // Reconciliation
    pub reconcile_enabled: bool,
    pub reconcile_interval: Duration,
    pub stuck_running_max_age: Duration,
    pub stuck_pending_max_age: Duration,
    pub missing_feature_grace: Duration,
    pub max_retries: i32,
    /// Row cap per category per pass.
    pub category_limit: i64,
    pub pass_timeout: Duration,

    // Stale score detection
    pub detect_enabled: bool,
    pub detect_interval: Duration,
    pub stale_score_max_age: Duration,
    /// Row cap per detection pass.
    pub detect_limit: i64,

    // Candidate selection
    pub page_size: i64,
    /// Safety ceiling on pages fetched in one selection run. Sustained
    /// high page counts signal an index or selectivity regression.
    pub max_pages: u32,
    pub selector_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reconcile_enabled: true,
            reconcile_interval: Duration::from_secs(600),
            stuck_running_max_age: Duration::from_secs(1800),
            stuck_pending_max_age: Duration::from_secs(1200),
            missing_feature_grace: Duration::from_secs(300),
            max_retries: 3,
            category_limit: 500,
            pass_timeout: Duration::from_secs(20),

            detect_enabled: true,
            detect_interval: Duration::from_secs(600),
            stale_score_max_age: Duration::from_secs(3600),
            detect_limit: 1000,

            page_size: 1000,
            max_pages: 50,
            selector_timeout: Duration::from_secs(30),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from the environment, falling back to defaults
    /// and clamping out-of-range values. Never fails.
    ///
    /// Honors a `.env` file when present (development convenience).
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let d = Self::default();
        Self {
            reconcile_enabled: env_bool("PIPELINE_RECONCILE_ENABLED", d.reconcile_enabled),
            reconcile_interval: env_duration_secs(
                "PIPELINE_RECONCILE_INTERVAL_SECS",
                d.reconcile_interval,
            ),
            stuck_running_max_age: env_duration_secs(
                "PIPELINE_STUCK_RUNNING_MAX_AGE_SECS",
                d.stuck_running_max_age,
            ),
            stuck_pending_max_age: env_duration_secs(
                "PIPELINE_STUCK_PENDING_MAX_AGE_SECS",
                d.stuck_pending_max_age,
            ),
            missing_feature_grace: env_duration_secs(
                "PIPELINE_MISSING_FEATURE_GRACE_SECS",
                d.missing_feature_grace,
            ),
            max_retries: env_i64_clamped("PIPELINE_MAX_RETRIES", d.max_retries as i64, 0, 10)
                as i32,
            category_limit: env_i64_clamped(
                "PIPELINE_RECONCILE_CATEGORY_LIMIT",
                d.category_limit,
                1,
                10_000,
            ),
            pass_timeout: env_duration_secs("PIPELINE_PASS_TIMEOUT_SECS", d.pass_timeout),

            detect_enabled: env_bool("PIPELINE_STALE_DETECTION_ENABLED", d.detect_enabled),
            detect_interval: env_duration_secs("PIPELINE_DETECT_INTERVAL_SECS", d.detect_interval),
            stale_score_max_age: env_duration_secs(
                "PIPELINE_STALE_SCORE_MAX_AGE_SECS",
                d.stale_score_max_age,
            ),
            detect_limit: env_i64_clamped("PIPELINE_DETECT_LIMIT", d.detect_limit, 1, 10_000),

            page_size: env_i64_clamped("PIPELINE_SELECTOR_PAGE_SIZE", d.page_size, 50, 5000),
            max_pages: env_i64_clamped("PIPELINE_SELECTOR_MAX_PAGES", d.max_pages as i64, 1, 1000)
                as u32,
            selector_timeout: env_duration_secs(
                "PIPELINE_SELECTOR_TIMEOUT_SECS",
                d.selector_timeout,
            ),
        }
    }
}

/// Read a boolean-ish environment variable ("true"/"1"/"yes"/"on", case
/// insensitive) with a default.
fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            other => other.parse::<i64>().map(|n| n != 0).unwrap_or(default),
        },
        Err(_) => default,
    }
}

/// Read an integer environment variable clamped into `[min, max]`.
fn env_i64_clamped(key: &str, default: i64, min: i64, max: i64) -> i64 {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<i64>()
            .map(|n| n.clamp(min, max))
            .unwrap_or(default),
        Err(_) => default,
    }
}

/// Read a duration (whole seconds) clamped into `[1s, 24h]`.
fn env_duration_secs(key: &str, default: Duration) -> Duration {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<i64>() {
            Ok(secs) => {
                let clamped = secs.clamp(
                    MIN_DURATION.as_secs() as i64,
                    MAX_DURATION.as_secs() as i64,
                );
                Duration::from_secs(clamped as u64)
            }
            Err(_) => default,
        },
        Err(_) => default,
    }
}
