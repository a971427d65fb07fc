//! Metric names and emit helpers.
//!
//! Counters are keyed by category or outcome so an external collector can
//! watch per-category adjustment rates and sustained timeouts. Degraded
//! pipeline health should be visible on a dashboard, not only in logs.

use std::time::Duration;

use metrics::{counter, histogram};

use crate::types::Category;

pub const SELECTOR_RUNS: &str = "pipeline_selector_runs_total";
pub const SELECTOR_PAGES: &str = "pipeline_selector_pages";
pub const SELECTOR_DURATION: &str = "pipeline_selector_duration_seconds";

pub const RECONCILE_PASSES: &str = "pipeline_reconcile_passes_total";
pub const RECONCILE_EXAMINED: &str = "pipeline_reconcile_rows_examined_total";
pub const RECONCILE_ADJUSTED: &str = "pipeline_reconcile_rows_adjusted_total";
pub const RECONCILE_DURATION: &str = "pipeline_reconcile_duration_seconds";

pub const DETECT_PASSES: &str = "pipeline_detect_passes_total";
pub const STALE_SCORES_DETECTED: &str = "pipeline_stale_scores_detected_total";
pub const RESCORE_ENQUEUED: &str = "pipeline_rescore_enqueued_total";
pub const DETECT_DURATION: &str = "pipeline_detect_duration_seconds";

pub(crate) fn record_selector_run(outcome: &'static str, pages: u32, duration: Duration) {
    counter!(SELECTOR_RUNS, "outcome" => outcome).increment(1);
    histogram!(SELECTOR_PAGES).record(pages as f64);
    histogram!(SELECTOR_DURATION).record(duration.as_secs_f64());
}

pub(crate) fn record_reconcile_pass(outcome: &'static str) {
    counter!(RECONCILE_PASSES, "outcome" => outcome).increment(1);
}

pub(crate) fn record_reconcile_category(category: Category, examined: usize, adjusted: u64) {
    counter!(RECONCILE_EXAMINED, "category" => category.as_str()).increment(examined as u64);
    if adjusted > 0 {
        counter!(RECONCILE_ADJUSTED, "category" => category.as_str()).increment(adjusted);
    }
}

pub(crate) fn record_reconcile_duration(duration: Duration) {
    histogram!(RECONCILE_DURATION).record(duration.as_secs_f64());
}

pub(crate) fn record_detect_pass(outcome: &'static str) {
    counter!(DETECT_PASSES, "outcome" => outcome).increment(1);
}

pub(crate) fn record_detect_duration(duration: Duration) {
    histogram!(DETECT_DURATION).record(duration.as_secs_f64());
}

pub(crate) fn record_stale_detected(count: u64) {
    if count > 0 {
        counter!(STALE_SCORES_DETECTED).increment(count);
    }
}

pub(crate) fn record_rescore_enqueued(outcome: &'static str, count: u64) {
    if count > 0 {
        counter!(RESCORE_ENQUEUED, "outcome" => outcome).increment(count);
    }
}
