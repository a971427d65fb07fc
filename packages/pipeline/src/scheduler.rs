//! Periodic driver loops for the reconciler and detector.
//!
//! Each loop ticks on its configured interval and runs one pass per
//! tick. A tick that lands while the previous pass is still running is
//! absorbed by the component's single-flight guard as a skip. Loops stop
//! when the shutdown channel flips to `true` or its sender is dropped.

use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::clock::Clock;
use crate::detector::StaleScoreDetector;
use crate::reconciler::ExtractionReconciler;
use crate::traits::{RescoreQueue, ScoreStore, TaskStore};

/// Drive the reconciler on its configured interval until shutdown.
pub async fn run_reconciler_loop<S, C>(
    reconciler: ExtractionReconciler<S, C>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: TaskStore,
    C: Clock,
{
    let config = reconciler.config();
    if !config.reconcile_enabled {
        info!("reconciliation disabled, loop not started");
        return;
    }
    let period = config.reconcile_interval;
    info!(interval_secs = period.as_secs(), "reconciler loop started");

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = reconciler.run_once().await {
                    error!(error = %err, "reconciliation pass failed");
                }
            }
            changed = shutdown.changed() => {
                // A dropped sender counts as shutdown.
                if changed.is_err() || *shutdown.borrow() {
                    info!("reconciler loop stopping");
                    return;
                }
            }
        }
    }
}

/// Drive the stale score detector on its configured interval until
/// shutdown.
pub async fn run_detector_loop<S, Q>(
    detector: StaleScoreDetector<S, Q>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: ScoreStore,
    Q: RescoreQueue,
{
    let config = detector.config();
    if !config.detect_enabled {
        info!("stale score detection disabled, loop not started");
        return;
    }
    let period = config.detect_interval;
    info!(interval_secs = period.as_secs(), "detector loop started");

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = detector.run_once().await {
                    error!(error = %err, "detection pass failed");
                }
            }
            changed = shutdown.changed() => {
                // A dropped sender counts as shutdown.
                if changed.is_err() || *shutdown.borrow() {
                    info!("detector loop stopping");
                    return;
                }
            }
        }
    }
}
