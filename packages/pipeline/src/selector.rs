//! Stealth candidate selector.
//!
//! Assembles a bounded, representative subset of eligible domains for one
//! campaign without ever loading the full eligible set into memory:
//!
//! ```text
//! select_candidates(campaign, target, seed)
//!     │
//!     └─► page loop (keyset cursor, strictly increasing order)
//!             ├─ stop: target reached / rows exhausted / page ceiling
//!             └─► candidate buffer ─► seeded shuffle ─► truncate(target)
//! ```
//!
//! Cursor pagination is the ONLY supported traversal. Any failure inside
//! collection, including the operation timeout and panics, surfaces as a
//! typed [`PipelineError::CollectionFailed`]. A silent
//! fallback to offset paging once produced overlapping selections that
//! were nearly impossible to detect downstream, so failure here must be
//! loud.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::cursor::DomainCursor;
use crate::error::{PipelineError, Result, StoreResult};
use crate::metrics;
use crate::traits::DomainStore;

/// Produces bounded candidate subsets via cursor pagination.
///
/// Holds no mutable state between calls; safe to share across concurrent
/// selections for different campaigns.
pub struct StealthSelector<S> {
    store: Arc<S>,
    config: PipelineConfig,
}

struct Collected {
    ids: Vec<Uuid>,
    pages: u32,
    duplicates: u64,
}

impl<S: DomainStore> StealthSelector<S> {
    pub fn new(store: Arc<S>, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    /// Select up to `target_count` eligible domain ids for `campaign_id`.
    ///
    /// The returned subset has size `min(target_count, eligible_rows)` and
    /// contains no duplicates. Supplying `seed` makes the sampling
    /// deterministic; otherwise a random seed is drawn per call.
    pub async fn select_candidates(
        &self,
        campaign_id: Uuid,
        target_count: usize,
        seed: Option<u64>,
    ) -> Result<Vec<Uuid>> {
        let started = Instant::now();

        let collect = self.collect(campaign_id, target_count);
        let outcome = tokio::time::timeout(
            self.config.selector_timeout,
            AssertUnwindSafe(collect).catch_unwind(),
        )
        .await;

        let collected = match outcome {
            Err(_) => {
                metrics::record_selector_run("error", 0, started.elapsed());
                return Err(PipelineError::collection_failed_msg(format!(
                    "collection timed out after {:?}",
                    self.config.selector_timeout
                )));
            }
            Ok(Err(panic)) => {
                metrics::record_selector_run("error", 0, started.elapsed());
                return Err(PipelineError::collection_failed_msg(format!(
                    "panic in cursor collection: {}",
                    panic_message(panic.as_ref())
                )));
            }
            Ok(Ok(Err(store_err))) => {
                metrics::record_selector_run("error", 0, started.elapsed());
                return Err(PipelineError::collection_failed(store_err));
            }
            Ok(Ok(Ok(collected))) => collected,
        };

        let mut ids = collected.ids;
        let candidates = ids.len();

        let seed = seed.unwrap_or_else(|| rand::rng().random());
        let mut rng = StdRng::seed_from_u64(seed);
        ids.shuffle(&mut rng);
        ids.truncate(target_count);

        let elapsed = started.elapsed();
        metrics::record_selector_run("success", collected.pages, elapsed);
        info!(
            campaign_id = %campaign_id,
            pages = collected.pages,
            candidates,
            selected = ids.len(),
            duplicates_dropped = collected.duplicates,
            elapsed_ms = elapsed.as_millis() as u64,
            "candidate selection complete"
        );

        Ok(ids)
    }

    /// Accumulate candidates page by page in strict cursor order.
    async fn collect(&self, campaign_id: Uuid, target_count: usize) -> StoreResult<Collected> {
        let page_size = self.config.page_size;
        let mut cursor: Option<DomainCursor> = None;
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut ids: Vec<Uuid> = Vec::new();
        let mut pages: u32 = 0;
        let mut duplicates: u64 = 0;

        loop {
            if pages >= self.config.max_pages {
                // The ceiling guards against pathological ordering; hitting
                // it repeatedly signals an index or selectivity regression.
                warn!(
                    campaign_id = %campaign_id,
                    pages,
                    "selector hit page-count safety ceiling"
                );
                break;
            }

            let page = self
                .store
                .eligible_page(campaign_id, cursor.as_ref(), page_size)
                .await?;
            pages += 1;

            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(DomainCursor::new(last.offset_index, last.domain_id));

            let page_len = page.len();
            for row in page {
                if seen.insert(row.domain_id) {
                    ids.push(row.domain_id);
                } else {
                    duplicates += 1;
                }
            }

            if ids.len() >= target_count {
                break;
            }
            if (page_len as i64) < page_size {
                // Short page: the ordering is exhausted.
                break;
            }
        }

        Ok(Collected {
            ids,
            pages,
            duplicates,
        })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
