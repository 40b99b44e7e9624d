//! Change-detection scheduler.
//!
//! One cycle: enumerate eligible projects, fan the candidates out across a
//! fixed-size worker pool, then commit every worker's decision in a single
//! store transaction. A cycle with no upstream drift performs zero writes.

pub mod batch;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::{info, warn};

use crate::pool::{run_pool, TaskQueue};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::storage::DetectionCandidate;
use crate::AppContext;

use batch::DetectionBatch;

/// What one cycle did, for the log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleSummary {
    pub candidates: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub documents_replaced: usize,
}

impl CycleSummary {
    pub fn wrote_anything(&self) -> bool {
        self.created + self.updated + self.deleted + self.documents_replaced > 0
    }
}

/// Run one detection cycle to completion.
///
/// Individual task failures are skipped (eligibility persists, so they are
/// retried next cycle). A batch-commit failure is fatal for the cycle and
/// surfaced to the caller once retries are exhausted — partial
/// application across the four result lists is never observable.
pub async fn run_detection_cycle(ctx: &AppContext) -> Result<CycleSummary> {
    let candidates = ctx.storage.list_detection_candidates().await?;
    let mut summary = CycleSummary {
        candidates: candidates.len(),
        ..Default::default()
    };
    if candidates.is_empty() {
        return Ok(summary);
    }

    let queue = TaskQueue::new();
    for candidate in candidates {
        queue.push(candidate).await;
    }
    queue.close();

    let results = Arc::new(DetectionBatch::new());
    let handler = {
        let http = ctx.http.clone();
        let results = Arc::clone(&results);
        move |candidate: DetectionCandidate| {
            let http = http.clone();
            let results = Arc::clone(&results);
            async move {
                worker::process_candidate(&http, candidate, &results).await;
            }
        }
    };
    run_pool(queue, ctx.config.detection_workers, handler).await;

    let data = Arc::try_unwrap(results)
        .map_err(|_| anyhow!("detection workers still hold the result batch"))?
        .into_data();

    summary.created = data.records_to_create.len();
    summary.updated = data.records_to_update.len();
    summary.deleted = data.records_to_delete.len();
    summary.documents_replaced = data.documents_to_update.len();

    if data.is_empty() {
        return Ok(summary);
    }

    retry_with_backoff(&RetryConfig::default(), || {
        ctx.storage.apply_detection_batch(&data)
    })
    .await?;

    Ok(summary)
}

/// Spawn the periodic detection loop.
pub fn spawn(ctx: AppContext) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(ctx.config.detection_interval_secs));
        interval.tick().await; // skip the immediate first tick
        loop {
            interval.tick().await;
            match run_detection_cycle(&ctx).await {
                Ok(summary) if summary.wrote_anything() => info!(
                    candidates = summary.candidates,
                    created = summary.created,
                    updated = summary.updated,
                    deleted = summary.deleted,
                    documents = summary.documents_replaced,
                    "detection cycle complete"
                ),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "detection cycle failed"),
            }
        }
    });
}
