//! Drives one harvest run: catalog, progress, worker fan-out, periodic flushes.
use crate::config::{HarvestConfig, ReviewSettings};
use crate::progress::ProgressTracker;
use crate::records::AppId;
use crate::sink::{RecordSink, StoreOutcome};
use crate::steam::{CatalogApi, DetailFetch};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub catalog_size: usize,
    /// Catalog entries already completed or failed before this run.
    pub skipped: usize,
    pub scheduled: usize,
    pub completed: usize,
    pub failed: usize,
    pub details_inserted: usize,
    pub details_already_present: usize,
    pub reviews_stored: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// What one unit of work produced for an app id.
#[derive(Debug)]
enum AppOutcome {
    Stored {
        appid: AppId,
        detail: StoreOutcome,
        reviews: usize,
    },
    NoData {
        appid: AppId,
    },
    StoreFailed {
        appid: AppId,
        error: anyhow::Error,
    },
}

pub struct Harvester {
    config: HarvestConfig,
    api: Arc<dyn CatalogApi>,
    sink: Arc<dyn RecordSink>,
}

impl Harvester {
    pub fn new(config: HarvestConfig, api: Arc<dyn CatalogApi>, sink: Arc<dyn RecordSink>) -> Self {
        Self { config, api, sink }
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let started_at = Utc::now();
        let catalog = self
            .api
            .app_list()
            .await
            .context("catalog unavailable; aborting run")?;

        let mut tracker = ProgressTracker::load(
            self.config.completed_path(),
            self.config.failed_path(),
            self.config.batch_flush,
        )?;

        let skipped = catalog
            .iter()
            .filter(|entry| tracker.is_done(entry.appid))
            .count();
        let mut remaining = tracker.remaining(&catalog);
        if let Some(cap) = self.config.sample {
            remaining.truncate(cap);
        }
        let scheduled = remaining.len();
        let workers = self.config.workers.max(1);
        info!(
            catalog = catalog.len(),
            skipped,
            scheduled,
            workers,
            sample = ?self.config.sample,
            "harvest starting"
        );

        let mut summary = RunSummary {
            catalog_size: catalog.len(),
            skipped,
            scheduled,
            completed: 0,
            failed: 0,
            details_inserted: 0,
            details_already_present: 0,
            reviews_stored: 0,
            started_at,
            finished_at: started_at,
        };

        let reviews = self.config.reviews.clone();
        let mut results = stream::iter(remaining)
            .map(|appid| {
                let api = self.api.clone();
                let sink = self.sink.clone();
                let reviews = reviews.clone();
                async move { harvest_one(api, sink, reviews, appid).await }
            })
            .buffer_unordered(workers);

        while let Some(outcome) = results.next().await {
            match outcome {
                AppOutcome::Stored {
                    appid,
                    detail,
                    reviews,
                } => {
                    match detail {
                        StoreOutcome::Inserted => summary.details_inserted += 1,
                        StoreOutcome::AlreadyPresent => summary.details_already_present += 1,
                    }
                    summary.reviews_stored += reviews;
                    summary.completed += 1;
                    tracker.mark_completed(appid);
                    debug!(appid, ?detail, reviews, "app completed");
                }
                AppOutcome::NoData { appid } => {
                    if tracker.mark_failed(appid) {
                        summary.failed += 1;
                    }
                    debug!(appid, "no detail data; marked failed");
                }
                AppOutcome::StoreFailed { appid, error } => {
                    warn!(appid, error = %format!("{error:#}"), "failed to persist app detail; marked failed");
                    if tracker.mark_failed(appid) {
                        summary.failed += 1;
                    }
                }
            }

            if tracker.flush_due() {
                match tracker.flush() {
                    Ok(()) => info!(
                        done = summary.completed + summary.failed,
                        scheduled,
                        completed_total = tracker.completed_count(),
                        failed_total = tracker.failed_count(),
                        "progress saved"
                    ),
                    Err(err) => warn!(
                        error = %format!("{err:#}"),
                        pending = tracker.pending(),
                        "progress flush failed; retrying at next interval"
                    ),
                }
            }
        }

        tracker
            .flush()
            .context("final progress flush failed")?;
        summary.finished_at = Utc::now();
        info!(
            completed = summary.completed,
            failed = summary.failed,
            inserted = summary.details_inserted,
            already_present = summary.details_already_present,
            reviews = summary.reviews_stored,
            elapsed_secs = (summary.finished_at - summary.started_at).num_seconds(),
            "harvest finished"
        );
        Ok(summary)
    }
}

#[instrument(level = "debug", skip(api, sink, reviews))]
async fn harvest_one(
    api: Arc<dyn CatalogApi>,
    sink: Arc<dyn RecordSink>,
    reviews: ReviewSettings,
    appid: AppId,
) -> AppOutcome {
    let detail = match api.app_details(appid).await {
        DetailFetch::Found(detail) => detail,
        DetailFetch::Unresolvable | DetailFetch::Exhausted { .. } => {
            return AppOutcome::NoData { appid };
        }
    };
    let stored = match sink.store_detail(&detail).await {
        Ok(outcome) => outcome,
        Err(error) => return AppOutcome::StoreFailed { appid, error },
    };

    let mut review_rows = 0;
    if reviews.enabled {
        let page = api.app_reviews(appid, reviews.max_per_app).await;
        match sink.store_reviews(appid, &page).await {
            Ok(n) => review_rows = n,
            Err(err) => {
                warn!(appid, error = %format!("{err:#}"), "failed to persist reviews; continuing")
            }
        }
    }

    AppOutcome::Stored {
        appid,
        detail: stored,
        reviews: review_rows,
    }
}
