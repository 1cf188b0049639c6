pub mod client;
pub mod models;

use crate::records::{AppDetail, AppId, CatalogEntry, Review};
use crate::retry::AttemptError;
use anyhow::Result;
use async_trait::async_trait;

pub use client::SteamClient;

/// Result of one detail lookup after retries.
#[derive(Debug)]
pub enum DetailFetch {
    Found(AppDetail),
    /// Steam answered but has no data for this id.
    Unresolvable,
    /// Every attempt failed.
    Exhausted {
        attempts: u32,
        last_error: AttemptError,
    },
}

/// The remote catalog as seen by the harvester.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Full app list. Errors are fatal for a run; there is no retry.
    async fn app_list(&self) -> Result<Vec<CatalogEntry>>;

    /// Metadata for one app, retried per the configured policy. Never errors.
    async fn app_details(&self, appid: AppId) -> DetailFetch;

    /// Up to `max` recent reviews. Best effort: failures yield an empty list.
    async fn app_reviews(&self, appid: AppId, max: u32) -> Vec<Review>;
}
