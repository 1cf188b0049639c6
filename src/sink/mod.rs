//! Persistence sinks for detail and review records.
pub mod flat_file;
pub mod sqlite;

use crate::config::{HarvestConfig, SinkConfig};
use crate::records::{AppDetail, AppId, Review};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

pub use flat_file::CsvSink;
pub use sqlite::SqliteSink;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted,
    /// A record for this app was already stored; nothing was written.
    AlreadyPresent,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    pub details: u64,
    pub reviews: u64,
}

/// Append-style storage shared by all workers.
///
/// `store_detail` is idempotent per app id. `store_reviews` follows the sink's
/// configured `ReviewPolicy`; an empty slice never touches stored rows.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn store_detail(&self, detail: &AppDetail) -> Result<StoreOutcome>;

    async fn store_reviews(&self, appid: AppId, reviews: &[Review]) -> Result<usize>;

    async fn stats(&self) -> Result<SinkStats>;
}

pub async fn open_sink(cfg: &HarvestConfig) -> Result<Arc<dyn RecordSink>> {
    match &cfg.sink {
        SinkConfig::Csv { output_dir } => Ok(Arc::new(CsvSink::open(output_dir)?)),
        SinkConfig::Sqlite { path } => {
            Ok(Arc::new(SqliteSink::open(path, cfg.reviews.policy).await?))
        }
    }
}

/// Like [`open_sink`], but `None` when nothing has been written yet. Never
/// creates directories or database files.
pub async fn open_existing_sink(cfg: &HarvestConfig) -> Result<Option<Arc<dyn RecordSink>>> {
    let exists = match &cfg.sink {
        SinkConfig::Csv { output_dir } => {
            output_dir.join(flat_file::DETAILS_FILE).is_file()
                || output_dir.join(flat_file::REVIEWS_FILE).is_file()
        }
        SinkConfig::Sqlite { path } => path.is_file(),
    };
    if !exists {
        return Ok(None);
    }
    open_sink(cfg).await.map(Some)
}
