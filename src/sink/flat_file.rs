//! CSV sink: one file for details, one for reviews.
//!
//! A header is written only when a file is absent or empty; later writes append
//! rows. Detail ids already in the file are indexed at open so storing the same
//! app twice is a no-op.
use super::{RecordSink, SinkStats, StoreOutcome};
use crate::records::{AppDetail, AppId, Review};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tokio::task;
use tracing::{info, warn};

pub const DETAILS_FILE: &str = "steam_games.csv";
pub const REVIEWS_FILE: &str = "steam_reviews.csv";

pub struct CsvSink {
    details_path: PathBuf,
    reviews_path: PathBuf,
    /// Detail ids on disk. Also serializes writers across both files.
    known: Mutex<HashSet<AppId>>,
}

impl CsvSink {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        let details_path = dir.join(DETAILS_FILE);
        let reviews_path = dir.join(REVIEWS_FILE);
        let known = read_detail_ids(&details_path)?;
        info!(
            path = %details_path.display(),
            existing = known.len(),
            "csv sink ready"
        );
        Ok(Self {
            details_path,
            reviews_path,
            known: Mutex::new(known),
        })
    }

    pub fn details_path(&self) -> &Path {
        &self.details_path
    }

    pub fn reviews_path(&self) -> &Path {
        &self.reviews_path
    }
}

/// Run a file append on the blocking pool.
async fn append_off_runtime<T>(path: &Path, rows: Vec<T>) -> Result<()>
where
    T: Serialize + Send + 'static,
{
    let path = path.to_path_buf();
    task::spawn_blocking(move || append_rows(&path, &rows))
        .await
        .context("csv writer task failed")?
}

#[async_trait]
impl RecordSink for CsvSink {
    async fn store_detail(&self, detail: &AppDetail) -> Result<StoreOutcome> {
        let mut known = self.known.lock().await;
        if known.contains(&detail.appid) {
            return Ok(StoreOutcome::AlreadyPresent);
        }
        append_off_runtime(&self.details_path, vec![detail.clone()]).await?;
        known.insert(detail.appid);
        Ok(StoreOutcome::Inserted)
    }

    async fn store_reviews(&self, _appid: AppId, reviews: &[Review]) -> Result<usize> {
        if reviews.is_empty() {
            return Ok(0);
        }
        let _guard = self.known.lock().await;
        append_off_runtime(&self.reviews_path, reviews.to_vec()).await?;
        Ok(reviews.len())
    }

    async fn stats(&self) -> Result<SinkStats> {
        let known = self.known.lock().await;
        let details = known.len() as u64;
        let path = self.reviews_path.clone();
        let reviews = task::spawn_blocking(move || count_rows(&path))
            .await
            .context("csv reader task failed")??;
        Ok(SinkStats { details, reviews })
    }
}

fn append_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let needs_header = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_header)
        .from_writer(file);
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("failed to write row to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

fn read_detail_ids(path: &Path) -> Result<HashSet<AppId>> {
    let mut out = HashSet::new();
    if !path.exists() {
        return Ok(out);
    }
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let headers = rdr.headers()?.clone();
    let Some(col) = headers.iter().position(|h| h == "appid") else {
        warn!(path = %path.display(), "existing details file has no appid column; not indexing");
        return Ok(out);
    };
    for record in rdr.records() {
        let record = record.with_context(|| format!("failed to read {}", path.display()))?;
        if let Some(id) = record.get(col).and_then(|v| v.trim().parse::<AppId>().ok()) {
            out.insert(id);
        }
    }
    Ok(out)
}

fn count_rows(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut n = 0u64;
    for record in rdr.records() {
        record.with_context(|| format!("failed to read {}", path.display()))?;
        n += 1;
    }
    Ok(n)
}
