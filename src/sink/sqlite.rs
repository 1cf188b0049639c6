use super::{RecordSink, SinkStats, StoreOutcome};
use crate::config::ReviewPolicy;
use crate::records::{AppDetail, AppId, Review};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS app_details (
    appid        INTEGER PRIMARY KEY,
    name         TEXT NOT NULL,
    description  TEXT NOT NULL,
    price        TEXT NOT NULL,
    release_date TEXT NOT NULL,
    developer    TEXT NOT NULL,
    publisher    TEXT NOT NULL,
    tags         TEXT NOT NULL,
    fetched_at   TEXT NOT NULL
)"#,
    // No uniqueness on reviews: rows are a snapshot per fetch.
    r#"CREATE TABLE IF NOT EXISTS app_reviews (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    appid                   INTEGER NOT NULL,
    review                  TEXT NOT NULL,
    voted_up                INTEGER NOT NULL,
    timestamp_created       INTEGER NOT NULL,
    playtime_forever        INTEGER NOT NULL,
    playtime_last_two_weeks INTEGER NOT NULL,
    num_reviews             INTEGER NOT NULL,
    fetched_at              TEXT NOT NULL
)"#,
    "CREATE INDEX IF NOT EXISTS idx_app_reviews_appid ON app_reviews (appid)",
];

#[derive(Clone)]
pub struct SqliteSink {
    pub pool: SqlitePool,
    review_policy: ReviewPolicy,
}

impl SqliteSink {
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn open(path: &Path, review_policy: ReviewPolicy) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open sqlite db {}", path.display()))?;

        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&pool).await?;
        }
        info!(review_policy = %review_policy, "sqlite sink ready");
        Ok(Self {
            pool,
            review_policy,
        })
    }

    pub async fn review_count(&self, appid: AppId) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM app_reviews WHERE appid = ?")
            .bind(to_i64(appid)?)
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

fn to_i64(v: u64) -> Result<i64> {
    i64::try_from(v).with_context(|| format!("value {v} does not fit sqlite INTEGER"))
}

#[async_trait]
impl RecordSink for SqliteSink {
    async fn store_detail(&self, detail: &AppDetail) -> Result<StoreOutcome> {
        let res = sqlx::query(
            "INSERT OR IGNORE INTO app_details \
             (appid, name, description, price, release_date, developer, publisher, tags, fetched_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(to_i64(detail.appid)?)
        .bind(&detail.name)
        .bind(&detail.description)
        .bind(&detail.price)
        .bind(&detail.release_date)
        .bind(&detail.developer)
        .bind(&detail.publisher)
        .bind(&detail.tags)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .with_context(|| format!("insert app_details appid={}", detail.appid))?;

        if res.rows_affected() == 0 {
            Ok(StoreOutcome::AlreadyPresent)
        } else {
            Ok(StoreOutcome::Inserted)
        }
    }

    async fn store_reviews(&self, appid: AppId, reviews: &[Review]) -> Result<usize> {
        if reviews.is_empty() {
            return Ok(0);
        }
        let appid_i = to_i64(appid)?;
        let fetched_at = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        if self.review_policy == ReviewPolicy::ReplacePerApp {
            sqlx::query("DELETE FROM app_reviews WHERE appid = ?")
                .bind(appid_i)
                .execute(&mut *tx)
                .await?;
        }
        for r in reviews {
            sqlx::query(
                "INSERT INTO app_reviews \
                 (appid, review, voted_up, timestamp_created, playtime_forever, \
                  playtime_last_two_weeks, num_reviews, fetched_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(appid_i)
            .bind(&r.review)
            .bind(r.voted_up)
            .bind(r.timestamp_created)
            .bind(to_i64(r.playtime_forever)?)
            .bind(to_i64(r.playtime_last_two_weeks)?)
            .bind(to_i64(r.num_reviews)?)
            .bind(&fetched_at)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("insert app_reviews appid={appid}"))?;
        }
        tx.commit().await?;
        Ok(reviews.len())
    }

    async fn stats(&self) -> Result<SinkStats> {
        let details: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM app_details")
            .fetch_one(&self.pool)
            .await?;
        let reviews: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM app_reviews")
            .fetch_one(&self.pool)
            .await?;
        Ok(SinkStats {
            details: details.max(0) as u64,
            reviews: reviews.max(0) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(appid: AppId, name: &str) -> AppDetail {
        AppDetail {
            appid,
            name: name.into(),
            description: "desc".into(),
            price: "N/A".into(),
            release_date: "N/A".into(),
            developer: "N/A".into(),
            publisher: "N/A".into(),
            tags: String::new(),
        }
    }

    fn reviews(appid: AppId, n: usize) -> Vec<Review> {
        (0..n)
            .map(|i| Review {
                appid,
                review: format!("review {i}"),
                voted_up: i % 2 == 0,
                timestamp_created: 1_600_000_000 + i as i64,
                playtime_forever: 10,
                playtime_last_two_weeks: 0,
                num_reviews: 1,
            })
            .collect()
    }

    #[tokio::test]
    async fn duplicate_detail_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteSink::open(&dir.path().join("steam.db"), ReviewPolicy::Append)
            .await
            .unwrap();
        assert_eq!(
            sink.store_detail(&detail(10, "first")).await.unwrap(),
            StoreOutcome::Inserted
        );
        assert_eq!(
            sink.store_detail(&detail(10, "second")).await.unwrap(),
            StoreOutcome::AlreadyPresent
        );

        let name: String = sqlx::query_scalar("SELECT name FROM app_details WHERE appid = 10")
            .fetch_one(&sink.pool)
            .await
            .unwrap();
        assert_eq!(name, "first");
        assert_eq!(sink.stats().await.unwrap().details, 1);
    }

    #[tokio::test]
    async fn append_policy_duplicates_reviews() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteSink::open(&dir.path().join("steam.db"), ReviewPolicy::Append)
            .await
            .unwrap();
        sink.store_reviews(5, &reviews(5, 3)).await.unwrap();
        sink.store_reviews(5, &reviews(5, 3)).await.unwrap();
        assert_eq!(sink.review_count(5).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn replace_policy_keeps_latest_page_only() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteSink::open(&dir.path().join("steam.db"), ReviewPolicy::ReplacePerApp)
            .await
            .unwrap();
        sink.store_reviews(5, &reviews(5, 3)).await.unwrap();
        sink.store_reviews(6, &reviews(6, 1)).await.unwrap();
        sink.store_reviews(5, &reviews(5, 2)).await.unwrap();
        // An empty page leaves stored rows alone.
        sink.store_reviews(5, &[]).await.unwrap();

        assert_eq!(sink.review_count(5).await.unwrap(), 2);
        assert_eq!(sink.review_count(6).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reopen_keeps_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/steam.db");
        {
            let sink = SqliteSink::open(&path, ReviewPolicy::Append).await.unwrap();
            sink.store_detail(&detail(1, "a")).await.unwrap();
            sink.pool.close().await;
        }
        let sink = SqliteSink::open(&path, ReviewPolicy::Append).await.unwrap();
        assert_eq!(
            sink.store_detail(&detail(1, "a")).await.unwrap(),
            StoreOutcome::AlreadyPresent
        );
    }
}
