use serde::{Deserialize, Serialize};

/// Steam app id. Issued by Steam, never reused.
pub type AppId = u64;

/// Placeholder written for detail fields Steam did not provide.
pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub appid: AppId,
    pub name: String,
}

/// Flattened per-app metadata as persisted by the sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDetail {
    pub appid: AppId,
    pub name: String,
    pub description: String,
    pub price: String,
    pub release_date: String,
    pub developer: String,
    pub publisher: String,
    pub tags: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub appid: AppId,
    pub review: String,
    pub voted_up: bool,
    /// Unix seconds.
    pub timestamp_created: i64,
    /// Author's total playtime in minutes.
    pub playtime_forever: u64,
    /// Author's playtime over the last two weeks in minutes.
    pub playtime_last_two_weeks: u64,
    /// Number of reviews the author has written.
    pub num_reviews: u64,
}
