//! Steam wire formats and their mapping onto harvest records.
use crate::records::{AppDetail, AppId, CatalogEntry, Review, NOT_AVAILABLE};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct AppListResp {
    pub applist: AppList,
}

#[derive(Debug, Deserialize)]
pub struct AppList {
    pub apps: Vec<AppEntry>,
}

#[derive(Debug, Deserialize)]
pub struct AppEntry {
    pub appid: AppId,
    #[serde(default)]
    pub name: String,
}

impl From<AppListResp> for Vec<CatalogEntry> {
    fn from(resp: AppListResp) -> Self {
        resp.applist
            .apps
            .into_iter()
            .map(|a| CatalogEntry {
                appid: a.appid,
                name: a.name,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct AppDetailsWrapper {
    success: bool,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct AppData {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    short_description: Option<String>,
    #[serde(default)]
    price_overview: Option<PriceOverview>,
    #[serde(default)]
    release_date: Option<ReleaseDate>,
    #[serde(default)]
    developers: Option<Vec<String>>,
    #[serde(default)]
    publishers: Option<Vec<String>>,
    #[serde(default)]
    genres: Option<Vec<GenreEntry>>,
}

#[derive(Debug, Deserialize)]
struct PriceOverview {
    #[serde(default)]
    final_formatted: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReleaseDate {
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenreEntry {
    #[serde(default)]
    description: Option<String>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn join_list(items: Option<Vec<String>>) -> Option<String> {
    let joined = items?
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    non_empty(Some(joined))
}

impl AppData {
    fn into_detail(self, appid: AppId) -> AppDetail {
        let tags = join_list(self.genres.map(|gs| {
            gs.into_iter()
                .filter_map(|g| g.description)
                .collect::<Vec<_>>()
        }));
        AppDetail {
            appid,
            name: non_empty(self.name).unwrap_or_default(),
            description: non_empty(self.short_description).unwrap_or_default(),
            price: non_empty(self.price_overview.and_then(|p| p.final_formatted))
                .unwrap_or_else(|| NOT_AVAILABLE.into()),
            release_date: non_empty(self.release_date.and_then(|r| r.date))
                .unwrap_or_else(|| NOT_AVAILABLE.into()),
            developer: join_list(self.developers).unwrap_or_else(|| NOT_AVAILABLE.into()),
            publisher: join_list(self.publishers).unwrap_or_else(|| NOT_AVAILABLE.into()),
            tags: tags.unwrap_or_default(),
        }
    }
}

/// Extract the detail record for `appid` from an appdetails body.
///
/// `Ok(None)` when Steam does not know the id (missing key, `success=false`
/// or no `data`). Errors only when the entry is present but malformed.
pub fn parse_app_details(appid: AppId, body: &Value) -> Result<Option<AppDetail>, serde_json::Error> {
    let Some(entry) = body.get(appid.to_string()) else {
        return Ok(None);
    };
    let wrapper: AppDetailsWrapper = serde_json::from_value(entry.clone())?;
    if !wrapper.success {
        return Ok(None);
    }
    let Some(data) = wrapper.data else {
        return Ok(None);
    };
    let data: AppData = serde_json::from_value(data)?;
    Ok(Some(data.into_detail(appid)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReviewsResp {
    #[serde(default)]
    pub success: i64,
    #[serde(default)]
    pub reviews: Vec<ReviewEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewEntry {
    #[serde(default)]
    pub review: String,
    #[serde(default)]
    pub voted_up: bool,
    #[serde(default)]
    pub timestamp_created: i64,
    #[serde(default)]
    pub author: ReviewAuthor,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReviewAuthor {
    #[serde(default)]
    pub playtime_forever: u64,
    #[serde(default)]
    pub playtime_last_two_weeks: u64,
    #[serde(default)]
    pub num_reviews: u64,
}

impl ReviewsResp {
    pub fn into_reviews(self, appid: AppId, max: usize) -> Vec<Review> {
        self.reviews
            .into_iter()
            .take(max)
            .map(|r| Review {
                appid,
                review: r.review,
                voted_up: r.voted_up,
                timestamp_created: r.timestamp_created,
                playtime_forever: r.author.playtime_forever,
                playtime_last_two_weeks: r.author.playtime_last_two_weeks,
                num_reviews: r.author.num_reviews,
            })
            .collect()
    }
}
