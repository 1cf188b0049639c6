//! Run configuration, loaded once and handed to the harvester.
use crate::retry::RetryPolicy;
use crate::throttle::RateLimitSettings;
use crate::util::env::{env_flag, env_opt, env_parse, env_parse_opt};
use anyhow::{bail, Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_APP_LIST_URL: &str = "https://api.steampowered.com/ISteamApps/GetAppList/v2/";
pub const DEFAULT_APP_DETAILS_URL: &str = "https://store.steampowered.com/api/appdetails";
pub const DEFAULT_REVIEWS_URL: &str = "https://store.steampowered.com/appreviews";

/// Steam serves at most this many reviews per page.
pub const MAX_REVIEWS_PER_PAGE: u32 = 100;

#[derive(Clone)]
pub struct Endpoints {
    pub app_list: String,
    pub app_details: String,
    pub reviews: String,
    pub api_key: Option<String>,
    pub language: String,
}

impl fmt::Debug for Endpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoints")
            .field("app_list", &self.app_list)
            .field("app_details", &self.app_details)
            .field("reviews", &self.reviews)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("language", &self.language)
            .finish()
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            app_list: DEFAULT_APP_LIST_URL.into(),
            app_details: DEFAULT_APP_DETAILS_URL.into(),
            reviews: DEFAULT_REVIEWS_URL.into(),
            api_key: None,
            language: "english".into(),
        }
    }
}

/// How review rows are written when an app's reviews are stored again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ReviewPolicy {
    /// Every fetch appends rows; a re-run can duplicate an app's reviews.
    #[default]
    Append,
    /// The app's stored reviews are replaced by the latest page.
    ReplacePerApp,
}

impl FromStr for ReviewPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(ReviewPolicy::Append),
            "replace" | "replace-per-app" | "replace_per_app" => Ok(ReviewPolicy::ReplacePerApp),
            other => bail!("unknown review policy {other:?} (expected append|replace)"),
        }
    }
}

impl fmt::Display for ReviewPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewPolicy::Append => write!(f, "append"),
            ReviewPolicy::ReplacePerApp => write!(f, "replace"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkConfig {
    Csv { output_dir: PathBuf },
    Sqlite { path: PathBuf },
}

impl SinkConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            SinkConfig::Csv { .. } => "csv",
            SinkConfig::Sqlite { .. } => "sqlite",
        }
    }

    /// Build from a kind name, keeping the default location for that kind.
    pub fn from_kind(kind: &str) -> Result<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(SinkConfig::Csv {
                output_dir: env_opt("HARVEST_OUTPUT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("data/raw")),
            }),
            "sqlite" | "db" => Ok(SinkConfig::Sqlite {
                path: env_opt("HARVEST_SQLITE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("data/steam.db")),
            }),
            other => bail!("unknown sink {other:?} (expected csv|sqlite)"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReviewSettings {
    pub enabled: bool,
    pub max_per_app: u32,
    pub policy: ReviewPolicy,
}

impl Default for ReviewSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_per_app: MAX_REVIEWS_PER_PAGE,
            policy: ReviewPolicy::Append,
        }
    }
}

#[derive(Clone, Debug)]
pub struct HarvestConfig {
    pub endpoints: Endpoints,
    pub rate_limit: RateLimitSettings,
    pub retry: RetryPolicy,
    pub http_timeout: Duration,
    pub workers: usize,
    pub batch_flush: usize,
    pub sample: Option<usize>,
    pub reviews: ReviewSettings,
    pub state_dir: PathBuf,
    pub sink: SinkConfig,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            rate_limit: RateLimitSettings::default(),
            retry: RetryPolicy::default(),
            http_timeout: Duration::from_secs(30),
            workers: 5,
            batch_flush: 10,
            sample: None,
            reviews: ReviewSettings::default(),
            state_dir: PathBuf::from("data/state"),
            sink: SinkConfig::Csv {
                output_dir: PathBuf::from("data/raw"),
            },
        }
    }
}

/// Env keys shown in the startup snapshot.
pub const SNAPSHOT_KEYS: &[&str] = &[
    "STEAM_APP_LIST_URL",
    "STEAM_APP_DETAILS_URL",
    "STEAM_REVIEWS_URL",
    "STEAM_API_KEY",
    "STEAM_LANGUAGE",
    "HARVEST_RPS",
    "HARVEST_BURST",
    "HARVEST_WORKERS",
    "HARVEST_BATCH_FLUSH",
    "HARVEST_SAMPLE",
    "HARVEST_MAX_ATTEMPTS",
    "HARVEST_REVIEWS",
    "HARVEST_REVIEW_POLICY",
    "HARVEST_STATE_DIR",
    "HARVEST_SINK",
    "HARVEST_LOG_STYLE",
];

impl HarvestConfig {
    pub fn from_env() -> Result<Self> {
        let d = HarvestConfig::default();

        let endpoints = Endpoints {
            app_list: env_url("STEAM_APP_LIST_URL", d.endpoints.app_list)?,
            app_details: env_url("STEAM_APP_DETAILS_URL", d.endpoints.app_details)?,
            reviews: env_url("STEAM_REVIEWS_URL", d.endpoints.reviews)?,
            api_key: env_opt("STEAM_API_KEY"),
            language: env_opt("STEAM_LANGUAGE").unwrap_or(d.endpoints.language),
        };
        let rate_limit = RateLimitSettings {
            requests_per_second: env_parse("HARVEST_RPS", d.rate_limit.requests_per_second),
            burst: env_parse("HARVEST_BURST", d.rate_limit.burst),
        };
        let retry = RetryPolicy {
            max_attempts: env_parse("HARVEST_MAX_ATTEMPTS", d.retry.max_attempts),
            backoff_base: Duration::from_secs(env_parse(
                "HARVEST_BACKOFF_BASE_SECS",
                d.retry.backoff_base.as_secs(),
            )),
            rate_limit_pause: Duration::from_secs(env_parse(
                "HARVEST_RATE_LIMIT_PAUSE_SECS",
                d.retry.rate_limit_pause.as_secs(),
            )),
        };
        let reviews = ReviewSettings {
            enabled: env_flag("HARVEST_REVIEWS", d.reviews.enabled),
            max_per_app: env_parse("HARVEST_MAX_REVIEWS", d.reviews.max_per_app),
            policy: match env_opt("HARVEST_REVIEW_POLICY") {
                Some(raw) => raw.parse().context("HARVEST_REVIEW_POLICY")?,
                None => d.reviews.policy,
            },
        };
        let sink = match env_opt("HARVEST_SINK") {
            Some(kind) => SinkConfig::from_kind(&kind).context("HARVEST_SINK")?,
            None => SinkConfig::from_kind(d.sink.kind())?,
        };

        let cfg = HarvestConfig {
            endpoints,
            rate_limit,
            retry,
            http_timeout: Duration::from_secs(env_parse(
                "HARVEST_HTTP_TIMEOUT_SECS",
                d.http_timeout.as_secs(),
            )),
            workers: env_parse("HARVEST_WORKERS", d.workers),
            batch_flush: env_parse("HARVEST_BATCH_FLUSH", d.batch_flush),
            sample: env_parse_opt("HARVEST_SAMPLE"),
            reviews,
            state_dir: env_opt("HARVEST_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.state_dir),
            sink,
        };
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        for (label, raw) in [
            ("app list", &self.endpoints.app_list),
            ("app details", &self.endpoints.app_details),
            ("reviews", &self.endpoints.reviews),
        ] {
            Url::parse(raw).with_context(|| format!("{label} endpoint {raw:?} is not a valid url"))?;
        }
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.batch_flush == 0 {
            bail!("batch flush interval must be at least 1");
        }
        if self.rate_limit.requests_per_second == 0 || self.rate_limit.burst == 0 {
            bail!("rate limit and burst must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            bail!("max attempts must be at least 1");
        }
        if self.reviews.max_per_app == 0 || self.reviews.max_per_app > MAX_REVIEWS_PER_PAGE {
            bail!(
                "max reviews per app must be within 1..={}",
                MAX_REVIEWS_PER_PAGE
            );
        }
        if self.reviews.policy == ReviewPolicy::ReplacePerApp
            && matches!(self.sink, SinkConfig::Csv { .. })
        {
            bail!("review policy 'replace' needs the sqlite sink; csv files are append-only");
        }
        Ok(())
    }

    pub fn completed_path(&self) -> PathBuf {
        self.state_dir.join("completed_apps.txt")
    }

    pub fn failed_path(&self) -> PathBuf {
        self.state_dir.join("failed_apps.txt")
    }

    pub fn with_state_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.state_dir = dir.as_ref().to_path_buf();
        self
    }
}

fn env_url(key: &str, default: String) -> Result<String> {
    match env_opt(key) {
        Some(raw) => {
            Url::parse(&raw).with_context(|| format!("{key} is not a valid url"))?;
            Ok(raw)
        }
        None => Ok(default),
    }
}
