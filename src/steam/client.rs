use super::models::{parse_app_details, AppListResp, ReviewsResp};
use super::{CatalogApi, DetailFetch};
use crate::config::{Endpoints, HarvestConfig, MAX_REVIEWS_PER_PAGE};
use crate::records::{AppDetail, AppId, CatalogEntry, Review};
use crate::retry::{AttemptError, RetryOutcome, RetryPolicy};
use crate::throttle::RequestThrottle;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// HTTP access to the public Steam store and web API.
///
/// Every request, including retries, first takes a token from the shared
/// throttle.
pub struct SteamClient {
    http: Client,
    endpoints: Endpoints,
    reviews_base: Url,
    throttle: RequestThrottle,
    retry: RetryPolicy,
}

impl SteamClient {
    pub fn new(cfg: &HarvestConfig, throttle: RequestThrottle) -> Result<Self> {
        Self::with_builder(cfg, throttle, Client::builder())
    }

    fn with_builder(
        cfg: &HarvestConfig,
        throttle: RequestThrottle,
        builder: reqwest::ClientBuilder,
    ) -> Result<Self> {
        let http = builder
            .timeout(cfg.http_timeout)
            .user_agent(concat!("steam-harvest/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build http client")?;
        let reviews_base = Url::parse(&cfg.endpoints.reviews)
            .with_context(|| format!("invalid reviews endpoint {}", cfg.endpoints.reviews))?;
        if reviews_base.cannot_be_a_base() {
            return Err(anyhow!(
                "reviews endpoint {} cannot take a path segment",
                cfg.endpoints.reviews
            ));
        }
        Ok(Self {
            http,
            endpoints: cfg.endpoints.clone(),
            reviews_base,
            throttle,
            retry: cfg.retry.clone(),
        })
    }

    fn reviews_url(&self, appid: AppId) -> Url {
        let mut url = self.reviews_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&appid.to_string());
        }
        url
    }

    /// One throttled GET, classified for the retry policy.
    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, AttemptError> {
        self.throttle.wait().await;
        let resp = self
            .http
            .get(url)
            .header(header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await?;
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(AttemptError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(AttemptError::Status(status.as_u16()));
        }
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn details_once(&self, appid: AppId) -> Result<Option<AppDetail>, AttemptError> {
        let query = [
            ("appids", appid.to_string()),
            ("l", self.endpoints.language.clone()),
        ];
        let body = self.get_json(&self.endpoints.app_details, &query).await?;
        Ok(parse_app_details(appid, &body)?)
    }

    async fn reviews_once(&self, appid: AppId, max: u32) -> Result<Vec<Review>> {
        let per_page = max.clamp(1, MAX_REVIEWS_PER_PAGE);
        let url = self.reviews_url(appid);
        let query = [
            ("json", "1".to_string()),
            ("num_per_page", per_page.to_string()),
            ("filter", "recent".to_string()),
            ("language", "all".to_string()),
        ];
        let body = self
            .get_json(url.as_str(), &query)
            .await
            .map_err(|e| anyhow!("reviews request failed: {e}"))?;
        let resp: ReviewsResp =
            serde_json::from_value(body).context("failed to decode reviews body")?;
        if resp.success != 1 {
            debug!(appid, success = resp.success, "reviews endpoint reported no success");
        }
        Ok(resp.into_reviews(appid, per_page as usize))
    }
}

#[async_trait]
impl CatalogApi for SteamClient {
    async fn app_list(&self) -> Result<Vec<CatalogEntry>> {
        let url = &self.endpoints.app_list;
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(key) = &self.endpoints.api_key {
            query.push(("key", key.clone()));
        }
        self.throttle.wait().await;
        let resp = self
            .http
            .get(url)
            .query(&query)
            .send()
            .await
            .context("app list request failed")?
            .error_for_status()
            .context("app list request rejected")?;
        let body: AppListResp = resp.json().await.context("failed to decode app list")?;
        let catalog: Vec<CatalogEntry> = body.into();
        info!(apps = catalog.len(), "fetched steam app list");
        Ok(catalog)
    }

    async fn app_details(&self, appid: AppId) -> DetailFetch {
        let outcome = self
            .retry
            .run(move |attempt| {
                debug!(appid, attempt, "fetching app details");
                self.details_once(appid)
            })
            .await;
        match outcome {
            RetryOutcome::Done(Some(detail)) => DetailFetch::Found(detail),
            RetryOutcome::Done(None) => DetailFetch::Unresolvable,
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                warn!(
                    appid,
                    attempts,
                    rate_limited = last_error.is_rate_limited(),
                    error = %last_error,
                    "app details retries exhausted"
                );
                DetailFetch::Exhausted {
                    attempts,
                    last_error,
                }
            }
        }
    }

    async fn app_reviews(&self, appid: AppId, max: u32) -> Vec<Review> {
        match self.reviews_once(appid, max).await {
            Ok(reviews) => reviews,
            Err(err) => {
                warn!(appid, error = %err, "review fetch failed; continuing without reviews");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::RateLimitSettings;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn reply(status: &str, headers: &[(&str, &str)], body: &str) -> String {
        let mut out = format!("HTTP/1.1 {status}\r\n");
        for (name, value) in headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str("Content-Type: application/json\r\n");
        out.push_str(&format!("Content-Length: {}\r\nConnection: close\r\n\r\n", body.len()));
        out.push_str(body);
        out
    }

    /// Serve the canned replies, one connection each, and count requests.
    async fn serve(replies: Vec<String>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            for reply in replies {
                let Ok((mut sock, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut request = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    let n = sock.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&chunk[..n]);
                    if request.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let _ = sock.write_all(reply.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });
        (format!("http://{addr}"), hits)
    }

    fn local_client(base: &str) -> SteamClient {
        let mut cfg = HarvestConfig::default();
        cfg.endpoints.app_list = format!("{base}/ISteamApps/GetAppList/v2/");
        cfg.endpoints.app_details = format!("{base}/api/appdetails");
        cfg.endpoints.reviews = format!("{base}/appreviews");
        cfg.http_timeout = Duration::from_secs(5);
        cfg.retry.rate_limit_pause = Duration::from_millis(200);
        cfg.retry.backoff_base = Duration::from_millis(10);
        let throttle = RequestThrottle::new(RateLimitSettings {
            requests_per_second: 100,
            burst: 10,
        });
        SteamClient::with_builder(&cfg, throttle, Client::builder().no_proxy()).unwrap()
    }

    #[tokio::test]
    async fn too_many_requests_honours_retry_after_then_succeeds() {
        let (base, hits) = serve(vec![
            reply("429 Too Many Requests", &[("Retry-After", "1")], ""),
            reply(
                "200 OK",
                &[],
                r#"{"570":{"success":true,"data":{"name":"Dota 2","developers":["Valve"]}}}"#,
            ),
        ])
        .await;
        let client = local_client(&base);

        let started = Instant::now();
        let fetched = client.app_details(570).await;
        let elapsed = started.elapsed();

        match fetched {
            DetailFetch::Found(detail) => {
                assert_eq!(detail.name, "Dota 2");
                assert_eq!(detail.developer, "Valve");
            }
            other => panic!("expected Found, got {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(
            elapsed >= Duration::from_secs(1),
            "Retry-After should outlast the shorter pause, waited {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn unsuccessful_details_are_unresolvable() {
        let (base, hits) = serve(vec![reply("200 OK", &[], r#"{"7":{"success":false}}"#)]).await;
        let client = local_client(&base);

        assert!(matches!(
            client.app_details(7).await,
            DetailFetch::Unresolvable
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_errors_exhaust_detail_attempts() {
        let (base, hits) = serve(vec![
            reply("503 Service Unavailable", &[], ""),
            reply("503 Service Unavailable", &[], ""),
        ])
        .await;
        let client = local_client(&base);

        match client.app_details(9).await {
            DetailFetch::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 2);
                assert!(matches!(last_error, AttemptError::Status(503)));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn app_list_rejects_non_success_status() {
        let (base, _) = serve(vec![reply("503 Service Unavailable", &[], "")]).await;
        let client = local_client(&base);

        let err = client.app_list().await.unwrap_err();
        assert!(format!("{err:#}").contains("503"), "{err:#}");
    }

    #[tokio::test]
    async fn app_list_decodes_catalog() {
        let (base, _) = serve(vec![reply(
            "200 OK",
            &[],
            r#"{"applist":{"apps":[{"appid":10,"name":"Counter-Strike"},{"appid":20,"name":"Team Fortress Classic"}]}}"#,
        )])
        .await;
        let client = local_client(&base);

        let catalog = client.app_list().await.unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[1].appid, 20);
    }

    fn client_with(reviews: &str) -> Result<SteamClient> {
        let mut cfg = HarvestConfig::default();
        cfg.endpoints.reviews = reviews.into();
        SteamClient::new(&cfg, RequestThrottle::new(RateLimitSettings::default()))
    }

    #[test]
    fn reviews_url_appends_appid_segment() {
        let client = client_with("https://store.steampowered.com/appreviews").unwrap();
        assert_eq!(
            client.reviews_url(570).as_str(),
            "https://store.steampowered.com/appreviews/570"
        );

        let client = client_with("http://localhost:8080/appreviews/").unwrap();
        assert_eq!(
            client.reviews_url(10).as_str(),
            "http://localhost:8080/appreviews/10"
        );
    }

    #[test]
    fn rejects_non_base_reviews_endpoint() {
        assert!(client_with("mailto:someone@example.com").is_err());
        assert!(client_with("not a url").is_err());
    }
}
