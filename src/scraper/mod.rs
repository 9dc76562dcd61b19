//! Scrapers fetch a batch of subscriptions, apply content filters and emit
//! one observation per subscription to the export channel.

mod browser;

pub use browser::BrowserFetcher;

use std::time::Duration;

use chrono::Utc;
use scraper::{Html, Selector};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{Observation, Subscription};
use crate::service::fingerprint;

/// Options recognized by the scraper.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// Domains requests are allowed against; empty allows any domain.
    pub allowed_domains: Vec<String>,
    /// Devtools websocket endpoint of the external browser used for
    /// subscriptions with `use_chrome`.
    pub browser_endpoint: Option<String>,
    /// Max body size read per response in bytes.
    pub max_body_size: u64,
    /// Requests per second within one batch; 0 means unlimited.
    pub requests_per_second: f64,
    /// Global request timeout.
    pub timeout: Duration,
    /// User agent sent with direct HTTP requests.
    pub user_agent: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            browser_endpoint: None,
            max_body_size: 1 << 30,
            requests_per_second: 0.0,
            timeout: Duration::from_secs(30),
            user_agent: "HTracker/1.0".to_string(),
        }
    }
}

/// A fetched response body plus whether it parses as an HTML document.
struct FetchedPage {
    body: Vec<u8>,
    is_html: bool,
}

/// Single-use scraper over one batch of subscriptions.
///
/// `start` consumes the scraper and returns once every subscription in the
/// batch has been attempted. Fetch and filter failures are logged and the
/// subscription is skipped until the next tick; no observation is emitted
/// for it.
pub struct Scraper {
    batch: Vec<Subscription>,
    config: ScraperConfig,
    client: reqwest::Client,
    out: mpsc::Sender<Observation>,
}

impl Scraper {
    pub fn new(
        batch: Vec<Subscription>,
        config: ScraperConfig,
        out: mpsc::Sender<Observation>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|err| Error::Fetch(format!("failed to build http client: {err}")))?;

        Ok(Self {
            batch,
            config,
            client,
            out,
        })
    }

    /// Scrape the batch, emitting one observation per successful fetch.
    pub async fn start(self) {
        for (i, subscription) in self.batch.iter().enumerate() {
            if i > 0 && self.config.requests_per_second > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(
                    1.0 / self.config.requests_per_second,
                ))
                .await;
            }

            if !self.domain_allowed(&subscription.url) {
                debug!(url = %subscription.url, "domain not allowed, skipping");
                continue;
            }

            match self.observe(subscription).await {
                Ok(Some(observation)) => {
                    if self.out.send(observation).await.is_err() {
                        // exporter is gone, no point scraping the rest
                        return;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(url = %subscription.url, error = %err, "scrape failed, skipping");
                }
            }
        }
    }

    async fn observe(&self, subscription: &Subscription) -> Result<Option<Observation>> {
        let page = if subscription.use_chrome {
            self.fetch_rendered(&subscription.url).await?
        } else {
            match self.fetch_http(&subscription.url).await? {
                Some(page) => page,
                None => return Ok(None),
            }
        };

        let content = filter_content(subscription, &page)?;
        Ok(Some(Observation {
            subscription: subscription.clone(),
            last_checked: Utc::now(),
            checksum: fingerprint(&content),
            content,
        }))
    }

    async fn fetch_http(&self, url: &str) -> Result<Option<FetchedPage>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status.as_u16() >= 400 {
            warn!(url, code = status.as_u16(), "got error status code");
            return Ok(None);
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains("html"));

        let mut body = response.bytes().await?.to_vec();
        if body.len() as u64 > self.config.max_body_size {
            body.truncate(self.config.max_body_size as usize);
        }

        Ok(Some(FetchedPage { body, is_html }))
    }

    async fn fetch_rendered(&self, url: &str) -> Result<FetchedPage> {
        let endpoint = self
            .config
            .browser_endpoint
            .as_deref()
            .ok_or_else(|| Error::Fetch("no browser endpoint configured".to_string()))?;

        let fetcher = BrowserFetcher::new(endpoint, self.config.timeout);
        let body = fetcher.fetch(url).await?;
        // rendered output is always a DOM serialization
        Ok(FetchedPage {
            body,
            is_html: true,
        })
    }

    fn domain_allowed(&self, url: &str) -> bool {
        if self.config.allowed_domains.is_empty() {
            return true;
        }
        let Ok(parsed) = reqwest::Url::parse(url) else {
            return false;
        };
        parsed
            .host_str()
            .is_some_and(|host| self.config.allowed_domains.iter().any(|d| d == host))
    }
}

/// Apply the subscription's filter to a fetched page.
///
/// An empty filter passes the raw body through. HTML documents get the
/// filter as a CSS selector over the concatenated text of matching nodes;
/// anything else treats the filter as a regular expression and takes the
/// first match.
fn filter_content(subscription: &Subscription, page: &FetchedPage) -> Result<Vec<u8>> {
    if subscription.filter.is_empty() {
        return Ok(page.body.clone());
    }

    if page.is_html {
        let selector = Selector::parse(&subscription.filter).map_err(|err| {
            Error::ParseConfig(format!(
                "invalid selector {:?}: {err}",
                subscription.filter
            ))
        })?;
        let document = Html::parse_document(&String::from_utf8_lossy(&page.body));
        let mut text = String::new();
        for element in document.select(&selector) {
            text.extend(element.text());
        }
        return Ok(text.into_bytes());
    }

    let regex = regex::bytes::Regex::new(&subscription.filter).map_err(|err| {
        Error::ParseConfig(format!("invalid regexp {:?}: {err}", subscription.filter))
    })?;
    Ok(regex
        .find(&page.body)
        .map(|m| m.as_bytes().to_vec())
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::Html as HtmlResponse;
    use axum::routing::get;
    use axum::Router;
    use std::net::SocketAddr;

    const PAGE: &str = r#"<html><body>
        <h1 class="headline">Breaking</h1>
        <p>ignore me</p>
        <h1 class="headline">News</h1>
    </body></html>"#;

    async fn spawn_site() -> SocketAddr {
        let app = Router::new()
            .route("/", get(|| async { HtmlResponse(PAGE) }))
            .route("/plain", get(|| async { "numbers 123 end" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn scrape_one(subscription: Subscription) -> Option<Observation> {
        let (tx, mut rx) = mpsc::channel(4);
        Scraper::new(vec![subscription], ScraperConfig::default(), tx)
            .unwrap()
            .start()
            .await;
        rx.recv().await
    }

    #[tokio::test]
    async fn empty_filter_takes_raw_body() {
        let addr = spawn_site().await;
        let mut sub = Subscription::new(format!("http://{addr}/plain"));
        sub.filter = String::new();

        let obs = scrape_one(sub).await.expect("observation expected");
        assert_eq!(obs.content, b"numbers 123 end");
        assert_eq!(obs.checksum, fingerprint(b"numbers 123 end"));
    }

    #[tokio::test]
    async fn css_selector_extracts_text_of_matching_nodes() {
        let addr = spawn_site().await;
        let mut sub = Subscription::new(format!("http://{addr}/"));
        sub.filter = ".headline".to_string();
        sub.content_type = "html".to_string();

        let obs = scrape_one(sub).await.expect("observation expected");
        assert_eq!(obs.content, b"BreakingNews");
    }

    #[tokio::test]
    async fn regexp_filter_takes_first_match() {
        let addr = spawn_site().await;
        let mut sub = Subscription::new(format!("http://{addr}/plain"));
        sub.filter = r"\d+".to_string();

        let obs = scrape_one(sub).await.expect("observation expected");
        assert_eq!(obs.content, b"123");
    }

    #[tokio::test]
    async fn regexp_without_match_yields_empty_content() {
        let addr = spawn_site().await;
        let mut sub = Subscription::new(format!("http://{addr}/plain"));
        sub.filter = "nosuchthing".to_string();

        let obs = scrape_one(sub).await.expect("observation expected");
        assert!(obs.content.is_empty());
    }

    #[tokio::test]
    async fn bad_regexp_is_skipped() {
        let addr = spawn_site().await;
        let mut sub = Subscription::new(format!("http://{addr}/plain"));
        sub.filter = "[unclosed".to_string();

        assert!(scrape_one(sub).await.is_none());
    }

    #[tokio::test]
    async fn error_status_is_skipped() {
        let addr = spawn_site().await;
        let sub = Subscription::new(format!("http://{addr}/missing"));
        assert!(scrape_one(sub).await.is_none());
    }

    #[tokio::test]
    async fn disallowed_domain_is_skipped() {
        let addr = spawn_site().await;
        let sub = Subscription::new(format!("http://{addr}/plain"));

        let (tx, mut rx) = mpsc::channel(4);
        let config = ScraperConfig {
            allowed_domains: vec!["example.org".to_string()],
            ..Default::default()
        };
        Scraper::new(vec![sub], config, tx).unwrap().start().await;
        assert!(rx.recv().await.is_none());
    }
}
