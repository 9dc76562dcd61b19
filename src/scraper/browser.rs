//! Rendered fetches through an external Chrome instance.

use std::time::Duration;

use chromiumoxide::Browser;
use futures::StreamExt;
use tracing::debug;

use crate::error::{Error, Result};

/// Fetches pages through the devtools protocol of an already running
/// browser, waiting for the DOM to settle before taking the content.
pub struct BrowserFetcher {
    endpoint: String,
    timeout: Duration,
}

impl BrowserFetcher {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }

    /// Render `url` and return the serialized DOM.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let ws_url = self.resolve_ws_url().await?;
        debug!(%ws_url, "connecting to browser");

        let (browser, mut handler) = Browser::connect(&ws_url)
            .await
            .map_err(|err| Error::Fetch(format!("browser connect failed: {err}")))?;

        let driver = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let result = self.render(&browser, url).await;

        drop(browser);
        driver.abort();
        result
    }

    async fn render(&self, browser: &Browser, url: &str) -> Result<Vec<u8>> {
        let page = browser
            .new_page(url)
            .await
            .map_err(|err| Error::Fetch(format!("browser navigation failed: {err}")))?;

        // wait_for_navigation resolves once the page settled after the JS ran
        match tokio::time::timeout(self.timeout, page.wait_for_navigation()).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => debug!(url, error = %err, "navigation wait failed"),
            Err(_) => debug!(url, "timed out waiting for page to settle"),
        }

        let html = page
            .content()
            .await
            .map_err(|err| Error::Fetch(format!("reading rendered content failed: {err}")))?;
        Ok(html.into_bytes())
    }

    /// Resolve the websocket debugger URL of the configured endpoint.
    ///
    /// Browser runners expose their session URL on `/json/version`; an
    /// endpoint that does not answer there is assumed to already be a
    /// debugger URL.
    async fn resolve_ws_url(&self) -> Result<String> {
        let http_url = self
            .endpoint
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let client = reqwest::Client::new();
        let version: std::result::Result<serde_json::Value, reqwest::Error> = async {
            client
                .get(&version_url)
                .timeout(Duration::from_secs(5))
                .send()
                .await?
                .json()
                .await
        }
        .await;

        match version {
            Ok(value) => value
                .get("webSocketDebuggerUrl")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| {
                    Error::Fetch(format!("no webSocketDebuggerUrl at {version_url}"))
                }),
            Err(err) => {
                debug!(endpoint = %self.endpoint, error = %err, "version probe failed, using endpoint directly");
                Ok(self.endpoint.clone())
            }
        }
    }
}
