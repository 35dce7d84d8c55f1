use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::{ACCEPT, LOCATION};
use std::time::Duration;

use crate::error::{Result, SearchError};

pub const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; harvest-search/",
    env!("CARGO_PKG_VERSION"),
    "; content relevance crawler)"
);
pub const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Html(String),
    Failed(String),
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> FetchOutcome;
}

/// Fetcher backed by one pooled keep-alive client shared by every crawl.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(connect_timeout: Duration) -> Result<HttpFetcher> {
        Ok(HttpFetcher {
            client: Self::build_client(connect_timeout)?,
        })
    }

    /// Client with automatic redirects disabled; redirects are followed by
    /// [`HttpFetcher`] itself so each hop stays under the same deadline.
    pub fn build_client(connect_timeout: Duration) -> Result<reqwest::Client> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;
        Ok(client)
    }

    async fn fetch_following_redirects(&self, url: &str) -> Result<String> {
        let mut current = Url::parse(url)
            .map_err(|e| SearchError::Fetch(format!("invalid url {url}: {e}")))?;

        for _ in 0..=MAX_REDIRECTS {
            let response = self
                .client
                .get(current.clone())
                .header(ACCEPT, ACCEPT_HTML)
                .send()
                .await?;

            if response.status().is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                if let Some(location) = location {
                    current = current.join(&location).map_err(|e| {
                        SearchError::Fetch(format!("bad redirect location {location:?}: {e}"))
                    })?;
                    tracing::trace!(url = %current, "following redirect");
                    continue;
                }
            }

            return Ok(response.text().await?);
        }

        Err(SearchError::Fetch(format!(
            "too many redirects starting at {url}"
        )))
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> FetchOutcome {
        match tokio::time::timeout(timeout, self.fetch_following_redirects(url)).await {
            Ok(Ok(html)) => FetchOutcome::Html(html),
            Ok(Err(e)) => {
                tracing::debug!(url, error = %e, "page fetch failed");
                FetchOutcome::Failed(e.to_string())
            }
            Err(_) => {
                let message = format!(
                    "fetching {url} timed out after {}ms",
                    timeout.as_millis()
                );
                tracing::debug!(url, "{message}");
                FetchOutcome::Failed(message)
            }
        }
    }
}
