use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::Value;

use crate::config::SearxngConfig;
use crate::data_models::{RawResult, SearchQuery};
use crate::error::{Result, SearchError};
use crate::extractor::parse_date;
use crate::fetcher::USER_AGENT;

pub const RESULTS_PER_PAGE: usize = 10;
pub const CATEGORIES: &str = "general,images";
const BODY_PREVIEW_CHARS: usize = 200;

/// Engine output split into web and image results, already domain filtered
/// and truncated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetasearchResults {
    /// Query as echoed by the engine, when it sends one back.
    pub query: Option<String>,
    pub general_results: Vec<RawResult>,
    /// Image results; `img_src` is always an absolute URL.
    pub image_results: Vec<RawResult>,
    pub total_count: usize,
}

#[async_trait]
pub trait Metasearch: Send + Sync {
    /// Fetch up to `candidate_limit` general results for `query`.
    async fn search(&self, query: &SearchQuery, candidate_limit: usize) -> Result<MetasearchResults>;
}

#[derive(Debug, Deserialize)]
struct SearxngResult {
    title: Option<String>,
    url: Option<String>,
    content: Option<String>,
    img_src: Option<String>,
    #[serde(rename = "publishedDate")]
    published_date: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SearxngClient {
    client: reqwest::Client,
    config: SearxngConfig,
}

impl SearxngClient {
    pub fn new(config: SearxngConfig) -> Result<SearxngClient> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: SearxngConfig) -> SearxngClient {
        SearxngClient { client, config }
    }

    pub fn config(&self) -> &SearxngConfig {
        &self.config
    }

    pub fn build_url(&self, query: &SearchQuery) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/search", self.config.api_url))
            .map_err(|e| SearchError::Config(format!("invalid SEARXNG_API_URL: {e}")))?;
        let pageno = query.max_results().div_ceil(RESULTS_PER_PAGE).max(1);
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("q", query.query())
                .append_pair("format", "json")
                .append_pair("categories", CATEGORIES);
            if let Some(range) = &self.config.time_range {
                pairs.append_pair("time_range", range);
            }
            pairs
                .append_pair("safesearch", &self.config.safesearch)
                .append_pair("engines", &self.config.engines)
                .append_pair("pageno", &pageno.to_string());
        }
        Ok(url)
    }

    /// GET with linear backoff. Every failure is retried: transport errors,
    /// non-success statuses and bodies that do not parse as JSON.
    async fn fetch_json_with_retry(&self, url: &Url) -> Result<Value> {
        let attempts = self.config.retries.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.fetch_json(url).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(attempt, attempts, error = %e, "metasearch request failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_backoff * attempt).await;
                    }
                }
            }
        }
        let reason = match last_error {
            Some(SearchError::Metasearch(message)) => message,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        Err(SearchError::Metasearch(format!(
            "{reason} (after {attempts} attempts)"
        )))
    }

    /// One attempt. The body is parsed whatever the `Content-Type` says.
    async fn fetch_json(&self, url: &Url) -> Result<Value> {
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(SearchError::Metasearch(format!(
                "status {status}: {}",
                preview(&body)
            )));
        }
        serde_json::from_str(&body).map_err(|e| {
            SearchError::InvalidResponse(format!(
                "non-JSON response ({e}, status {status}): {}",
                preview(&body)
            ))
        })
    }

    fn absolute_image_url(&self, img_src: &str) -> String {
        if img_src.starts_with("http") {
            img_src.to_string()
        } else if let Some(rest) = img_src.strip_prefix("//") {
            format!("https://{rest}")
        } else {
            format!("{}{}", self.config.api_url, img_src)
        }
    }

    fn parse_response(
        &self,
        value: Value,
        query: &SearchQuery,
        candidate_limit: usize,
    ) -> Result<MetasearchResults> {
        let Some(items) = value.get("results").and_then(Value::as_array) else {
            return Err(SearchError::InvalidResponse(
                "response has no `results` array".into(),
            ));
        };

        let mut general = Vec::new();
        let mut images = Vec::new();
        for item in items {
            let entry: SearxngResult = match serde_json::from_value(item.clone()) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping malformed metasearch entry");
                    continue;
                }
            };
            let img_src = entry.img_src.filter(|s| !s.trim().is_empty());
            let result = RawResult {
                title: entry.title.unwrap_or_default(),
                url: entry.url.unwrap_or_default(),
                content: entry.content.unwrap_or_default(),
                published_date: entry.published_date.as_deref().and_then(parse_date),
                img_src: img_src.as_deref().map(|src| self.absolute_image_url(src)),
            };
            if result.is_image() {
                images.push(result);
            } else if Url::parse(&result.url).is_ok() {
                general.push(result);
            } else {
                tracing::debug!(url = %result.url, "skipping result with invalid url");
            }
        }

        let mut general =
            filter_by_domain(general, query.include_domains(), query.exclude_domains());
        general.truncate(candidate_limit);
        images.truncate(query.max_results());

        let total_count = value
            .get("number_of_results")
            .and_then(Value::as_f64)
            .map(|n| n as usize)
            .filter(|n| *n > 0)
            .unwrap_or(general.len());

        Ok(MetasearchResults {
            query: value
                .get("query")
                .and_then(Value::as_str)
                .filter(|q| !q.is_empty())
                .map(str::to_string),
            general_results: general,
            image_results: images,
            total_count,
        })
    }
}

#[async_trait]
impl Metasearch for SearxngClient {
    async fn search(&self, query: &SearchQuery, candidate_limit: usize) -> Result<MetasearchResults> {
        let url = self.build_url(query)?;
        tracing::debug!(%url, "querying metasearch engine");
        let value = self.fetch_json_with_retry(&url).await?;
        let results = self.parse_response(value, query, candidate_limit)?;
        tracing::debug!(
            general = results.general_results.len(),
            images = results.image_results.len(),
            "metasearch returned results"
        );
        Ok(results)
    }
}

/// Hostname substring filtering. A non-empty include list keeps only matching
/// hosts; the exclude list always removes matches. Substring semantics mean
/// `a.com` also matches `notactuallya.com`.
pub fn filter_by_domain(
    results: Vec<RawResult>,
    include: &[String],
    exclude: &[String],
) -> Vec<RawResult> {
    if include.is_empty() && exclude.is_empty() {
        return results;
    }
    results
        .into_iter()
        .filter(|result| {
            let Some(host) = Url::parse(&result.url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_lowercase))
            else {
                return false;
            };
            let included = include.is_empty() || include.iter().any(|d| host.contains(d.as_str()));
            let excluded = exclude.iter().any(|d| host.contains(d.as_str()));
            included && !excluded
        })
        .collect()
}

fn preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_CHARS).collect()
}
