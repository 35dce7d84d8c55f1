use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    #[default]
    Basic,
    Advanced,
}

impl SearchDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchDepth::Basic => "basic",
            SearchDepth::Advanced => "advanced",
        }
    }
}

impl fmt::Display for SearchDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchDepth {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "basic" => Ok(SearchDepth::Basic),
            "advanced" => Ok(SearchDepth::Advanced),
            other => Err(SearchError::InvalidQuery(format!(
                "unknown search depth: {other}"
            ))),
        }
    }
}

/// A validated search request. Fields are private so a query cannot change
/// once it has entered the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    query: String,
    max_results: usize,
    search_depth: SearchDepth,
    include_domains: Vec<String>,
    exclude_domains: Vec<String>,
}

impl SearchQuery {
    pub fn new(
        query: impl Into<String>,
        max_results: usize,
        search_depth: SearchDepth,
        include_domains: Vec<String>,
        exclude_domains: Vec<String>,
    ) -> Result<SearchQuery> {
        let query = query.into().trim().to_string();
        if query.is_empty() {
            return Err(SearchError::InvalidQuery("query cannot be empty".into()));
        }
        if max_results == 0 {
            return Err(SearchError::InvalidQuery(
                "max_results must be greater than 0".into(),
            ));
        }
        Ok(SearchQuery {
            query,
            max_results,
            search_depth,
            include_domains: normalize_domains(include_domains),
            exclude_domains: normalize_domains(exclude_domains),
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    pub fn search_depth(&self) -> SearchDepth {
        self.search_depth
    }

    pub fn include_domains(&self) -> &[String] {
        &self.include_domains
    }

    pub fn exclude_domains(&self) -> &[String] {
        &self.exclude_domains
    }

    /// Number of general results to pull from the engine: advanced searches
    /// over-fetch so quality and score filtering still leave enough results.
    pub fn candidate_limit(&self, crawl_multiplier: usize) -> usize {
        match self.search_depth {
            SearchDepth::Basic => self.max_results,
            SearchDepth::Advanced => self.max_results * crawl_multiplier.max(1),
        }
    }
}

fn normalize_domains(domains: Vec<String>) -> Vec<String> {
    domains
        .into_iter()
        .map(|d| d.trim().to_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}

/// An entry as returned by the metasearch engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RawResult {
    pub title: String,
    pub url: String,
    pub content: String,
    pub img_src: Option<String>,
    pub published_date: Option<DateTime<Utc>>,
}

impl RawResult {
    pub fn is_image(&self) -> bool {
        self.img_src.is_some()
    }
}

/// A raw result after its page went through fetch, extraction and scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawledResult {
    pub raw: RawResult,
    pub extracted_content: String,
    pub relevance_score: f64,
    pub published_date: Option<DateTime<Utc>>,
    pub crawl_error: Option<String>,
}

impl CrawledResult {
    pub fn new(raw: RawResult, extracted_content: String) -> CrawledResult {
        let published_date = raw.published_date;
        CrawledResult {
            raw,
            extracted_content,
            relevance_score: 0.0,
            published_date,
            crawl_error: None,
        }
    }

    /// Degraded result for a page that could not be crawled: the engine
    /// snippet is kept and the error marker appended so the quality gate
    /// recognises it.
    pub fn failed(raw: RawResult, error: impl Into<String>) -> CrawledResult {
        let content = if raw.content.trim().is_empty() {
            CRAWL_ERROR_MARKER.to_string()
        } else {
            format!("{}\n\n{}", raw.content, CRAWL_ERROR_MARKER)
        };
        let mut result = CrawledResult::new(raw, content);
        result.crawl_error = Some(error.into());
        result
    }
}

/// Appended to the content of pages whose crawl failed.
pub const CRAWL_ERROR_MARKER: &str = "Content unavailable due to crawling error.";

/// One entry of the public response.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchResultItem {
    pub title: String,
    pub url: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<DateTime<Utc>>,
}

impl From<RawResult> for SearchResultItem {
    fn from(raw: RawResult) -> Self {
        SearchResultItem {
            title: raw.title,
            url: raw.url,
            content: raw.content,
            score: None,
            published_date: raw.published_date,
        }
    }
}

impl From<CrawledResult> for SearchResultItem {
    fn from(crawled: CrawledResult) -> Self {
        SearchResultItem {
            title: crawled.raw.title,
            url: crawled.raw.url,
            content: crawled.extracted_content,
            score: Some(crawled.relevance_score),
            published_date: crawled.published_date,
        }
    }
}

/// Final payload of a search, also the cached value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AggregateSearchResult {
    pub results: Vec<SearchResultItem>,
    pub query: String,
    pub images: Vec<String>,
    pub number_of_results: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AggregateSearchResult {
    pub fn new(query: String, results: Vec<SearchResultItem>, images: Vec<String>) -> Self {
        let number_of_results = results.len();
        AggregateSearchResult {
            results,
            query,
            images,
            number_of_results,
            message: None,
            error: None,
        }
    }

    /// Error-shaped result: same fields as an empty success plus `message` and `error`.
    pub fn failed(query: impl Into<String>, error: &SearchError) -> Self {
        AggregateSearchResult {
            results: Vec::new(),
            query: query.into(),
            images: Vec::new(),
            number_of_results: 0,
            message: Some("Internal Server Error".to_string()),
            error: Some(error.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
