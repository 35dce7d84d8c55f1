use chrono::{DateTime, Utc};
use futures::StreamExt;
use nanoid::nanoid;
use std::sync::Arc;
use tracing::Instrument;

use crate::cache::SearchCache;
use crate::config::{Config, CrawlConfig};
use crate::data_models::{
    AggregateSearchResult, CrawledResult, RawResult, SearchDepth, SearchQuery, SearchResultItem,
};
use crate::error::Result;
use crate::extractor::extract;
use crate::fetcher::{FetchOutcome, HttpFetcher, PageFetcher};
use crate::metasearch::{Metasearch, SearxngClient};
use crate::scoring::{RelevanceScorer, rank};

pub struct SearchOrchestrator {
    metasearch: Arc<dyn Metasearch>,
    fetcher: Arc<dyn PageFetcher>,
    cache: Arc<SearchCache>,
    scorer: RelevanceScorer,
    crawl: CrawlConfig,
    crawl_multiplier: usize,
}

impl SearchOrchestrator {
    pub fn new(
        metasearch: Arc<dyn Metasearch>,
        fetcher: Arc<dyn PageFetcher>,
        cache: Arc<SearchCache>,
        crawl: CrawlConfig,
        crawl_multiplier: usize,
    ) -> Self {
        Self {
            metasearch,
            fetcher,
            cache,
            scorer: RelevanceScorer::default(),
            crawl,
            crawl_multiplier: crawl_multiplier.max(1),
        }
    }

    /// Wire the production components described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let fetcher = HttpFetcher::new(config.crawl.connect_timeout)?;
        let metasearch = SearxngClient::new(config.searxng.clone())?;
        let cache_client = reqwest::Client::builder().build()?;
        let cache = SearchCache::from_config(&config.cache, cache_client)?;
        Ok(Self::new(
            Arc::new(metasearch),
            Arc::new(fetcher),
            Arc::new(cache),
            config.crawl.clone(),
            config.searxng.crawl_multiplier,
        ))
    }

    pub fn with_scorer(mut self, scorer: RelevanceScorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn cache(&self) -> &Arc<SearchCache> {
        &self.cache
    }

    pub async fn search(&self, query: &SearchQuery) -> AggregateSearchResult {
        let span = tracing::info_span!(
            "search",
            request_id = %nanoid!(10),
            query = %query.query(),
            depth = %query.search_depth(),
            max_results = query.max_results(),
        );
        self.run(query).instrument(span).await
    }

    async fn run(&self, query: &SearchQuery) -> AggregateSearchResult {
        let key = SearchCache::key(query);
        if let Some(cached) = self.cache.get(&key).await {
            return cached;
        }

        let candidate_limit = query.candidate_limit(self.crawl_multiplier);
        let found = match self.metasearch.search(query, candidate_limit).await {
            Ok(found) => found,
            Err(e) => {
                tracing::error!(error = %e, "metasearch failed");
                return AggregateSearchResult::failed(query.query(), &e);
            }
        };
        tracing::debug!(
            candidates = found.general_results.len(),
            engine_total = found.total_count,
            "metasearch candidates"
        );

        let results: Vec<SearchResultItem> = match query.search_depth() {
            SearchDepth::Basic => found
                .general_results
                .into_iter()
                .take(query.max_results())
                .map(SearchResultItem::from)
                .collect(),
            SearchDepth::Advanced => {
                let crawled = self.crawl_candidates(query, found.general_results).await;
                rank(crawled, self.crawl.min_relevance_score, query.max_results())
                    .into_iter()
                    .map(SearchResultItem::from)
                    .collect()
            }
        };

        let images: Vec<String> = found
            .image_results
            .into_iter()
            .filter_map(|image| image.img_src)
            .take(query.max_results())
            .collect();

        let echo = found.query.unwrap_or_else(|| query.query().to_string());
        let result = AggregateSearchResult::new(echo, results, images);
        tracing::info!(results = result.number_of_results, "search completed");

        self.cache.set(&key, &result).await;
        result
    }

    /// Crawl every candidate with bounded concurrency. Output keeps candidate
    /// order so equal scores rank in engine order.
    async fn crawl_candidates(
        &self,
        query: &SearchQuery,
        candidates: Vec<RawResult>,
    ) -> Vec<CrawledResult> {
        let now = Utc::now();
        let total = candidates.len();
        let pages = futures::stream::iter(candidates.into_iter().enumerate())
            .map(|(idx, raw)| async move { (idx, self.crawl_page(raw, query.query(), now).await) })
            .buffer_unordered(self.crawl.concurrency.max(1));

        let mut completed: Vec<(usize, Option<CrawledResult>)> = match self.crawl.deadline {
            Some(deadline) => {
                pages
                    .take_until(tokio::time::sleep(deadline))
                    .collect()
                    .await
            }
            None => pages.collect().await,
        };
        if completed.len() < total {
            tracing::warn!(
                completed = completed.len(),
                total,
                "crawl deadline reached, continuing without stragglers"
            );
        }

        completed.sort_by_key(|(idx, _)| *idx);
        let kept: Vec<CrawledResult> = completed.into_iter().filter_map(|(_, page)| page).collect();
        tracing::debug!(kept = kept.len(), total, "crawl finished");
        kept
    }

    /// Fetch, extract, gate and score one page. `None` means the page did not
    /// pass the quality gate.
    async fn crawl_page(
        &self,
        raw: RawResult,
        query: &str,
        now: DateTime<Utc>,
    ) -> Option<CrawledResult> {
        let outcome = self.fetcher.fetch(&raw.url, self.crawl.page_timeout).await;
        let mut crawled = match outcome {
            FetchOutcome::Html(html) => {
                match extract(&html, &raw.title, query, self.crawl.max_content_chars) {
                    Ok(page) => {
                        let mut crawled = CrawledResult::new(raw, page.content);
                        if page.published_date.is_some() {
                            crawled.published_date = page.published_date;
                        }
                        crawled
                    }
                    Err(e) => {
                        tracing::warn!(url = %raw.url, error = %e, "content extraction failed");
                        CrawledResult::failed(raw, e.to_string())
                    }
                }
            }
            FetchOutcome::Failed(error) => {
                tracing::debug!(url = %raw.url, %error, "crawl failed");
                CrawledResult::failed(raw, error)
            }
        };

        if !self.scorer.is_quality_content(&crawled.extracted_content) {
            tracing::debug!(url = %crawled.raw.url, "page failed quality gate");
            return None;
        }
        crawled.relevance_score = self.scorer.score(&crawled, query, now);
        Some(crawled)
    }
}
