use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tower::ServiceExt;

use harvest_search::api::{AppState, create_router};
use harvest_search::cache::SearchCache;
use harvest_search::config::{CrawlConfig, SearxngConfig};
use harvest_search::data_models::{RawResult, SearchDepth, SearchQuery};
use harvest_search::error::{Result, SearchError};
use harvest_search::fetcher::{FetchOutcome, PageFetcher};
use harvest_search::metasearch::{Metasearch, MetasearchResults};
use harvest_search::orchestrator::SearchOrchestrator;

mod test_helpers {
    use super::*;

    pub struct StaticMetasearch {
        pub fail: bool,
    }

    #[async_trait]
    impl Metasearch for StaticMetasearch {
        async fn search(
            &self,
            query: &SearchQuery,
            candidate_limit: usize,
        ) -> Result<MetasearchResults> {
            if self.fail {
                return Err(SearchError::Metasearch("engine unreachable".into()));
            }
            let general_results = (0..candidate_limit.min(12))
                .map(|i| RawResult {
                    title: format!("{} {i}", query.query()),
                    url: format!("https://site{i}.example/"),
                    content: format!("snippet {i}"),
                    img_src: None,
                    published_date: None,
                })
                .collect();
            Ok(MetasearchResults {
                query: None,
                general_results,
                image_results: vec![RawResult {
                    title: "img".into(),
                    url: "https://img.example/".into(),
                    content: String::new(),
                    img_src: Some("https://img.example/1.png".into()),
                    published_date: None,
                }],
                total_count: 12,
            })
        }
    }

    #[derive(Default)]
    pub struct NoPages {
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl PageFetcher for NoPages {
        async fn fetch(&self, url: &str, _timeout: Duration) -> FetchOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            FetchOutcome::Failed(format!("offline: {url}"))
        }
    }

    pub fn app_with(fail: bool, default_depth: SearchDepth) -> (axum::Router, Arc<NoPages>) {
        let pages = Arc::new(NoPages::default());
        let orchestrator = SearchOrchestrator::new(
            Arc::new(StaticMetasearch { fail }),
            pages.clone(),
            Arc::new(SearchCache::disabled()),
            CrawlConfig::default(),
            4,
        );
        let mut searxng = SearxngConfig::new("http://searx.local");
        searxng.max_results_ceiling = 10;
        searxng.default_depth = default_depth;
        let state = AppState::new(Arc::new(orchestrator), &searxng);
        (create_router(Arc::new(state)), pages)
    }

    pub fn app(fail: bool) -> axum::Router {
        app_with(fail, SearchDepth::Basic).0
    }

    pub async fn post(app: axum::Router, body: Value) -> (StatusCode, Value) {
        post_raw(app, body.to_string()).await
    }

    pub async fn post_raw(app: axum::Router, body: String) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/api/advanced-search")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }
}

use test_helpers::*;

#[tokio::test]
async fn test_basic_search_response_shape() {
    let (status, body) = post(app(false), json!({"query": "rust", "maxResults": 3})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["query"], "rust");
    assert_eq!(body["number_of_results"], 3);
    assert_eq!(body["results"].as_array().unwrap().len(), 3);
    assert_eq!(body["results"][0]["url"], "https://site0.example/");
    assert_eq!(body["images"], json!(["https://img.example/1.png"]));
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn test_max_results_is_clamped_to_ceiling() {
    let (status, body) = post(app(false), json!({"query": "rust", "maxResults": 500})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["number_of_results"], 10);
}

#[tokio::test]
async fn test_empty_query_is_rejected() {
    let (status, body) = post(app(false), json!({"query": "   "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("query cannot be empty"));

    let (status, _) = post(app(false), json!({"maxResults": 3})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_engine_failure_is_500_with_error_shape() {
    let (status, body) = post(app(true), json!({"query": "rust"})).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Internal Server Error");
    assert!(body["error"].as_str().unwrap().contains("engine unreachable"));
    assert_eq!(body["query"], "rust");
    assert_eq!(body["results"], json!([]));
    assert_eq!(body["images"], json!([]));
    assert_eq!(body["number_of_results"], 0);
}

#[tokio::test]
async fn test_advanced_search_with_unreachable_pages_is_empty_success() {
    let (status, body) = post(
        app(false),
        json!({"query": "rust", "maxResults": 3, "searchDepth": "advanced"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"], json!([]));
    assert_eq!(body["number_of_results"], 0);
    assert_eq!(body["images"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_health() {
    let response = app(false)
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn test_default_depth_comes_from_config() {
    let (app, pages) = app_with(false, SearchDepth::Advanced);
    let (status, body) = post(app, json!({"query": "rust", "maxResults": 2})).await;

    assert_eq!(status, StatusCode::OK);
    // advanced depth crawls every candidate: 2 results times a multiplier of 4
    assert_eq!(pages.calls.load(Ordering::SeqCst), 8);
    assert_eq!(body["results"], json!([]));

    let (app, pages) = app_with(false, SearchDepth::Basic);
    let (status, body) = post(app, json!({"query": "rust", "maxResults": 2})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pages.calls.load(Ordering::SeqCst), 0);
    assert_eq!(body["number_of_results"], 2);
}

#[tokio::test]
async fn test_basic_items_carry_only_title_url_content() {
    let (_, body) = post(app(false), json!({"query": "rust", "maxResults": 2})).await;
    for item in body["results"].as_array().unwrap() {
        let mut keys: Vec<&str> = item.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["content", "title", "url"]);
    }
}

#[tokio::test]
async fn test_malformed_body_gets_json_error() {
    let (status, body) = post_raw(app(false), "{not json".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Bad Request");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_non_string_query_gets_json_error() {
    let (status, body) = post(app(false), json!({"query": 42})).await;
    assert!(status.is_client_error());
    assert!(body["message"].is_string());
    assert!(body["error"].as_str().unwrap().contains("query"));
}
