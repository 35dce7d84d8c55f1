use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::SearxngConfig;
use crate::data_models::SearchDepth;
use crate::orchestrator::SearchOrchestrator;

pub mod handlers;
pub mod models;

/// Shared state of the HTTP layer.
pub struct AppState {
    pub orchestrator: Arc<SearchOrchestrator>,
    pub max_results_ceiling: usize,
    pub default_depth: SearchDepth,
}

impl AppState {
    pub fn new(orchestrator: Arc<SearchOrchestrator>, searxng: &SearxngConfig) -> Self {
        AppState {
            orchestrator,
            max_results_ceiling: searxng.max_results_ceiling,
            default_depth: searxng.default_depth,
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/advanced-search", post(handlers::advanced_search_handler))
        .route("/health", get(handlers::health_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}
