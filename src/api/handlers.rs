use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use std::sync::Arc;
use std::time::Instant;

use crate::data_models::{AggregateSearchResult, SearchQuery};

use super::AppState;
use super::models::{ErrorResponse, SearchRequest};

pub async fn advanced_search_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AggregateSearchResult>), (StatusCode, Json<ErrorResponse>)> {
    let start = Instant::now();
    let Json(request) = payload.map_err(|rejection| {
        tracing::info!(status = rejection.status().as_u16(), "rejected request body");
        error_response(rejection.status(), rejection.body_text())
    })?;

    let max_results = request.effective_max_results(state.max_results_ceiling);
    let depth = request.search_depth.unwrap_or(state.default_depth);
    let query = SearchQuery::new(
        request.query,
        max_results,
        depth,
        request.include_domains,
        request.exclude_domains,
    )
    .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))?;

    let result = state.orchestrator.search(&query).await;
    let status = if result.is_error() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };

    tracing::info!(
        status = status.as_u16(),
        results = result.number_of_results,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "advanced search served"
    );
    Ok((status, Json(result)))
}

fn error_response(status: StatusCode, error: String) -> (StatusCode, Json<ErrorResponse>) {
    let message = status.canonical_reason().unwrap_or("Bad Request").to_string();
    (status, Json(ErrorResponse { message, error }))
}

pub async fn health_handler() -> &'static str {
    "ok"
}
