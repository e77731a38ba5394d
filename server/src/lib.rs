pub mod search;
pub mod snippet;
pub mod stats;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use crawler::{Fetcher, IndexingContext, IndexingCoordinator, IndexingOutcome, PageIndexer};
use search_core::{AppConfig, EngineError, Storage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use search::{SearchEngine, SearchHit, SearchPage};

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub query: String,
    pub site: Option<String>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}
fn default_limit() -> usize { 10 }

#[derive(Deserialize)]
pub struct IndexPageParams {
    #[serde(default)]
    pub url: String,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub result: bool,
    pub count: usize,
    pub data: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct StatisticsResponse {
    pub result: bool,
    pub statistics: stats::Statistics,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Storage>,
    pub coordinator: Arc<IndexingCoordinator>,
    pub pages: Arc<PageIndexer>,
    pub search: Arc<SearchEngine>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn Storage>, fetcher: Arc<dyn Fetcher>) -> Self {
        let ctx = IndexingContext::new(&config, store.clone(), fetcher);
        let search = Arc::new(SearchEngine::new(store.clone(), ctx.lemmatizer.clone(), &config.cache));
        Self {
            store,
            coordinator: IndexingCoordinator::new(config.clone(), ctx.clone()),
            pages: Arc::new(PageIndexer::new(config, ctx)),
            search,
        }
    }
}

/// Failure body shared by every endpoint: `{"result": false, "error": ...}`.
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_validation() {
            StatusCode::BAD_REQUEST
        } else {
            tracing::error!(error = %self.0, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(serde_json::json!({ "result": false, "error": self.0.to_string() }))).into_response()
    }
}

pub fn build_app(state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/statistics", get(statistics_handler))
        .route("/api/startIndexing", get(start_handler))
        .route("/api/stopIndexing", get(stop_handler))
        .route("/api/indexPage", post(index_page_handler))
        .route("/api/search", get(search_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn outcome_response(outcome: IndexingOutcome) -> (StatusCode, Json<IndexingOutcome>) {
    let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(outcome))
}

pub async fn statistics_handler(State(state): State<AppState>) -> Result<Json<StatisticsResponse>, ApiError> {
    let statistics = stats::collect(state.store.as_ref(), state.coordinator.is_indexing())?;
    Ok(Json(StatisticsResponse { result: true, statistics }))
}

pub async fn start_handler(State(state): State<AppState>) -> (StatusCode, Json<IndexingOutcome>) {
    outcome_response(state.coordinator.start())
}

pub async fn stop_handler(State(state): State<AppState>) -> (StatusCode, Json<IndexingOutcome>) {
    outcome_response(state.coordinator.stop())
}

pub async fn index_page_handler(
    State(state): State<AppState>,
    Query(params): Query<IndexPageParams>,
) -> (StatusCode, Json<IndexingOutcome>) {
    if params.url.trim().is_empty() {
        return outcome_response(IndexingOutcome::rejected("URL is required"));
    }
    outcome_response(state.pages.index_one(&params.url).await)
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let page = state
        .search
        .search(&params.query, params.site.as_deref(), params.offset, params.limit)
        .await?;
    Ok(Json(SearchResponse { result: true, count: page.total, data: page.hits }))
}
