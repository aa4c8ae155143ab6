//! HTTP surface: submit crawls and poll their result streams.

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{
        HeaderMap, HeaderValue, Method, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE, HOST},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use linkweb_core::bus::{BusError, CommandBus};
use linkweb_core::data::ResultStore;
use linkweb_core::model::SessionId;
use linkweb_core::pagination::{Cursor, Page, read_page};
use linkweb_scanner::EdgeRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

/// Origins allowed by default: the usual local front-end dev servers.
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 6] = [
    "http://localhost:3000",
    "https://localhost:3000",
    "http://localhost:5173",
    "https://localhost:5173",
    "http://localhost:8080",
    "https://localhost:8080",
];

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Shared state behind every route.
#[derive(Clone)]
pub struct ApiState {
    bus: CommandBus,
    store: Arc<dyn ResultStore>,
    /// Host used in results links when a request carries no `Host` header.
    fallback_host: String,
}

impl ApiState {
    pub fn new(bus: CommandBus, store: Arc<dyn ResultStore>, fallback_host: impl Into<String>) -> Self {
        Self {
            bus,
            store,
            fallback_host: fallback_host.into(),
        }
    }

    fn host<'a>(&'a self, headers: &'a HeaderMap) -> &'a str {
        headers
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(&self.fallback_host)
    }
}

#[derive(Debug, Deserialize)]
pub struct CrawlRequest {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CrawlResponse {
    #[serde(rename = "resultsURL")]
    pub results_url: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct NextLink {
    pub href: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Links {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<NextLink>,
}

/// Body of `GET /crawl/{id}`. `_links` is absent once the stream has ended.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct LookupResponse {
    pub edges: Vec<EdgeRecord>,
    #[serde(rename = "_links", skip_serializing_if = "Option::is_none", default)]
    pub links: Option<Links>,
}

impl LookupResponse {
    pub fn from_page(page: Page, host: &str) -> Self {
        let links = page.next.map(|cursor| Links {
            next: Some(NextLink {
                href: cursor.href(host),
            }),
        });
        Self {
            edges: page.edges,
            links,
        }
    }
}

pub fn build_router(state: ApiState, allowed_origins: &[String]) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/crawl", post(submit_crawl_handler))
        .route("/crawl/:session_id", get(lookup_crawl_handler));

    if let Some(cors) = build_cors_layer(allowed_origins) {
        router = router.layer(cors);
    }

    router.with_state(state).layer(TraceLayer::new_for_http())
}

fn build_cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            let trimmed = origin.trim().trim_end_matches('/');
            match HeaderValue::from_str(trimmed) {
                Ok(value) if !trimmed.is_empty() => Some(value),
                _ => {
                    warn!("Ignoring invalid CORS origin {:?}", origin);
                    None
                }
            }
        })
        .collect();

    if allowed.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE, AUTHORIZATION])
            .allow_credentials(true),
    )
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn submit_crawl_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<CrawlRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CrawlResponse>), ApiError> {
    let Json(request) = body.map_err(|e| {
        warn!("Rejected crawl request: {}", e);
        ApiError::BadRequest("Invalid JSON".to_string())
    })?;

    let session_id = state.bus.submit(&request.url).map_err(|e| match e {
        BusError::EmptyUrl => ApiError::BadRequest("URL is required".to_string()),
        BusError::NoSubscribers => {
            error!("Could not publish crawl command for {}: {}", request.url, e);
            ApiError::Internal("Failed to publish command".to_string())
        }
    })?;
    info!("Accepted crawl of {} as session {}", request.url.trim(), session_id);

    let results_url = Cursor::start(session_id).href(state.host(&headers));
    Ok((StatusCode::ACCEPTED, Json(CrawlResponse { results_url })))
}

async fn lookup_crawl_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(raw_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<LookupResponse>, ApiError> {
    let session_id = SessionId::parse(&raw_id)
        .map_err(|_| ApiError::BadRequest("Crawl ID is required".to_string()))?;

    let start_index = params
        .get("startIndex")
        .ok_or_else(|| ApiError::BadRequest("Must specify starting index".to_string()))?
        .parse::<usize>()
        .map_err(|_| ApiError::BadRequest("Invalid data type in query params".to_string()))?;

    let cursor = Cursor::new(session_id, start_index);
    let store = state.store.clone();
    let page = tokio::task::spawn_blocking(move || read_page(store.as_ref(), &cursor))
        .await
        .map_err(|e| {
            error!("Result read task failed: {}", e);
            ApiError::Internal("Failed to get results".to_string())
        })?
        .map_err(|e| {
            error!("Could not read results for {}: {}", raw_id, e);
            ApiError::Internal("Failed to get results".to_string())
        })?;

    Ok(Json(LookupResponse::from_page(page, state.host(&headers))))
}

/// Serves `router` on `listener` until Ctrl-C.
pub async fn serve(listener: TcpListener, router: Router) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP API listening on {}", addr);
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
