//! HTTP server for the content cache
//!
//! Serves cached blobs on /blob and exposes cache maintenance and
//! diagnostics on /health, /report, /optimize, /memory-pressure and /cache.

use crate::fetcher::HttpBlobLoader;
use crate::types::{BlobQuery, HealthResponse, MaintenanceResponse};
use axum::{
    extract::{Query, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use content_cache::{CacheCoordinator, CacheReport};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Shared state for the HTTP server
pub struct ServerState {
    pub cache: Arc<CacheCoordinator>,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(cache: Arc<CacheCoordinator>) -> Self {
        Self {
            cache,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/report", get(report))
        .route("/blob", get(get_blob))
        .route("/optimize", post(optimize))
        .route("/memory-pressure", post(memory_pressure))
        .route("/cache", delete(clear_cache))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cache: state.cache.statistics(),
    })
}

async fn report(State(state): State<SharedState>) -> Json<CacheReport> {
    Json(state.cache.report().await)
}

/// Serve a blob from memory, disk or upstream
async fn get_blob(State(state): State<SharedState>, Query(query): Query<BlobQuery>) -> Response {
    if let Err(e) = HttpBlobLoader::parse_url(&query.url) {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }

    let cache_header = if state.cache.blobs().contains(&query.url) {
        "HIT"
    } else {
        "MISS"
    };

    match state.cache.preload(&query.url).await {
        Ok(data) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/octet-stream"),
                (header::CACHE_CONTROL, "public, max-age=86400"),
                (X_CACHE, cache_header),
            ],
            data,
        )
            .into_response(),
        Err(e) => {
            warn!(url = %query.url, error = %e, "Failed to load blob");
            error_response(StatusCode::BAD_GATEWAY, "Blob unavailable")
        }
    }
}

async fn optimize(State(state): State<SharedState>) -> Json<MaintenanceResponse> {
    let response = match state.cache.optimize_cache().await {
        Some(statistics) => MaintenanceResponse {
            ran: true,
            statistics,
        },
        None => MaintenanceResponse {
            ran: false,
            statistics: state.cache.statistics(),
        },
    };
    Json(response)
}

async fn memory_pressure(State(state): State<SharedState>) -> Json<MaintenanceResponse> {
    Json(MaintenanceResponse {
        ran: true,
        statistics: state.cache.handle_memory_pressure(),
    })
}

async fn clear_cache(State(state): State<SharedState>) -> Json<MaintenanceResponse> {
    Json(MaintenanceResponse {
        ran: true,
        statistics: state.cache.clear_all_caches().await,
    })
}
