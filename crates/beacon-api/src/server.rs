//! Router assembly and the HTTP listener

use axum::extract::{MatchedPath, Request};
use axum::http::{HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use beacon_common::config::ServerConfig;
use beacon_common::metrics;
use beacon_common::{Error, Result};

use crate::export::{export_get, export_post};
use crate::routes::{create_route, delete_route, get_route, list_routes, update_route};
use crate::state::AppState;

/// Build the API router
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/v1/export_raw_data", get(export_get).post(export_post))
        .route("/notification-routes", get(list_routes).post(create_route))
        .route(
            "/notification-routes/:id",
            get(get_route).put(update_route).delete(delete_route),
        )
        .route_layer(middleware::from_fn(track_requests));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus))
        .merge(api)
        .layer(cors(&state.config.server))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn prometheus() -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        metrics::export_prometheus(),
    )
}

async fn track_requests(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |path| path.as_str().to_string());
    let response = next.run(request).await;
    metrics::record_http_request(&route, response.status().as_u16());
    response
}

fn cors(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(origins)
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
}

/// Serve until `state.shutdown` is cancelled
pub async fn serve(state: AppState) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.server.bind_address, state.config.server.port)
        .parse()
        .map_err(|e| Error::Config(format!("invalid bind address: {}", e)))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    info!("API server stopped");
    Ok(())
}
