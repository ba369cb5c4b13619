//! HTTP API exposing the orchestration runtime.
//!
//! All payloads are JSON; timestamps serialize as ISO-8601 UTC. The
//! handlers only surface validation-class errors synchronously —
//! everything pipeline-side is observed by polling lab status.

use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::pipeline::driver::Orchestrator;

pub mod error;
pub mod routes;

/// Shared application state accessible by all route handlers.
pub struct AppState {
    /// The orchestrator driving every lab.
    pub orchestrator: Arc<Orchestrator>,
}

/// Build the complete axum router with all API routes and middleware.
///
/// `cors_origins` lists permitted origins; a single `*` entry opens the
/// API to any origin.
pub fn build_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    let api = Router::new()
        .route("/health", get(routes::health))
        .route("/labs", get(routes::list_labs))
        .route("/labs/create", post(routes::create_lab))
        .route("/labs/{id}", get(routes::lab_status))
        .route("/labs/{id}/status", get(routes::lab_status))
        .route("/labs/{id}/message", post(routes::post_message));

    Router::new()
        .nest("/api", api)
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS layer from the configured origin list.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin, error = %e, "ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}
