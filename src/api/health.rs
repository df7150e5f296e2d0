//! Liveness endpoint

use axum::{Json, Router, routing::get};
use serde::Serialize;

/// Build the health router
pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
