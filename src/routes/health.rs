// src/routes/health.rs
//! Liveness endpoint for the SkyWatch pipeline.
//!
//! This module defines the `/health` route used by container orchestrators
//! (e.g., Docker, Kubernetes) to verify that the process is up. It follows
//! the Explicit Module Boundary Pattern (EMBP):
//! - Internal to this file: endpoint handler and response type
//! - Exports to the gateway (`mod.rs`): a subrouter containing the `/health` route
//!
//! The response also carries the status of the most recent run so a probe can
//! tell a live-but-failing pipeline apart from a healthy one without parsing
//! `/runs`. Liveness itself never depends on run outcomes.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::{RunHistory, RunState};

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    last_run: Option<RunState>,
}

/// Handle `GET /health`.
///
/// Does not touch the database or the weather API.
async fn health(State(history): State<RunHistory>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        last_run: history.latest().map(|run| run.status),
    })
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<RunHistory> {
    Router::new().route("/health", get(health))
}
