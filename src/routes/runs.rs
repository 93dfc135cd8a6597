use axum::{extract::Query, extract::State, routing::get, Json, Router};
use serde::Deserialize;
use tracing::debug;

use crate::{RunHistory, RunRecord};

// ---

const DEFAULT_LIMIT: usize = 20;

pub fn router() -> Router<RunHistory> {
    // ---
    Router::new().route("/runs", get(handler))
}

/// Query parameters for the run listing
#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    limit: Option<usize>,
}

/// Recent runs, newest first.
async fn handler(
    Query(params): Query<RunsQuery>,
    State(history): State<RunHistory>,
) -> Json<Vec<RunRecord>> {
    // ---
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    debug!("GET /runs - limit {}", limit);

    Json(history.recent(limit))
}
