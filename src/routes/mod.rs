use axum::Router;

use crate::RunHistory;

mod health;
mod runs;

// ---

/// Status API: read-only views over the run history.
pub fn router(history: RunHistory) -> Router {
    // ---
    Router::new()
        .merge(runs::router())
        .merge(health::router())
        .with_state(history)
}
