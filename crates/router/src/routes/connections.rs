//! Connection statistics.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::hub::HubStats;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/connections", get(connection_stats))
}

/// GET /api/connections: Live connection and group counts.
async fn connection_stats(State(state): State<AppState>) -> Json<HubStats> {
    Json(state.hub.stats().await)
}
