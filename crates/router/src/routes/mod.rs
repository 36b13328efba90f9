pub mod alert;
pub mod connections;
pub mod health;
pub mod ws;

use axum::Router;

use crate::state::AppState;

/// Build the complete router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(ws::router())
        .merge(alert::router())
        .merge(connections::router())
        .with_state(state)
}
