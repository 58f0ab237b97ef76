pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::search::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/search", post(handlers::handle_search))
        .route("/ws", get(handlers::handle_stream))
        .with_state(state)
}
