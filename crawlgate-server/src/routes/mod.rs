pub mod v1;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::{
    AppState,
    handlers::{health::health, semaphore_handlers::admission_stats},
};

/// Create the full application router with all versions
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(admission_stats))
        .nest("/v1", v1::create_v1_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
