//! API module
//!
//! HTTP endpoints (read path, change-feed ingestion, health) and middleware.

pub mod middleware;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::StreamBatchHandler;
use crate::store::SummaryStore;

pub use routes::create_router;

/// Shared state injected into every handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SummaryStore>,
    pub stream_handler: StreamBatchHandler,
}

impl AppState {
    pub fn new(store: Arc<dyn SummaryStore>, stream_handler: StreamBatchHandler) -> Self {
        Self {
            store,
            stream_handler,
        }
    }
}

/// Build the application router with its middleware stack.
///
/// Axum layers run in reverse order of addition:
/// trace -> correlation id -> logging -> handler
pub fn build_app(state: AppState) -> Router {
    create_router()
        .layer(axum::middleware::from_fn(middleware::logging_middleware))
        .layer(axum::middleware::from_fn(middleware::correlation_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
