//! HTTP and WebSocket surface
//!
//! Exposes the subscriber side of gatehouse to remote clients:
//! - Checkpoint listing, assignment, responses and cancellation
//! - Replies to run input requests
//! - Registry statistics
//! - `/ws` live subscriptions carrying every outbound event

pub mod error;
pub mod handlers;
pub mod response;
pub mod ws;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::runtime::Gatehouse;

pub use error::{ApiError, ApiErrorResponse, ApiResult};
pub use response::SuccessResponse;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub gatehouse: Arc<Gatehouse>,
}

/// Build the complete router
pub fn create_router(gatehouse: Arc<Gatehouse>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/checkpoints", get(handlers::list_checkpoints))
        .route("/api/v1/checkpoints/:id", get(handlers::get_checkpoint))
        .route(
            "/api/v1/checkpoints/:id/assign",
            post(handlers::assign_checkpoint),
        )
        .route(
            "/api/v1/checkpoints/:id/responses",
            post(handlers::submit_response),
        )
        .route(
            "/api/v1/checkpoints/:id/cancel",
            post(handlers::cancel_checkpoint),
        )
        .route("/api/v1/inputs/:request_id", post(handlers::submit_input))
        .route("/api/v1/realtime/stats", get(handlers::realtime_stats))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { gatehouse })
}
