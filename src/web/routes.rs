use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::static_files::static_handler;
use super::state::AppState;

// UI Routes - web interface
pub fn ui_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(handlers::ui::index_handler))
        .route("/static/{*path}", get(static_handler))
        .fallback(handlers::ui::not_found_handler)
}

// API Routes - chat sessions and helpers for the UI
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Chat sessions
            .route("/sessions", post(handlers::api::create_session))
            .route("/sessions/{id}", get(handlers::api::get_session))
            .route("/sessions/{id}/ask", post(handlers::api::ask))
            .route("/sessions/{id}/explain", post(handlers::api::explain))
            // Clinical report table
            .route("/report", post(handlers::api::report))
            // System status
            .route("/status", get(handlers::api::system_status)),
    )
}
