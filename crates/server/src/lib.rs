//! HTTP + WebSocket host for quantum putting games
//!
//! The router is built here so integration tests can drive it without a
//! socket; `main.rs` only adds tracing, static files and the listener.

pub mod api;
pub mod runner;
pub mod state;
pub mod ws;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

use state::AppState;

/// Build the application router
pub fn app(state: Arc<AppState>) -> Router {
    // Configure CORS for development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_router = Router::new()
        .route("/configs", get(api::list_configs))
        .route("/configs/:name", get(api::get_config))
        .route("/games", post(api::create_game))
        .route("/games/:id", get(api::get_game).delete(api::delete_game))
        .route("/games/:id/start", post(api::start_game))
        .route("/games/:id/pause", post(api::pause_game))
        .route("/games/:id/resume", post(api::resume_game))
        .route("/games/:id/putt", post(api::putt))
        .route("/games/:id/measure", post(api::measure))
        .route("/games/:id/measurements", post(api::show_measurements))
        .route("/games/:id/reset", post(api::reset_game))
        .route("/games/:id/club", post(api::set_club));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api_router)
        .route("/ws/game/:id", get(ws::ws_game_handler))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(cors))
}

async fn health_handler() -> &'static str {
    "OK"
}
