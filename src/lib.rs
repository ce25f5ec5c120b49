use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod api;
pub mod auth;
pub mod bridge;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod model;
pub mod state;
pub mod storage;

use state::AppState;

/// Full HTTP surface: device API, user accounts, and the agent bridge.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .merge(api::router(state.clone()))
        .merge(auth::router())
        .merge(bridge::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}
