//! External-agent bridge: JSON-RPC over `POST /mcp`.
//!
//! Each request passes the authorization gate, gets a fresh
//! [`session::BridgeSession`] bound to the resolved device, and drops it
//! before the response is sent.

use axum::{routing::post, Router};

use crate::state::AppState;

pub mod handler;
pub mod protocol;
pub mod session;


pub fn router() -> Router<AppState> {
    Router::new().route("/mcp", post(handler::bridge_handler))
}
