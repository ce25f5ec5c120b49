use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};

use crate::{identity::require_device, state::AppState};

pub mod handlers;
pub mod payloads;
pub mod types;


use handlers::{
    create_capture, device_info, get_capture, heartbeat, link_device_to_user, list_captures,
    list_owned_devices, register_device,
};
use payloads::{download_payload, list_payloads, upload_payload};

/// Device-facing API. Everything except registration and the user-session
/// routes sits behind the authorization gate.
pub fn router(state: AppState) -> Router<AppState> {
    let upload_limit = state.config.max_upload_bytes.saturating_mul(2);

    let scoped = Router::new()
        .route("/api/devices/me", get(device_info))
        .route("/api/devices/heartbeat", post(heartbeat))
        .route("/api/captures", post(create_capture).get(list_captures))
        .route("/api/captures/{capture_id}", get(get_capture))
        .route(
            "/api/payloads",
            post(upload_payload)
                .layer(DefaultBodyLimit::max(upload_limit))
                .get(list_payloads),
        )
        .route("/api/payloads/{payload_id}", get(download_payload))
        .route_layer(middleware::from_fn_with_state(state, require_device));

    Router::new()
        .route("/api/devices/register", post(register_device))
        // Alias used by older clients
        .route("/register", post(register_device))
        .route("/api/devices/link", post(link_device_to_user))
        .route("/api/users/me/devices", get(list_owned_devices))
        .merge(scoped)
}
