use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use tracing::{error, warn};

use super::{
    protocol::{
        RpcError, RpcRequest, RpcResponse, INTERNAL_ERROR, INVALID_CREDENTIAL, INVALID_REQUEST,
        JSONRPC_VERSION, MISSING_CREDENTIAL, PARSE_ERROR,
    },
    session::BridgeSession,
};
use crate::{
    identity::{resolve_caller, CallerClaims, GateError},
    state::AppState,
};

pub async fn bridge_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Only used to echo the id back on errors; nothing runs before the gate.
    let raw: Option<Value> = serde_json::from_slice(&body).ok();
    let echo_id = raw
        .as_ref()
        .and_then(|v| v.get("id"))
        .cloned()
        .unwrap_or(Value::Null);

    let claims = CallerClaims::from_headers(&headers);
    let device = match resolve_caller(&state.db, &claims, state.config.allow_legacy_fallback).await
    {
        Ok(device) => device,
        Err(err) => return gate_failure(echo_id, err),
    };

    let now = chrono::Utc::now().timestamp();
    if let Err(err) = state
        .db
        .touch_heartbeat(&device.id, now, state.config.heartbeat_debounce_secs)
        .await
    {
        warn!(device_id = %device.id, error = ?err, "bridge heartbeat write failed");
    }

    let Some(raw) = raw else {
        return rpc_failure(
            StatusCode::BAD_REQUEST,
            Value::Null,
            RpcError::new(PARSE_ERROR, "parse error: body is not valid JSON"),
        );
    };

    let req: RpcRequest = match serde_json::from_value(raw) {
        Ok(req) => req,
        Err(e) => {
            return rpc_failure(
                StatusCode::BAD_REQUEST,
                echo_id,
                RpcError::new(INVALID_REQUEST, format!("invalid request: {e}")),
            )
        }
    };
    if req.jsonrpc != JSONRPC_VERSION {
        return rpc_failure(
            StatusCode::BAD_REQUEST,
            echo_id,
            RpcError::new(INVALID_REQUEST, "invalid request: jsonrpc must be \"2.0\""),
        );
    }

    if req.is_notification() {
        return StatusCode::ACCEPTED.into_response();
    }

    let id = req.id.clone().unwrap_or(Value::Null);
    let session = BridgeSession::new(
        device,
        &state.db,
        &state.storage,
        state.config.bridge_payload_cap_bytes,
    );
    let outcome = session.handle(&req.method, req.params).await;
    drop(session);

    match outcome {
        Ok(result) => Json(RpcResponse::success(id, result)).into_response(),
        Err(err) => Json(RpcResponse::failure(id, err)).into_response(),
    }
}

fn gate_failure(id: Value, err: GateError) -> Response {
    let (status, error) = match err {
        GateError::MissingCredential => (
            StatusCode::UNAUTHORIZED,
            RpcError::new(
                MISSING_CREDENTIAL,
                "missing credential: send `Authorization: Bearer <device credential>` \
                 using the credential returned by device registration",
            ),
        ),
        GateError::InvalidCredential => (
            StatusCode::FORBIDDEN,
            RpcError::new(
                INVALID_CREDENTIAL,
                "invalid credential: it does not match any device or was rotated; \
                 re-register the device and update the bridge configuration",
            ),
        ),
        GateError::UnknownDevice => (
            StatusCode::FORBIDDEN,
            RpcError::new(
                INVALID_CREDENTIAL,
                "invalid credential: device identifier not recognised; \
                 register the device to obtain a credential",
            ),
        ),
        GateError::Storage(err) => {
            error!(error = ?err, "bridge authorization failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                RpcError::new(INTERNAL_ERROR, "internal error"),
            )
        }
    };
    rpc_failure(status, id, error)
}

fn rpc_failure(status: StatusCode, id: Value, error: RpcError) -> Response {
    (status, Json(RpcResponse::failure(id, error))).into_response()
}
