use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use uuid::Uuid;

use crate::{
    api::types::*,
    auth::AuthenticatedUser,
    error::{ApiError, ApiJson, ApiQuery},
    identity::{
        gate::DEVICE_ID_HEADER, ownership::link_device, resolve_registration, AuthorizedDevice,
        Registration, ResolutionPath,
    },
    model::{capture::Capture, device::DeviceInfo},
    state::AppState,
};

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 200;
const MAX_CAPTURE_KIND_CHARS: usize = 64;

pub(crate) fn list_limit(query: &ListQuery) -> usize {
    query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT)
}

// ------------------------------------------------------------
// REGISTRATION (open)
// ------------------------------------------------------------
pub async fn register_device(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let legacy_id = headers
        .get(DEVICE_ID_HEADER)
        .and_then(|v| v.to_str().ok());

    let registration = Registration::validate(
        &req.display_name,
        req.stable_hardware_id.as_deref(),
        legacy_id,
        req.rotate_credential,
    )?;

    let resolution = resolve_registration(&state.db, &registration).await?;
    let status = match resolution.path {
        ResolutionPath::Created => StatusCode::CREATED,
        ResolutionPath::Updated | ResolutionPath::Adopted => StatusCode::OK,
    };

    let device = resolution.device;
    Ok((
        status,
        Json(RegisterResponse {
            id: device.id,
            display_name: device.display_name,
            credential: device.credential,
            registered_at: device.registered_at,
            last_seen_at: device.last_seen_at,
        }),
    ))
}

// ------------------------------------------------------------
// DEVICE-SCOPED
// ------------------------------------------------------------
pub async fn device_info(Extension(device): Extension<AuthorizedDevice>) -> Json<DeviceInfo> {
    Json(device.0.info())
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Extension(device): Extension<AuthorizedDevice>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let now = chrono::Utc::now().timestamp();
    let beat = state
        .db
        .touch_heartbeat(device.id(), now, state.config.heartbeat_debounce_secs)
        .await?
        .ok_or_else(|| ApiError::NotFound("device_not_found".into()))?;

    Ok(Json(HeartbeatResponse {
        device_id: device.id().to_string(),
        written: beat.written,
        last_bridge_call_at: beat.last_bridge_call_at,
    }))
}

pub async fn create_capture(
    State(state): State<AppState>,
    Extension(device): Extension<AuthorizedDevice>,
    ApiJson(req): ApiJson<CreateCaptureRequest>,
) -> Result<(StatusCode, Json<Capture>), ApiError> {
    let kind = req.kind.trim();
    if kind.is_empty() || kind.chars().count() > MAX_CAPTURE_KIND_CHARS {
        return Err(ApiError::validation("kind_invalid"));
    }

    let now = chrono::Utc::now().timestamp();
    let capture = Capture {
        id: Uuid::new_v4().simple().to_string(),
        device_id: device.id().to_string(),
        kind: kind.to_string(),
        captured_at: req.captured_at.unwrap_or(now),
        received_at: now,
        data: req.data,
    };
    state.db.save_capture(&capture).await?;

    Ok((StatusCode::CREATED, Json(capture)))
}

pub async fn list_captures(
    State(state): State<AppState>,
    Extension(device): Extension<AuthorizedDevice>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> Result<Json<CapturesResponse>, ApiError> {
    let captures = state
        .db
        .list_recent_captures(device.id(), list_limit(&query))
        .await?;

    Ok(Json(CapturesResponse {
        device_id: device.id().to_string(),
        captures,
    }))
}

pub async fn get_capture(
    State(state): State<AppState>,
    Extension(device): Extension<AuthorizedDevice>,
    Path(capture_id): Path<String>,
) -> Result<Json<Capture>, ApiError> {
    state
        .db
        .load_capture(device.id(), &capture_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("capture_not_found".into()))
}

// ------------------------------------------------------------
// OWNERSHIP (user session)
// ------------------------------------------------------------
pub async fn link_device_to_user(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiJson(req): ApiJson<LinkDeviceRequest>,
) -> Result<Json<DeviceInfo>, ApiError> {
    let device = link_device(&state.db, &req.device_id, &user.id).await?;
    Ok(Json(device.info()))
}

pub async fn list_owned_devices(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<OwnedDevicesResponse>, ApiError> {
    let devices = state
        .db
        .list_devices_for_owner(&user.id)
        .await?
        .iter()
        .map(|d| d.info())
        .collect();

    Ok(Json(OwnedDevicesResponse {
        user_id: user.id,
        devices,
    }))
}
