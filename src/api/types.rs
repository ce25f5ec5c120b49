use serde::{Deserialize, Serialize};

use crate::model::{capture::Capture, device::DeviceInfo, payload::Payload};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(alias = "name")]
    pub display_name: String,
    #[serde(default, alias = "hw_id")]
    pub stable_hardware_id: Option<String>,
    #[serde(default, alias = "rotate")]
    pub rotate_credential: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub id: String,
    pub display_name: String,
    pub credential: String,
    pub registered_at: i64,
    pub last_seen_at: i64,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub device_id: String,
    pub written: bool,
    pub last_bridge_call_at: Option<i64>,
}

/// Any `device_id` a client puts in the body is ignored; the gate decides.
#[derive(Debug, Deserialize)]
pub struct CreateCaptureRequest {
    pub kind: String,
    #[serde(default)]
    pub captured_at: Option<i64>,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct CapturesResponse {
    pub device_id: String,
    pub captures: Vec<Capture>,
}

#[derive(Debug, Serialize)]
pub struct PayloadsResponse {
    pub device_id: String,
    pub payloads: Vec<Payload>,
}

#[derive(Debug, Deserialize)]
pub struct LinkDeviceRequest {
    pub device_id: String,
}

#[derive(Debug, Serialize)]
pub struct OwnedDevicesResponse {
    pub user_id: String,
    pub devices: Vec<DeviceInfo>,
}
