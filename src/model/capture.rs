use serde::{Deserialize, Serialize};

/// A sensor capture reported by a device. Opaque to this service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Capture {
    pub id: String,
    pub device_id: String,
    pub kind: String,
    pub captured_at: i64,
    pub received_at: i64,
    pub data: serde_json::Value,
}
