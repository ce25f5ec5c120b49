use serde::{Deserialize, Serialize};

pub const DEVICE_ID_PREFIX: &str = "dev_";

/// One row per physical device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub stable_hardware_id: Option<String>,
    pub display_name: String,
    pub credential: String,
    #[serde(default)]
    pub owner_user_id: Option<String>,
    pub registered_at: i64,
    pub last_seen_at: i64,
    #[serde(default)]
    pub last_bridge_call_at: Option<i64>,
}

impl Device {
    pub fn new_id() -> String {
        format!("{DEVICE_ID_PREFIX}{}", uuid::Uuid::new_v4().simple())
    }

    /// Heartbeat is stale once `debounce_secs` have passed since the last write.
    pub fn heartbeat_due(&self, now: i64, debounce_secs: i64) -> bool {
        match self.last_bridge_call_at {
            Some(last) => now.saturating_sub(last) >= debounce_secs,
            None => true,
        }
    }

    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            stable_hardware_id: self.stable_hardware_id.clone(),
            owner_user_id: self.owner_user_id.clone(),
            registered_at: self.registered_at,
            last_seen_at: self.last_seen_at,
            last_bridge_call_at: self.last_bridge_call_at,
        }
    }
}

/// Public view of a device. Never carries the credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub display_name: String,
    pub stable_hardware_id: Option<String>,
    pub owner_user_id: Option<String>,
    pub registered_at: i64,
    pub last_seen_at: i64,
    pub last_bridge_call_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(last_bridge_call_at: Option<i64>) -> Device {
        Device {
            id: Device::new_id(),
            stable_hardware_id: None,
            display_name: "Phone".into(),
            credential: "tok_x".into(),
            owner_user_id: None,
            registered_at: 0,
            last_seen_at: 0,
            last_bridge_call_at,
        }
    }

    #[test]
    fn ids_carry_prefix_and_differ() {
        let a = Device::new_id();
        let b = Device::new_id();
        assert!(a.starts_with(DEVICE_ID_PREFIX));
        assert_ne!(a, b);
    }

    #[test]
    fn heartbeat_due_respects_threshold() {
        assert!(device(None).heartbeat_due(100, 60));
        assert!(!device(Some(100)).heartbeat_due(159, 60));
        assert!(device(Some(100)).heartbeat_due(160, 60));
    }

    #[test]
    fn info_omits_credential() {
        let json = serde_json::to_value(device(None).info()).unwrap();
        assert!(json.get("credential").is_none());
    }
}
