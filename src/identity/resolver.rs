use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::info;

use super::credential::issue_credential;
use crate::{
    db::{AdoptOutcome, DBLayer, InsertOutcome},
    error::ApiError,
    model::device::Device,
};

const MAX_DISPLAY_NAME_CHARS: usize = 128;

static HARDWARE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._:\-]{1,256}$").expect("hardware id pattern"));

/// A validated registration call.
#[derive(Debug, Clone)]
pub struct Registration {
    pub display_name: String,
    pub stable_hardware_id: Option<String>,
    pub legacy_id: Option<String>,
    pub rotate_credential: bool,
}

impl Registration {
    pub fn validate(
        display_name: &str,
        stable_hardware_id: Option<&str>,
        legacy_id: Option<&str>,
        rotate_credential: bool,
    ) -> Result<Self, ApiError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(ApiError::validation("display_name_required"));
        }
        if display_name.chars().count() > MAX_DISPLAY_NAME_CHARS {
            return Err(ApiError::validation("display_name_too_long"));
        }

        let stable_hardware_id = non_empty(stable_hardware_id);
        if let Some(hw) = stable_hardware_id.as_deref() {
            if !HARDWARE_ID_RE.is_match(hw) {
                return Err(ApiError::validation("stable_hardware_id_invalid"));
            }
        }

        Ok(Self {
            display_name: display_name.to_string(),
            stable_hardware_id,
            legacy_id: non_empty(legacy_id),
            rotate_credential,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPath {
    Created,
    Updated,
    Adopted,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub device: Device,
    pub path: ResolutionPath,
}

/// Create, update or adopt a registry row for the caller.
///
/// 1. A known hardware id refreshes its row (idempotent path).
/// 2. Hardware id + legacy id adopts a row that has no hardware id yet.
/// 3. Otherwise a new row is inserted. If the insert loses a race on the
///    hardware id, the winner's row is refreshed instead.
pub async fn resolve_registration(db: &DBLayer, reg: &Registration) -> Result<Resolution> {
    let now = chrono::Utc::now().timestamp();
    let rotated = reg.rotate_credential.then(issue_credential);

    if let Some(hw) = reg.stable_hardware_id.as_deref() {
        if let Some(device) = db
            .refresh_by_hardware_id(hw, &reg.display_name, now, rotated.as_deref())
            .await?
        {
            return Ok(resolved(device, ResolutionPath::Updated, reg.rotate_credential));
        }

        if let Some(legacy_id) = reg.legacy_id.as_deref() {
            match db
                .adopt_legacy(legacy_id, hw, &reg.display_name, now, rotated.as_deref())
                .await?
            {
                AdoptOutcome::Adopted(device) => {
                    return Ok(resolved(device, ResolutionPath::Adopted, reg.rotate_credential));
                }
                AdoptOutcome::HardwareIdTaken => {
                    return refresh_after_conflict(db, reg, hw, now, rotated.as_deref()).await;
                }
                AdoptOutcome::NotEligible => {}
            }
        }
    }

    let device = Device {
        id: Device::new_id(),
        stable_hardware_id: reg.stable_hardware_id.clone(),
        display_name: reg.display_name.clone(),
        credential: issue_credential(),
        owner_user_id: None,
        registered_at: now,
        last_seen_at: now,
        last_bridge_call_at: None,
    };

    match db.insert_device(&device).await? {
        InsertOutcome::Inserted(device) => Ok(resolved(device, ResolutionPath::Created, false)),
        InsertOutcome::HardwareIdTaken => {
            let hw = reg
                .stable_hardware_id
                .as_deref()
                .ok_or_else(|| anyhow!("hardware id conflict without a hardware id"))?;
            refresh_after_conflict(db, reg, hw, now, rotated.as_deref()).await
        }
    }
}

/// A concurrent writer claimed `hw` between our read and our write; its row is now ours to update.
async fn refresh_after_conflict(
    db: &DBLayer,
    reg: &Registration,
    hw: &str,
    now: i64,
    rotated: Option<&str>,
) -> Result<Resolution> {
    let device = db
        .refresh_by_hardware_id(hw, &reg.display_name, now, rotated)
        .await?
        .ok_or_else(|| anyhow!("hardware id {hw} claimed but no row found"))?;
    Ok(resolved(device, ResolutionPath::Updated, reg.rotate_credential))
}

fn resolved(device: Device, path: ResolutionPath, rotated: bool) -> Resolution {
    info!(device_id = %device.id, ?path, rotated, "device registration resolved");
    Resolution { device, path }
}
