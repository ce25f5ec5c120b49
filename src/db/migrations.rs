use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use tracing::{error, info};

use super::DBLayer;
use crate::model::device::Device;

const SCHEMA_VERSION_KEY: &str = "meta:schema_version";
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

impl DBLayer {
    pub fn schema_version(&self) -> Result<u32> {
        match self.get_string(SCHEMA_VERSION_KEY)? {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("Invalid schema version {raw:?}")),
            None => Ok(0),
        }
    }

    pub(super) fn migrate(&self) -> Result<()> {
        let mut version = self.schema_version()?;

        while version < CURRENT_SCHEMA_VERSION {
            let next = version + 1;
            match next {
                1 => {}
                2 => self.rebuild_device_indexes()?,
                _ => bail!("no migration step for schema version {next}"),
            }
            self.db.put(SCHEMA_VERSION_KEY, next.to_string())?;
            info!(from = version, to = next, "applied registry migration");
            version = next;
        }

        Ok(())
    }

    /// Drop and rewrite the hardware-id, credential and owner indexes from the rows.
    pub(crate) fn rebuild_device_indexes(&self) -> Result<()> {
        let mut delete_keys = Vec::new();
        for prefix in ["device_hw:", "device_cred:", "owner_device:"] {
            delete_keys.extend(self.scan_prefix(prefix)?.into_iter().map(|(k, _)| k));
        }

        let devices: Vec<Device> = self.scan_prefix_json("device:")?;
        ensure_unique_claims(&devices)?;

        let txn = self.txn();
        for key in delete_keys {
            txn.delete(key)?;
        }

        for device in &devices {
            if let Some(hw) = device.stable_hardware_id.as_deref() {
                txn.put(Self::hardware_key(hw), device.id.as_bytes())?;
            }
            txn.put(Self::credential_key(&device.credential), device.id.as_bytes())?;
            if let Some(owner) = device.owner_user_id.as_deref() {
                txn.put(Self::owner_key(owner, &device.id), device.id.as_bytes())?;
            }
        }
        txn.commit()?;

        info!(devices = devices.len(), "rebuilt device indexes");
        Ok(())
    }
}

/// Two rows claiming one hardware id or credential cannot be indexed; refuse
/// rather than let the last row silently win.
fn ensure_unique_claims(devices: &[Device]) -> Result<()> {
    let mut hardware: HashMap<&str, &str> = HashMap::new();
    let mut credentials: HashMap<&str, &str> = HashMap::new();

    for device in devices {
        if let Some(hw) = device.stable_hardware_id.as_deref() {
            if let Some(other) = hardware.insert(hw, &device.id) {
                error!(hardware_id = hw, first = other, second = %device.id, "duplicate hardware id");
                bail!("devices {other} and {} share hardware id {hw}", device.id);
            }
        }
        if let Some(other) = credentials.insert(&device.credential, &device.id) {
            error!(first = other, second = %device.id, "duplicate device credential");
            bail!("devices {other} and {} share a credential", device.id);
        }
    }
    Ok(())
}
