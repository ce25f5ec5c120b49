use anyhow::{anyhow, bail, Result};

use super::{txn_get_json, txn_put_json, DBLayer};
use crate::model::device::Device;

/// Result of trying to create a fresh row.
#[derive(Debug)]
pub enum InsertOutcome {
    Inserted(Device),
    /// Another row already holds this hardware id. Caller must re-resolve.
    HardwareIdTaken,
}

/// Result of trying to backfill a hardware id onto a legacy row.
#[derive(Debug)]
pub enum AdoptOutcome {
    Adopted(Device),
    /// No row with that id, or the row already has a hardware id.
    NotEligible,
    HardwareIdTaken,
}

#[derive(Debug)]
pub enum OwnerOutcome {
    Linked(Device),
    AlreadyOwned(Device),
    OwnedByOther,
    DeviceMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub written: bool,
    pub last_bridge_call_at: Option<i64>,
}

impl DBLayer {
    // ============================================================
    // DEVICE REGISTRY
    // ============================================================
    pub(crate) fn device_key(id: &str) -> String {
        format!("device:{id}")
    }

    pub(crate) fn hardware_key(hardware_id: &str) -> String {
        format!("device_hw:{hardware_id}")
    }

    pub(crate) fn credential_key(credential: &str) -> String {
        format!("device_cred:{credential}")
    }

    pub(crate) fn owner_prefix(user_id: &str) -> String {
        format!("owner_device:{user_id}:")
    }

    pub(crate) fn owner_key(user_id: &str, device_id: &str) -> String {
        format!("{}{device_id}", Self::owner_prefix(user_id))
    }

    pub async fn load_device(&self, id: &str) -> Result<Option<Device>> {
        self.get_json(&Self::device_key(id))
    }

    pub async fn find_device_by_hardware_id(&self, hardware_id: &str) -> Result<Option<Device>> {
        let Some(id) = self.get_string(&Self::hardware_key(hardware_id))? else {
            return Ok(None);
        };
        Ok(self
            .load_device(&id)
            .await?
            .filter(|d| d.stable_hardware_id.as_deref() == Some(hardware_id)))
    }

    /// Index lookup, then confirm against the row so a stale index entry never authorizes.
    pub async fn find_device_by_credential(&self, credential: &str) -> Result<Option<Device>> {
        let Some(id) = self.get_string(&Self::credential_key(credential))? else {
            return Ok(None);
        };
        Ok(self
            .load_device(&id)
            .await?
            .filter(|d| d.credential == credential))
    }

    pub async fn list_all_devices(&self) -> Result<Vec<Device>> {
        self.scan_prefix_json("device:")
    }

    pub async fn list_devices_for_owner(&self, user_id: &str) -> Result<Vec<Device>> {
        let mut out = Vec::new();
        for (_, val) in self.scan_prefix(&Self::owner_prefix(user_id))? {
            let id = String::from_utf8(val)?;
            if let Some(device) = self.load_device(&id).await? {
                if device.owner_user_id.as_deref() == Some(user_id) {
                    out.push(device);
                }
            }
        }
        Ok(out)
    }

    /// Insert a new row with its indexes. The hardware-id index is the arbiter:
    /// if another writer got there first the transaction is abandoned.
    pub async fn insert_device(&self, device: &Device) -> Result<InsertOutcome> {
        let txn = self.txn();

        if let Some(hw) = device.stable_hardware_id.as_deref() {
            if txn.get_for_update(Self::hardware_key(hw), true)?.is_some() {
                return Ok(InsertOutcome::HardwareIdTaken);
            }
            txn.put(Self::hardware_key(hw), device.id.as_bytes())?;
        }

        let row_key = Self::device_key(&device.id);
        if txn.get_for_update(&row_key, true)?.is_some() {
            bail!("device id collision for {}", device.id);
        }
        txn_put_json(&txn, &row_key, device)?;

        claim_credential(&txn, &device.credential, &device.id)?;

        txn.commit()?;
        Ok(InsertOutcome::Inserted(device.clone()))
    }

    /// Refresh the row owning `hardware_id`. With `new_credential` the old
    /// credential index entry is dropped in the same transaction.
    pub async fn refresh_by_hardware_id(
        &self,
        hardware_id: &str,
        display_name: &str,
        now: i64,
        new_credential: Option<&str>,
    ) -> Result<Option<Device>> {
        let txn = self.txn();

        let Some(id) = txn.get_for_update(Self::hardware_key(hardware_id), true)? else {
            return Ok(None);
        };
        let id = String::from_utf8(id)?;
        let row_key = Self::device_key(&id);
        let mut device: Device = txn_get_json(&txn, &row_key)?
            .ok_or_else(|| anyhow!("hardware index points at missing device {id}"))?;

        device.display_name = display_name.to_string();
        device.last_seen_at = now;
        if let Some(credential) = new_credential {
            rotate_credential(&txn, &mut device, credential)?;
        }

        txn_put_json(&txn, &row_key, &device)?;
        txn.commit()?;
        Ok(Some(device))
    }

    /// Backfill `hardware_id` onto a row that has none yet. One-time per row.
    pub async fn adopt_legacy(
        &self,
        legacy_id: &str,
        hardware_id: &str,
        display_name: &str,
        now: i64,
        new_credential: Option<&str>,
    ) -> Result<AdoptOutcome> {
        let txn = self.txn();

        let hw_key = Self::hardware_key(hardware_id);
        if txn.get_for_update(&hw_key, true)?.is_some() {
            return Ok(AdoptOutcome::HardwareIdTaken);
        }

        let row_key = Self::device_key(legacy_id);
        let Some(mut device) = txn_get_json::<Device>(&txn, &row_key)? else {
            return Ok(AdoptOutcome::NotEligible);
        };
        if device.stable_hardware_id.is_some() {
            return Ok(AdoptOutcome::NotEligible);
        }

        device.stable_hardware_id = Some(hardware_id.to_string());
        device.display_name = display_name.to_string();
        device.last_seen_at = now;
        if let Some(credential) = new_credential {
            rotate_credential(&txn, &mut device, credential)?;
        }

        txn.put(&hw_key, device.id.as_bytes())?;
        txn_put_json(&txn, &row_key, &device)?;
        txn.commit()?;
        Ok(AdoptOutcome::Adopted(device))
    }

    /// Write the bridge heartbeat only when the previous one is older than
    /// `debounce_secs`. Returns `None` when the device does not exist.
    pub async fn touch_heartbeat(
        &self,
        device_id: &str,
        now: i64,
        debounce_secs: i64,
    ) -> Result<Option<Heartbeat>> {
        let txn = self.txn();
        let row_key = Self::device_key(device_id);

        let Some(mut device) = txn_get_json::<Device>(&txn, &row_key)? else {
            return Ok(None);
        };

        if !device.heartbeat_due(now, debounce_secs) {
            return Ok(Some(Heartbeat {
                written: false,
                last_bridge_call_at: device.last_bridge_call_at,
            }));
        }

        device.last_bridge_call_at = Some(now);
        txn_put_json(&txn, &row_key, &device)?;
        txn.commit()?;
        Ok(Some(Heartbeat {
            written: true,
            last_bridge_call_at: Some(now),
        }))
    }

    /// Conditional owner write. A row already pinned to someone else is left untouched.
    pub async fn link_owner(&self, device_id: &str, user_id: &str) -> Result<OwnerOutcome> {
        let txn = self.txn();
        let row_key = Self::device_key(device_id);

        let Some(mut device) = txn_get_json::<Device>(&txn, &row_key)? else {
            return Ok(OwnerOutcome::DeviceMissing);
        };

        match device.owner_user_id.as_deref() {
            Some(owner) if owner == user_id => return Ok(OwnerOutcome::AlreadyOwned(device)),
            Some(_) => return Ok(OwnerOutcome::OwnedByOther),
            None => {}
        }

        device.owner_user_id = Some(user_id.to_string());
        txn_put_json(&txn, &row_key, &device)?;
        txn.put(Self::owner_key(user_id, device_id), device_id.as_bytes())?;
        txn.commit()?;
        Ok(OwnerOutcome::Linked(device))
    }
}

fn claim_credential(
    txn: &rocksdb::Transaction<'_, rocksdb::TransactionDB>,
    credential: &str,
    device_id: &str,
) -> Result<()> {
    let key = DBLayer::credential_key(credential);
    if txn.get_for_update(&key, true)?.is_some() {
        bail!("credential collision while issuing for {device_id}");
    }
    txn.put(&key, device_id.as_bytes())?;
    Ok(())
}

/// Overwrite, not append: the previous credential stops resolving at commit.
fn rotate_credential(
    txn: &rocksdb::Transaction<'_, rocksdb::TransactionDB>,
    device: &mut Device,
    credential: &str,
) -> Result<()> {
    claim_credential(txn, credential, &device.id)?;
    txn.delete(DBLayer::credential_key(&device.credential))?;
    device.credential = credential.to_string();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_temp;

    fn device(id: &str, hw: Option<&str>, credential: &str) -> Device {
        Device {
            id: id.into(),
            stable_hardware_id: hw.map(Into::into),
            display_name: "Phone".into(),
            credential: credential.into(),
            owner_user_id: None,
            registered_at: 10,
            last_seen_at: 10,
            last_bridge_call_at: None,
        }
    }

    #[tokio::test]
    async fn second_insert_with_same_hardware_id_is_refused() {
        let (_dir, db) = open_temp();
        let first = db
            .insert_device(&device("dev_a", Some("VID-1"), "tok_a"))
            .await
            .unwrap();
        assert!(matches!(first, InsertOutcome::Inserted(_)));

        let second = db
            .insert_device(&device("dev_b", Some("VID-1"), "tok_b"))
            .await
            .unwrap();
        assert!(matches!(second, InsertOutcome::HardwareIdTaken));
        assert!(db.load_device("dev_b").await.unwrap().is_none());
        assert!(db.find_device_by_credential("tok_b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rotation_drops_old_credential_index() {
        let (_dir, db) = open_temp();
        db.insert_device(&device("dev_a", Some("VID-1"), "tok_a"))
            .await
            .unwrap();

        let refreshed = db
            .refresh_by_hardware_id("VID-1", "Renamed", 20, Some("tok_new"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(refreshed.credential, "tok_new");
        assert_eq!(refreshed.display_name, "Renamed");
        assert_eq!(refreshed.last_seen_at, 20);

        assert!(db.find_device_by_credential("tok_a").await.unwrap().is_none());
        let found = db.find_device_by_credential("tok_new").await.unwrap().unwrap();
        assert_eq!(found.id, "dev_a");
    }

    #[tokio::test]
    async fn adoption_only_applies_to_rows_without_hardware_id() {
        let (_dir, db) = open_temp();
        db.insert_device(&device("dev_old", None, "tok_old"))
            .await
            .unwrap();
        db.insert_device(&device("dev_new", Some("VID-9"), "tok_new"))
            .await
            .unwrap();

        let adopted = db
            .adopt_legacy("dev_old", "VID-2", "Phone", 30, None)
            .await
            .unwrap();
        let AdoptOutcome::Adopted(row) = adopted else {
            panic!("expected adoption, got {adopted:?}");
        };
        assert_eq!(row.stable_hardware_id.as_deref(), Some("VID-2"));
        assert_eq!(row.credential, "tok_old");

        // Second adoption of the same row is not allowed.
        let again = db
            .adopt_legacy("dev_old", "VID-3", "Phone", 31, None)
            .await
            .unwrap();
        assert!(matches!(again, AdoptOutcome::NotEligible));

        let taken = db
            .adopt_legacy("dev_missing", "VID-9", "Phone", 31, None)
            .await
            .unwrap();
        assert!(matches!(taken, AdoptOutcome::HardwareIdTaken));
    }

    #[tokio::test]
    async fn heartbeat_is_debounced() {
        let (_dir, db) = open_temp();
        db.insert_device(&device("dev_a", None, "tok_a")).await.unwrap();

        let first = db.touch_heartbeat("dev_a", 100, 60).await.unwrap().unwrap();
        let second = db.touch_heartbeat("dev_a", 130, 60).await.unwrap().unwrap();
        let third = db.touch_heartbeat("dev_a", 161, 60).await.unwrap().unwrap();

        assert!(first.written);
        assert!(!second.written);
        assert_eq!(second.last_bridge_call_at, Some(100));
        assert!(third.written);
        assert!(db.touch_heartbeat("dev_x", 1, 60).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn owner_is_pinned_once_set() {
        let (_dir, db) = open_temp();
        db.insert_device(&device("dev_a", None, "tok_a")).await.unwrap();

        assert!(matches!(
            db.link_owner("dev_a", "user_u").await.unwrap(),
            OwnerOutcome::Linked(_)
        ));
        assert!(matches!(
            db.link_owner("dev_a", "user_u").await.unwrap(),
            OwnerOutcome::AlreadyOwned(_)
        ));
        assert!(matches!(
            db.link_owner("dev_a", "user_v").await.unwrap(),
            OwnerOutcome::OwnedByOther
        ));

        let owned = db.list_devices_for_owner("user_u").await.unwrap();
        assert_eq!(owned.len(), 1);
        assert!(db.list_devices_for_owner("user_v").await.unwrap().is_empty());
    }
}
