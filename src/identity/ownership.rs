use tracing::{info, warn};

use crate::{
    db::{devices::OwnerOutcome, DBLayer},
    error::ApiError,
    model::device::Device,
};

/// Bind a device to a user. Once pinned, a device never moves to another user.
pub async fn link_device(db: &DBLayer, device_id: &str, user_id: &str) -> Result<Device, ApiError> {
    let device_id = device_id.trim();
    if device_id.is_empty() {
        return Err(ApiError::validation("device_id_required"));
    }

    match db.link_owner(device_id, user_id).await? {
        OwnerOutcome::Linked(device) => {
            info!(device_id, user_id, "device linked to user");
            Ok(device)
        }
        OwnerOutcome::AlreadyOwned(device) => Ok(device),
        OwnerOutcome::OwnedByOther => {
            warn!(device_id, user_id, "refused to relink device pinned to another user");
            Err(ApiError::Conflict(
                "device is already linked to another account".into(),
            ))
        }
        OwnerOutcome::DeviceMissing => Err(ApiError::NotFound("device_not_found".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::open_temp,
        identity::resolver::{resolve_registration, Registration},
    };

    #[tokio::test]
    async fn second_user_cannot_take_a_pinned_device() {
        let (_dir, db) = open_temp();
        let reg = Registration::validate("Phone", Some("VID-1"), None, false).unwrap();
        let device = resolve_registration(&db, &reg).await.unwrap().device;

        let linked = link_device(&db, &device.id, "user_u").await.unwrap();
        assert_eq!(linked.owner_user_id.as_deref(), Some("user_u"));

        // Same user again is a no-op.
        link_device(&db, &device.id, "user_u").await.unwrap();

        let err = link_device(&db, &device.id, "user_v").await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let row = db.load_device(&device.id).await.unwrap().unwrap();
        assert_eq!(row.owner_user_id.as_deref(), Some("user_u"));
    }

    #[tokio::test]
    async fn unknown_device_is_not_found() {
        let (_dir, db) = open_temp();
        let err = link_device(&db, "dev_missing", "user_u").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
