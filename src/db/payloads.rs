use anyhow::Result;

use super::DBLayer;
use crate::model::payload::Payload;

impl DBLayer {
    // ============================================================
    // PAYLOAD METADATA
    // ============================================================
    fn payload_prefix(device_id: &str) -> String {
        format!("payload:{device_id}:")
    }

    fn payload_key(device_id: &str, id: &str) -> String {
        format!("{}{id}", Self::payload_prefix(device_id))
    }

    pub async fn save_payload(&self, payload: &Payload) -> Result<()> {
        let key = Self::payload_key(&payload.device_id, &payload.id);
        self.db.put(key, serde_json::to_vec(payload)?)?;
        Ok(())
    }

    pub async fn load_payload(&self, device_id: &str, id: &str) -> Result<Option<Payload>> {
        self.get_json(&Self::payload_key(device_id, id))
    }

    pub async fn list_payloads(&self, device_id: &str) -> Result<Vec<Payload>> {
        let mut payloads: Vec<Payload> = self.scan_prefix_json(&Self::payload_prefix(device_id))?;
        payloads.sort_by(|a, b| b.created_ts.cmp(&a.created_ts).then_with(|| a.id.cmp(&b.id)));
        Ok(payloads)
    }
}
