use anyhow::Result;

use super::DBLayer;
use crate::model::capture::Capture;

impl DBLayer {
    // ============================================================
    // CAPTURE STORAGE (DEVICE-ORDERED)
    // ============================================================
    fn capture_prefix(device_id: &str) -> String {
        format!("capture:{device_id}:")
    }

    fn capture_key(device_id: &str, ts: i64, id: &str) -> String {
        // zero-padded timestamp keeps keys in capture order
        format!("{}{:020}:{id}", Self::capture_prefix(device_id), ts.max(0))
    }

    fn capture_index_key(device_id: &str, id: &str) -> String {
        format!("capture_idx:{device_id}:{id}")
    }

    pub async fn save_capture(&self, capture: &Capture) -> Result<()> {
        let key = Self::capture_key(&capture.device_id, capture.captured_at, &capture.id);
        let txn = self.txn();
        txn.put(&key, serde_json::to_vec(capture)?)?;
        txn.put(
            Self::capture_index_key(&capture.device_id, &capture.id),
            key.as_bytes(),
        )?;
        txn.commit()?;
        Ok(())
    }

    /// Newest first, at most `limit` entries.
    pub async fn list_recent_captures(&self, device_id: &str, limit: usize) -> Result<Vec<Capture>> {
        self.scan_prefix_rev_json(&Self::capture_prefix(device_id), limit)
    }

    /// Lookup is keyed by device, so another device's capture id simply misses.
    pub async fn load_capture(&self, device_id: &str, id: &str) -> Result<Option<Capture>> {
        let Some(key) = self.get_string(&Self::capture_index_key(device_id, id))? else {
            return Ok(None);
        };
        self.get_json(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_temp;
    use serde_json::json;

    fn capture(device_id: &str, id: &str, ts: i64) -> Capture {
        Capture {
            id: id.into(),
            device_id: device_id.into(),
            kind: "location".into(),
            captured_at: ts,
            received_at: ts,
            data: json!({ "seq": ts }),
        }
    }

    #[tokio::test]
    async fn recent_captures_are_newest_first_and_scoped() {
        let (_dir, db) = open_temp();
        for (i, ts) in [5, 1, 9].into_iter().enumerate() {
            db.save_capture(&capture("dev_a", &format!("c{i}"), ts))
                .await
                .unwrap();
        }
        db.save_capture(&capture("dev_b", "other", 50)).await.unwrap();

        let recent = db.list_recent_captures("dev_a", 2).await.unwrap();
        let ts: Vec<_> = recent.iter().map(|c| c.captured_at).collect();
        assert_eq!(ts, vec![9, 5]);
        assert!(recent.iter().all(|c| c.device_id == "dev_a"));
    }

    #[tokio::test]
    async fn long_history_returns_only_newest_window() {
        let (_dir, db) = open_temp();
        for ts in 1..=250 {
            db.save_capture(&capture("dev_a", &format!("c{ts}"), ts))
                .await
                .unwrap();
        }
        db.save_capture(&capture("dev_b", "later", 999)).await.unwrap();

        let recent = db.list_recent_captures("dev_a", 200).await.unwrap();
        assert_eq!(recent.len(), 200);
        let ts: Vec<_> = recent.iter().map(|c| c.captured_at).collect();
        let expected: Vec<i64> = (51..=250).rev().collect();
        assert_eq!(ts, expected);
        assert!(db.list_recent_captures("dev_a", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn capture_lookup_is_device_scoped() {
        let (_dir, db) = open_temp();
        db.save_capture(&capture("dev_b", "cap_b", 3)).await.unwrap();

        assert!(db.load_capture("dev_a", "cap_b").await.unwrap().is_none());
        assert!(db.load_capture("dev_b", "cap_b").await.unwrap().is_some());
    }
}
