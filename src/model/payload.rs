use serde::{Deserialize, Serialize};

/// Metadata for a large object; the bytes live in `StorageService`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payload {
    pub id: String,
    pub device_id: String,
    pub filename: String,
    pub original_name: Option<String>,
    pub mime_type: Option<String>,
    pub size: usize,
    pub created_ts: i64,
}

impl Payload {
    pub fn is_textual(&self) -> bool {
        self.mime_type
            .as_deref()
            .map(|m| {
                let m = m.to_ascii_lowercase();
                m.starts_with("text/") || m.contains("json") || m.contains("xml")
            })
            .unwrap_or(false)
    }
}
