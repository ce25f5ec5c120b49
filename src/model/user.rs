use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Subject from the identity provider, e.g. `email:alice@example.com`.
    pub external_subject: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub created_ts: i64,
    #[serde(default)]
    pub password_hash: Option<String>,
}
