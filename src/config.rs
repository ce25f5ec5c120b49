use std::path::PathBuf;

use anyhow::{Context, Result};

/// Runtime settings, read once from the environment (`.env` honoured).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub db_path: PathBuf,
    pub payload_dir: PathBuf,
    pub jwt_secret: String,
    pub jwt_ttl_secs: i64,
    pub heartbeat_debounce_secs: i64,
    pub bridge_payload_cap_bytes: usize,
    pub max_upload_bytes: usize,
    pub allow_legacy_fallback: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let jwt_secret = dotenvy::var("JWT_SECRET").context("JWT_SECRET must be set")?;

        Ok(Self {
            bind_addr: dotenvy::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            db_path: dotenvy::var("DB_PATH")
                .unwrap_or_else(|_| "devicedb".to_string())
                .into(),
            payload_dir: dotenvy::var("PAYLOAD_DIR")
                .unwrap_or_else(|_| "payloads".to_string())
                .into(),
            jwt_secret,
            jwt_ttl_secs: parse_var("JWT_TTL_SECS", 60 * 60 * 24 * 7)?,
            heartbeat_debounce_secs: parse_var("HEARTBEAT_DEBOUNCE_SECS", 60)?,
            bridge_payload_cap_bytes: parse_var("BRIDGE_PAYLOAD_CAP_BYTES", 64 * 1024)?,
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
            allow_legacy_fallback: parse_var("ALLOW_LEGACY_FALLBACK", true)?,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match dotenvy::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} has an invalid value: {raw:?}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
impl AppConfig {
    pub(crate) fn for_tests(root: &std::path::Path) -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            db_path: root.join("db"),
            payload_dir: root.join("payloads"),
            jwt_secret: "test-secret".to_string(),
            jwt_ttl_secs: 3600,
            heartbeat_debounce_secs: 60,
            bridge_payload_cap_bytes: 16,
            max_upload_bytes: 1024 * 1024,
            allow_legacy_fallback: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::parse_var;

    #[test]
    fn missing_var_uses_default() {
        let value: i64 = parse_var("DEVICEGATE_TEST_UNSET_VAR", 42).unwrap();
        assert_eq!(value, 42);
    }
}
