use anyhow::{anyhow, bail, Context, Result};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::cache::{CachedIdentity, IdentityCache};
use crate::{api::types::RegisterResponse, identity::gate::DEVICE_ID_HEADER, model::device::DeviceInfo};

/// HTTP client for a single physical device.
pub struct DeviceClient {
    http: reqwest::Client,
    api_base: String,
    cache: IdentityCache,
}

impl DeviceClient {
    pub fn new(api_base: impl Into<String>, cache: IdentityCache) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            cache,
        }
    }

    /// Pick the server in order: an explicit base, the one the cached
    /// identity was issued by, then `default_base`.
    pub async fn from_cache(
        cache: IdentityCache,
        explicit_base: Option<String>,
        default_base: &str,
    ) -> Self {
        let api_base = match explicit_base {
            Some(base) => base,
            None => cache
                .load()
                .await
                .map(|identity| identity.api_base)
                .unwrap_or_else(|| default_base.to_string()),
        };
        Self::new(api_base, cache)
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    /// Register (or re-register) this machine and refresh the local cache.
    /// The cached id, if any, goes along as the legacy identifier.
    pub async fn register(
        &self,
        display_name: &str,
        hardware_id: Option<&str>,
        rotate_credential: bool,
    ) -> Result<RegisterResponse> {
        let previous = self.cache.load().await;

        let mut req = self
            .http
            .post(format!("{}/api/devices/register", self.api_base))
            .json(&json!({
                "display_name": display_name,
                "stable_hardware_id": hardware_id,
                "rotate_credential": rotate_credential,
            }));
        if let Some(previous) = previous.as_ref() {
            req = req.header(DEVICE_ID_HEADER, &previous.id);
        }

        let registered: RegisterResponse = read_json(req.send().await?).await?;

        self.cache
            .store(&CachedIdentity {
                id: registered.id.clone(),
                credential: registered.credential.clone(),
                api_base: self.api_base.clone(),
            })
            .await?;

        Ok(registered)
    }

    pub async fn device_info(&self) -> Result<DeviceInfo> {
        let req = self.scoped(Method::GET, "/api/devices/me").await?;
        read_json(req.send().await?).await
    }

    pub async fn heartbeat(&self) -> Result<Value> {
        let req = self.scoped(Method::POST, "/api/devices/heartbeat").await?;
        read_json(req.send().await?).await
    }

    /// Build a request carrying the cached credential. The cached id rides
    /// along only as the server's fallback signal.
    async fn scoped(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let identity = self
            .cache
            .load()
            .await
            .ok_or_else(|| anyhow!("device is not registered; run `device_cli register` first"))?;

        Ok(self
            .http
            .request(method, format!("{}{path}", self.api_base))
            .bearer_auth(&identity.credential)
            .header(DEVICE_ID_HEADER, &identity.id))
    }
}

async fn read_json<T: DeserializeOwned>(res: reqwest::Response) -> Result<T> {
    let status = res.status();
    if status.is_success() {
        return res.json().await.context("Invalid JSON from server");
    }

    let body = res.text().await.unwrap_or_default();
    match status {
        StatusCode::FORBIDDEN => bail!(
            "server rejected the cached credential ({status}): {body}; register again to refresh it"
        ),
        _ => bail!("request failed ({status}): {body}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{build_router, state::test_state};
    use tokio::net::TcpListener;

    async fn spawn_server() -> (tempfile::TempDir, String) {
        let (dir, state) = test_state().await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = build_router(state);
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await.unwrap();
        });
        (dir, format!("http://{addr}"))
    }

    #[tokio::test]
    async fn register_then_call_with_cached_identity() {
        let (_server_dir, base) = spawn_server().await;
        let cache_dir = tempfile::tempdir().unwrap();
        let client = DeviceClient::new(&base, IdentityCache::at(cache_dir.path().join("id.json")));

        assert!(client.device_info().await.is_err());

        let first = client.register("Laptop", Some("HW-1"), false).await.unwrap();
        let cached = client.cache().load().await.unwrap();
        assert_eq!(cached.id, first.id);
        assert_eq!(cached.credential, first.credential);

        let info = client.device_info().await.unwrap();
        assert_eq!(info.id, first.id);
        assert_eq!(info.display_name, "Laptop");

        let beat = client.heartbeat().await.unwrap();
        assert_eq!(beat["written"], json!(true));
    }

    #[tokio::test]
    async fn base_url_falls_back_to_cached_identity() {
        let cache_dir = tempfile::tempdir().unwrap();
        let path = cache_dir.path().join("id.json");

        let fresh = DeviceClient::from_cache(IdentityCache::at(&path), None, "http://default:1").await;
        assert_eq!(fresh.api_base(), "http://default:1");

        IdentityCache::at(&path)
            .store(&CachedIdentity {
                id: "dev_1".into(),
                credential: "tok_1".into(),
                api_base: "http://registered:2".into(),
            })
            .await
            .unwrap();

        let cached = DeviceClient::from_cache(IdentityCache::at(&path), None, "http://default:1").await;
        assert_eq!(cached.api_base(), "http://registered:2");

        let explicit = DeviceClient::from_cache(
            IdentityCache::at(&path),
            Some("http://override:3/".into()),
            "http://default:1",
        )
        .await;
        assert_eq!(explicit.api_base(), "http://override:3");
    }

    #[tokio::test]
    async fn stale_process_copy_is_rejected_after_rotation() {
        let (_server_dir, base) = spawn_server().await;
        let cache_dir = tempfile::tempdir().unwrap();
        let shared = cache_dir.path().join("id.json");
        let stale_copy = cache_dir.path().join("stale.json");

        let main = DeviceClient::new(&base, IdentityCache::at(&shared));
        let first = main.register("Laptop", Some("HW-2"), false).await.unwrap();

        // A second process that copied the identity before rotation.
        let stale = DeviceClient::new(&base, IdentityCache::at(&stale_copy));
        stale
            .cache()
            .store(&main.cache().load().await.unwrap())
            .await
            .unwrap();

        let rotated = main.register("Laptop", Some("HW-2"), true).await.unwrap();
        assert_eq!(rotated.id, first.id);
        assert_ne!(rotated.credential, first.credential);

        assert!(main.device_info().await.is_ok());
        let err = stale.device_info().await.unwrap_err();
        assert!(err.to_string().contains("403"));

        // Re-registering from the stale process converges on the same row.
        let refreshed = stale.register("Laptop", Some("HW-2"), false).await.unwrap();
        assert_eq!(refreshed.id, first.id);
        assert_eq!(refreshed.credential, rotated.credential);
        assert!(stale.device_info().await.is_ok());
    }
}
