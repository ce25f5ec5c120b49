use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

const CACHE_DIR: &str = "devicegate";
const CACHE_FILE: &str = "identity.json";

/// Local mirror of the registry row. Not authoritative: any process may hold a
/// stale copy, and the server never trusts it beyond the credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedIdentity {
    pub id: String,
    pub credential: String,
    pub api_base: String,
}

/// File-backed cache shared by every client process on the machine.
///
/// Reads always go to disk because another process may have refreshed the
/// file. Writes replace the file atomically, so readers see either the old or
/// the new copy.
#[derive(Debug, Clone)]
pub struct IdentityCache {
    path: PathBuf,
}

impl IdentityCache {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_location() -> Result<Self> {
        let dir = dirs::config_dir().ok_or_else(|| anyhow!("no config directory on this platform"))?;
        Ok(Self::at(dir.join(CACHE_DIR).join(CACHE_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when the file is absent or unreadable; a broken cache just means
    /// registering again.
    pub async fn load(&self) -> Option<CachedIdentity> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "identity cache unreadable");
                return None;
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "identity cache corrupt; ignoring");
                None
            }
        }
    }

    pub async fn store(&self, identity: &CachedIdentity) -> Result<()> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| anyhow!("cache path has no parent: {}", self.path.display()))?;
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let tmp = dir.join(format!(
            ".{CACHE_FILE}.{}.tmp",
            uuid::Uuid::new_v4().simple()
        ));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(identity)?)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("Failed to replace {}", self.path.display()));
        }
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(credential: &str) -> CachedIdentity {
        CachedIdentity {
            id: "dev_1".into(),
            credential: credential.into(),
            api_base: "http://localhost:3000".into(),
        }
    }

    #[tokio::test]
    async fn missing_or_corrupt_cache_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IdentityCache::at(dir.path().join("nested/identity.json"));
        assert!(cache.load().await.is_none());

        tokio::fs::create_dir_all(dir.path().join("nested")).await.unwrap();
        tokio::fs::write(cache.path(), b"{not json").await.unwrap();
        assert!(cache.load().await.is_none());
    }

    #[tokio::test]
    async fn second_process_sees_latest_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        let writer = IdentityCache::at(&path);
        let reader = IdentityCache::at(&path);

        writer.store(&identity("tok_1")).await.unwrap();
        assert_eq!(reader.load().await, Some(identity("tok_1")));

        writer.store(&identity("tok_2")).await.unwrap();
        assert_eq!(reader.load().await.unwrap().credential, "tok_2");

        reader.clear().await.unwrap();
        assert!(writer.load().await.is_none());
        reader.clear().await.unwrap();
    }
}
