use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
};
use uuid::Uuid;

/// Payload bytes on disk, one directory per device.
#[derive(Clone)]
pub struct StorageService {
    root: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    pub id: String,
    pub filename: String,
    pub size: usize,
}

/// A read bounded by a byte cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CappedRead {
    pub bytes: Vec<u8>,
    pub total_size: u64,
}

impl CappedRead {
    pub fn truncated(&self) -> bool {
        (self.bytes.len() as u64) < self.total_size
    }
}

impl StorageService {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create storage dir at {}", root.display()))?;

        Ok(Self { root })
    }

    fn device_dir(&self, device_id: &str) -> Result<PathBuf> {
        if !is_safe_component(device_id) {
            bail!("unsafe device id for storage path: {device_id:?}");
        }
        Ok(self.root.join(device_id))
    }

    fn file_path(&self, device_id: &str, filename: &str) -> Result<PathBuf> {
        if !is_safe_component(filename) {
            bail!("unsafe filename for storage path: {filename:?}");
        }
        Ok(self.device_dir(device_id)?.join(filename))
    }

    pub async fn save(
        &self,
        device_id: &str,
        bytes: &[u8],
        original_name: Option<&str>,
    ) -> Result<StoredFile> {
        let ext = original_name
            .and_then(|name| Path::new(name).extension().and_then(|e| e.to_str()))
            .and_then(clean_extension);

        let id = Uuid::new_v4().simple().to_string();
        let filename = match ext {
            Some(ext) if !ext.is_empty() => format!("{id}.{ext}"),
            _ => id.clone(),
        };

        let dir = self.device_dir(device_id)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create device dir {}", dir.display()))?;

        let path = dir.join(&filename);
        let mut file = File::create(&path)
            .await
            .with_context(|| format!("Failed to create file {}", path.display()))?;

        file.write_all(bytes)
            .await
            .with_context(|| format!("Failed to write file {}", path.display()))?;
        file.flush().await?;

        Ok(StoredFile {
            id,
            filename,
            size: bytes.len(),
        })
    }

    pub async fn read(&self, device_id: &str, filename: &str) -> Result<Vec<u8>> {
        let path = self.file_path(device_id, filename)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read file {}", path.display()))
    }

    /// Missing files are fine; this runs on cleanup paths.
    pub async fn remove(&self, device_id: &str, filename: &str) -> Result<()> {
        let path = self.file_path(device_id, filename)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove file {}", path.display())),
        }
    }

    /// Read at most `cap` bytes, reporting the full size alongside.
    pub async fn read_capped(&self, device_id: &str, filename: &str, cap: usize) -> Result<CappedRead> {
        let path = self.file_path(device_id, filename)?;
        let file = File::open(&path)
            .await
            .with_context(|| format!("Failed to open file {}", path.display()))?;
        let total_size = file.metadata().await?.len();

        let mut bytes = Vec::with_capacity(cap.min(total_size as usize));
        file.take(cap as u64)
            .read_to_end(&mut bytes)
            .await
            .with_context(|| format!("Failed to read file {}", path.display()))?;

        Ok(CappedRead { bytes, total_size })
    }
}

fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

fn clean_extension(ext: &str) -> Option<String> {
    let filtered: String = ext.chars().filter(|c| c.is_ascii_alphanumeric()).collect();

    if filtered.is_empty() {
        None
    } else {
        Some(filtered.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capped_read_reports_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageService::new(dir.path()).await.unwrap();

        let stored = storage
            .save("dev_a", b"0123456789", Some("log.TXT"))
            .await
            .unwrap();
        assert!(stored.filename.ends_with(".txt"));

        let short = storage.read_capped("dev_a", &stored.filename, 4).await.unwrap();
        assert_eq!(short.bytes, b"0123");
        assert_eq!(short.total_size, 10);
        assert!(short.truncated());

        let full = storage.read_capped("dev_a", &stored.filename, 64).await.unwrap();
        assert!(!full.truncated());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageService::new(dir.path()).await.unwrap();
        let stored = storage.save("dev_a", b"x", None).await.unwrap();

        storage.remove("dev_a", &stored.filename).await.unwrap();
        assert!(storage.read("dev_a", &stored.filename).await.is_err());
        storage.remove("dev_a", &stored.filename).await.unwrap();
        assert!(storage.remove("dev_a", "../escape").await.is_err());
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageService::new(dir.path()).await.unwrap();
        assert!(storage.read("dev_a", "../secret").await.is_err());
        assert!(storage.save("..", b"x", None).await.is_err());
    }

    #[test]
    fn extension_is_sanitized() {
        assert_eq!(clean_extension("J.p-G"), Some("jpg".into()));
        assert_eq!(clean_extension("--"), None);
    }
}
