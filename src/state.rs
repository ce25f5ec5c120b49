use std::sync::Arc;

use anyhow::Result;

use crate::{config::AppConfig, db::DBLayer, storage::StorageService};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DBLayer>,
    pub storage: StorageService,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn open(config: AppConfig) -> Result<Self> {
        let db = Arc::new(DBLayer::new(&config.db_path)?);
        let storage = StorageService::new(&config.payload_dir).await?;
        Ok(Self {
            db,
            storage,
            config: Arc::new(config),
        })
    }
}

#[cfg(test)]
pub(crate) async fn test_state() -> (tempfile::TempDir, AppState) {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = AppState::open(AppConfig::for_tests(dir.path()))
        .await
        .expect("open state");
    (dir, state)
}
