//! Local filesystem storage implementation.
//!
//! Every write goes to a temporary file first and is renamed into place, so
//! readers never observe a partially written file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{AnalysisReport, SessionSnapshot};
use crate::pipeline::ExportArtifact;
use crate::storage::ResultStore;

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(path)
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<PathBuf> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read JSON data, returning None if the file doesn't exist.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match tokio::fs::read(self.path(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    fn session_key(id: Uuid) -> String {
        format!("sessions/{id}.json")
    }
}

#[async_trait]
impl ResultStore for LocalStorage {
    async fn save_export(&self, artifact: &ExportArtifact) -> Result<String> {
        let key = format!("exports/{}.{}", artifact.session_id, artifact.extension());
        let path = self.write_bytes(&key, &artifact.render()?).await?;
        log::info!("Exported {} record(s) to {}", artifact.len(), path.display());
        Ok(path.display().to_string())
    }

    async fn save_summary(&self, snapshot: &SessionSnapshot) -> Result<()> {
        self.write_json(&Self::session_key(snapshot.id), snapshot).await?;
        Ok(())
    }

    async fn load_summary(&self, id: Uuid) -> Result<Option<SessionSnapshot>> {
        self.read_json(&Self::session_key(id)).await
    }

    async fn save_locators(&self, report: &AnalysisReport) -> Result<String> {
        let key = format!("locators/{}.json", report.locators.fingerprint());
        let path = self.write_json(&key, report).await?;
        log::info!("Saved locator set to {}", path.display());
        Ok(path.display().to_string())
    }
}
