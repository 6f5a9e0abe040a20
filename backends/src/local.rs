use async_trait::async_trait;
use bytes::Bytes;
use clustersnap_core::storage::{Backend, ObjectInfo};
use clustersnap_core::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Filesystem-backed object store. Keys map to relative paths under the
/// base directory; writes publish via tmp-then-rename so a crashed put
/// never leaves a readable half-object.
pub struct LocalBackend {
    base_path: PathBuf,
}

impl LocalBackend {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub async fn create<P: AsRef<Path>>(base_path: P) -> Result<Self> {
        fs::create_dir_all(base_path.as_ref()).await?;
        Ok(Self::new(base_path))
    }

    fn full_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let full_path = self.full_path(key);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut tmp = full_path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, &data)
            .await
            .map_err(|e| Error::Backend(format!("Failed to write {}: {}", key, e)))?;
        fs::rename(&tmp, &full_path)
            .await
            .map_err(|e| Error::Backend(format!("Failed to publish {}: {}", key, e)))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let data = fs::read(self.full_path(key))
            .await
            .map_err(|e| Error::Backend(format!("Failed to read {}: {}", key, e)))?;
        Ok(Bytes::from(data))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.full_path(key).exists())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut results = Vec::new();
        if !self.base_path.exists() {
            return Ok(results);
        }
        for entry in walkdir::WalkDir::new(&self.base_path)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let key = match entry.path().strip_prefix(&self.base_path) {
                Ok(p) => p.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            if key.starts_with(prefix) && !key.ends_with(".tmp") {
                results.push(key);
            }
        }
        Ok(results)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.full_path(key);
        if full_path.is_file() {
            fs::remove_file(&full_path)
                .await
                .map_err(|e| Error::Backend(format!("Failed to delete {}: {}", key, e)))?;
        }
        Ok(())
    }

    async fn stat(&self, key: &str) -> Result<ObjectInfo> {
        let metadata = fs::metadata(self.full_path(key))
            .await
            .map_err(|e| Error::Backend(format!("Failed to stat {}: {}", key, e)))?;
        Ok(ObjectInfo {
            key: key.to_string(),
            size: metadata.len(),
        })
    }
}
