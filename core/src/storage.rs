use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// The object-store surface the core is written against.
///
/// Every operation is individually atomic and idempotent; nothing here
/// assumes multi-key transactions. Concurrent `put`s of the same key are
/// only ever issued for identical content (keys are content-derived), so
/// any writer winning is correct.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Bytes>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn stat(&self, key: &str) -> Result<ObjectInfo>;
}

#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

/// In-memory backend used by tests and scratch runs.
///
/// `fail_puts` arms forced failures for a key: the next `n` puts of that
/// key return a transient error, then the backend behaves normally again.
#[derive(Default)]
pub struct MemoryBackend {
    objects: RwLock<BTreeMap<String, Bytes>>,
    put_failures: std::sync::Mutex<HashMap<String, u32>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_puts(&self, key: &str, count: u32) {
        self.put_failures
            .lock()
            .expect("put_failures lock poisoned")
            .insert(key.to_string(), count);
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    fn take_forced_failure(&self, key: &str) -> bool {
        let mut failures = self
            .put_failures
            .lock()
            .expect("put_failures lock poisoned");
        match failures.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        if self.take_forced_failure(key) {
            return Err(Error::Transient(format!("injected put failure for {key}")));
        }
        self.objects.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::Backend(format!("no such object: {key}")))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn stat(&self, key: &str) -> Result<ObjectInfo> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|data| ObjectInfo {
                key: key.to_string(),
                size: data.len() as u64,
            })
            .ok_or_else(|| Error::Backend(format!("no such object: {key}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_round_trip() {
        let backend = MemoryBackend::new();
        backend
            .put("segments/abc", Bytes::from_static(b"data"))
            .await
            .unwrap();
        assert_eq!(backend.get("segments/abc").await.unwrap().as_ref(), b"data");
        assert!(backend.exists("segments/abc").await.unwrap());
        assert_eq!(backend.stat("segments/abc").await.unwrap().size, 4);
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let backend = MemoryBackend::new();
        backend.put("manifests/b/n1", Bytes::new()).await.unwrap();
        backend.put("manifests/b/n2", Bytes::new()).await.unwrap();
        backend.put("segments/aa", Bytes::new()).await.unwrap();
        let keys = backend.list("manifests/").await.unwrap();
        assert_eq!(keys, vec!["manifests/b/n1", "manifests/b/n2"]);
    }

    #[tokio::test]
    async fn forced_failures_are_consumed() {
        let backend = MemoryBackend::new();
        backend.fail_puts("k", 1);
        assert!(backend.put("k", Bytes::new()).await.is_err());
        assert!(backend.put("k", Bytes::new()).await.is_ok());
    }

    #[tokio::test]
    async fn get_missing_is_an_error() {
        let backend = MemoryBackend::new();
        assert!(backend.get("nope").await.is_err());
    }
}
