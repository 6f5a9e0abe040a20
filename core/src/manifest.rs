use crate::storage::Backend;
use crate::{BackupId, Error, NodeId, Result, SegmentEntry, keys};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestStatus {
    InProgress,
    Complete,
    Failed,
}

/// Immutable record of one backup attempt for one node.
///
/// A manifest is written to the backend only after the fate of the attempt
/// is known; once `Complete` it is never edited in place — corrections are
/// a new manifest under a new backup id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub backup_id: BackupId,
    pub node_id: NodeId,
    pub started_at: DateTime<Utc>,
    pub segments: Vec<SegmentEntry>,
    pub cluster_metadata: serde_json::Value,
    pub status: ManifestStatus,
    /// Present on failed manifests: what went wrong, for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl Manifest {
    pub fn new(
        backup_id: BackupId,
        node_id: NodeId,
        segments: Vec<SegmentEntry>,
        cluster_metadata: serde_json::Value,
    ) -> Self {
        Self {
            backup_id,
            node_id,
            started_at: Utc::now(),
            segments,
            cluster_metadata,
            status: ManifestStatus::InProgress,
            failure: None,
        }
    }

    pub fn key(&self) -> String {
        keys::manifest(&self.backup_id, &self.node_id)
    }

    pub fn is_complete(&self) -> bool {
        self.status == ManifestStatus::Complete
    }

    pub fn total_size(&self) -> u64 {
        self.segments.iter().map(|s| s.size).sum()
    }

    pub fn entry_for(&self, path: &str) -> Option<&SegmentEntry> {
        self.segments.iter().find(|s| s.path == path)
    }
}

/// The union of per-node manifests sharing one backup id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSet {
    pub backup_id: BackupId,
    pub manifests: Vec<Manifest>,
}

impl BackupSet {
    /// Complete only when every participating node's manifest is complete.
    pub fn is_complete(&self) -> bool {
        !self.manifests.is_empty() && self.manifests.iter().all(Manifest::is_complete)
    }

    /// Timestamp of the set, for retention ordering.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.manifests
            .iter()
            .map(|m| m.started_at)
            .min()
            .unwrap_or_else(Utc::now)
    }

    pub fn node_count(&self) -> usize {
        self.manifests.len()
    }

    pub fn total_size(&self) -> u64 {
        self.manifests.iter().map(Manifest::total_size).sum()
    }

    pub fn manifest_for(&self, node_id: &NodeId) -> Option<&Manifest> {
        self.manifests.iter().find(|m| &m.node_id == node_id)
    }
}

/// Manifests as stored in the backend: JSON objects under deterministic
/// keys, the only durable record of what a backup contains.
#[derive(Clone)]
pub struct ManifestStore {
    backend: Arc<dyn Backend>,
}

impl ManifestStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub async fn save(&self, manifest: &Manifest) -> Result<()> {
        let data = serde_json::to_vec(manifest)?;
        self.backend.put(&manifest.key(), Bytes::from(data)).await?;
        debug!(
            backup_id = %manifest.backup_id,
            node_id = %manifest.node_id,
            status = ?manifest.status,
            segments = manifest.segments.len(),
            "Stored manifest"
        );
        Ok(())
    }

    pub async fn load(&self, backup_id: &BackupId, node_id: &NodeId) -> Result<Manifest> {
        let key = keys::manifest(backup_id, node_id);
        let data = self.backend.get(&key).await.map_err(|_| Error::ManifestNotFound {
            backup_id: backup_id.to_string(),
            node_id: node_id.to_string(),
        })?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub async fn delete(&self, backup_id: &BackupId, node_id: &NodeId) -> Result<()> {
        self.backend
            .delete(&keys::manifest(backup_id, node_id))
            .await
    }

    /// Loads every manifest of one backup set.
    pub async fn load_set(&self, backup_id: &BackupId) -> Result<BackupSet> {
        let prefix = keys::manifest_prefix(backup_id);
        let manifest_keys = self.backend.list(&prefix).await?;
        if manifest_keys.is_empty() {
            return Err(Error::BackupNotFound {
                backup_id: backup_id.to_string(),
            });
        }
        let mut manifests = Vec::with_capacity(manifest_keys.len());
        for key in manifest_keys {
            let data = self.backend.get(&key).await?;
            manifests.push(serde_json::from_slice::<Manifest>(&data)?);
        }
        manifests.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(BackupSet {
            backup_id: backup_id.clone(),
            manifests,
        })
    }

    /// Lists all backup sets in the backend, most recent first.
    pub async fn list_sets(&self) -> Result<Vec<BackupSet>> {
        let manifest_keys = self.backend.list(keys::MANIFEST_PREFIX).await?;
        let mut by_backup: BTreeMap<BackupId, Vec<Manifest>> = BTreeMap::new();

        for key in manifest_keys {
            let data = self.backend.get(&key).await?;
            match serde_json::from_slice::<Manifest>(&data) {
                Ok(manifest) => by_backup
                    .entry(manifest.backup_id.clone())
                    .or_default()
                    .push(manifest),
                Err(error) => {
                    warn!(%key, %error, "Skipping undecodable manifest object");
                }
            }
        }

        let mut sets: Vec<BackupSet> = by_backup
            .into_iter()
            .map(|(backup_id, mut manifests)| {
                manifests.sort_by(|a, b| a.node_id.cmp(&b.node_id));
                BackupSet {
                    backup_id,
                    manifests,
                }
            })
            .collect();
        sets.sort_by(|a, b| b.started_at().cmp(&a.started_at()));
        Ok(sets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Fingerprint;
    use crate::storage::MemoryBackend;

    fn entry(path: &str, content: &[u8]) -> SegmentEntry {
        SegmentEntry {
            path: path.to_string(),
            size: content.len() as u64,
            fingerprint: Fingerprint::from_data(content),
        }
    }

    fn manifest(backup: &str, node: &str, status: ManifestStatus) -> Manifest {
        let mut m = Manifest::new(
            BackupId::new(backup),
            NodeId::new(node),
            vec![entry("a.db", b"alpha")],
            serde_json::json!({"schema": 1}),
        );
        m.status = status;
        m
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let backend = Arc::new(MemoryBackend::new());
        let store = ManifestStore::new(backend);
        let m = manifest("b-1", "node-a", ManifestStatus::Complete);
        store.save(&m).await.unwrap();

        let loaded = store
            .load(&BackupId::new("b-1"), &NodeId::new("node-a"))
            .await
            .unwrap();
        assert_eq!(loaded.status, ManifestStatus::Complete);
        assert_eq!(loaded.segments, m.segments);
    }

    #[tokio::test]
    async fn missing_manifest_is_not_found() {
        let backend = Arc::new(MemoryBackend::new());
        let store = ManifestStore::new(backend);
        let err = store
            .load(&BackupId::new("nope"), &NodeId::new("node-a"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ManifestNotFound { .. }));
    }

    #[tokio::test]
    async fn set_completeness_requires_every_node() {
        let backend = Arc::new(MemoryBackend::new());
        let store = ManifestStore::new(backend);
        store
            .save(&manifest("b-1", "node-a", ManifestStatus::Complete))
            .await
            .unwrap();
        store
            .save(&manifest("b-1", "node-b", ManifestStatus::Failed))
            .await
            .unwrap();

        let set = store.load_set(&BackupId::new("b-1")).await.unwrap();
        assert_eq!(set.node_count(), 2);
        assert!(!set.is_complete());
    }

    #[tokio::test]
    async fn list_sets_orders_most_recent_first() {
        let backend = Arc::new(MemoryBackend::new());
        let store = ManifestStore::new(backend);

        let mut old = manifest("b-old", "node-a", ManifestStatus::Complete);
        old.started_at = Utc::now() - chrono::Duration::hours(2);
        store.save(&old).await.unwrap();
        store
            .save(&manifest("b-new", "node-a", ManifestStatus::Complete))
            .await
            .unwrap();

        let sets = store.list_sets().await.unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].backup_id, BackupId::new("b-new"));
        assert_eq!(sets[1].backup_id, BackupId::new("b-old"));
    }
}
