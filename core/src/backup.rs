use crate::builder::ManifestBuilder;
use crate::cancel::CancelFlag;
use crate::cluster::{Cluster, TransferLimits};
use crate::cluster_index::ClusterIndex;
use crate::manifest::ManifestStatus;
use crate::planner::{self, NodeSnapshot};
use crate::storage::Backend;
use crate::transport::NodeTransport;
use crate::{BackupId, NodeId, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Inputs of one cluster backup run.
#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    /// Reuse an id to resume a failed attempt; a fresh id is generated
    /// otherwise.
    pub backup_id: Option<BackupId>,
    /// Opaque cluster metadata embedded in every manifest of the set.
    pub cluster_metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeBackupResult {
    pub node_id: NodeId,
    pub status: ManifestStatus,
    pub uploaded: usize,
    pub skipped: usize,
    pub referenced: usize,
    pub bytes_uploaded: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub backup_id: BackupId,
    pub started_at: DateTime<Utc>,
    pub nodes: Vec<NodeBackupResult>,
}

impl BackupReport {
    /// The backup set is usable for restore only when every node completed.
    pub fn is_complete(&self) -> bool {
        !self.nodes.is_empty()
            && self
                .nodes
                .iter()
                .all(|n| n.status == ManifestStatus::Complete)
    }

    pub fn total_uploaded(&self) -> usize {
        self.nodes.iter().map(|n| n.uploaded).sum()
    }
}

/// Runs one differential backup across the whole cluster: snapshot every
/// node, plan against the backend's existing content, upload each unique
/// segment once, and publish one manifest per node.
pub struct BackupCoordinator {
    backend: Arc<dyn Backend>,
    transport: Arc<dyn NodeTransport>,
    cluster: Cluster,
    limits: TransferLimits,
    cancel: CancelFlag,
}

impl BackupCoordinator {
    pub fn new(
        backend: Arc<dyn Backend>,
        transport: Arc<dyn NodeTransport>,
        cluster: Cluster,
    ) -> Self {
        Self {
            backend,
            transport,
            cluster,
            limits: TransferLimits::default(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_limits(mut self, limits: TransferLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, opts: BackupOptions) -> Result<BackupReport> {
        let backup_id = opts.backup_id.unwrap_or_else(BackupId::generate);
        let started_at = Utc::now();
        info!(backup_id = %backup_id, nodes = self.cluster.len(), "Starting cluster backup");

        self.cancel.checkpoint()?;

        // Snapshot every node, bounded by the per-node worker pool.
        let snapshot_results: Vec<(NodeId, Result<NodeSnapshot>)> =
            stream::iter(self.cluster.node_ids())
                .map(|node_id| {
                    let transport = self.transport.clone();
                    async move {
                        let result = transport.fetch_snapshot(&node_id).await;
                        (node_id, result)
                    }
                })
                .buffer_unordered(self.limits.node_parallelism.max(1))
                .collect()
                .await;

        let mut snapshots: Vec<NodeSnapshot> = Vec::new();
        let mut unreachable: Vec<NodeBackupResult> = Vec::new();
        for (node_id, result) in snapshot_results {
            match result {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(error) => {
                    warn!(node = %node_id, %error, "Node snapshot failed, excluding from this backup");
                    unreachable.push(NodeBackupResult {
                        node_id,
                        status: ManifestStatus::Failed,
                        uploaded: 0,
                        skipped: 0,
                        referenced: 0,
                        bytes_uploaded: 0,
                        failure: Some(error.to_string()),
                    });
                }
            }
        }
        // Stable order regardless of completion order above.
        snapshots.sort_by(|a, b| a.node_id.cmp(&b.node_id));

        self.cancel.checkpoint()?;

        let index = ClusterIndex::load(&self.backend).await?;
        let assignments = planner::plan_cluster(&snapshots, &index);

        let builder = ManifestBuilder::new(self.backend.clone(), self.transport.clone())
            .with_cancel(self.cancel.clone());
        let builder = Arc::new(builder);

        let mut node_results: Vec<NodeBackupResult> = stream::iter(assignments)
            .map(|assignment| {
                let builder = builder.clone();
                let backup_id = backup_id.clone();
                let metadata = opts.cluster_metadata.clone();
                async move {
                    let node_id = assignment.node_id.clone();
                    let referenced = assignment.plan.to_reference.len();
                    match builder
                        .build(&backup_id, &node_id, assignment.plan, metadata)
                        .await
                    {
                        Ok(outcome) => NodeBackupResult {
                            node_id,
                            status: outcome.manifest.status,
                            uploaded: outcome.report.completed,
                            skipped: outcome.report.skipped,
                            referenced,
                            bytes_uploaded: outcome.report.bytes_transferred,
                            failure: outcome.manifest.failure,
                        },
                        Err(error) => NodeBackupResult {
                            node_id,
                            status: ManifestStatus::Failed,
                            uploaded: 0,
                            skipped: 0,
                            referenced,
                            bytes_uploaded: 0,
                            failure: Some(error.to_string()),
                        },
                    }
                }
            })
            .buffer_unordered(self.limits.node_parallelism.max(1))
            .collect()
            .await;

        node_results.extend(unreachable);
        node_results.sort_by(|a, b| a.node_id.cmp(&b.node_id));

        let report = BackupReport {
            backup_id,
            started_at,
            nodes: node_results,
        };
        info!(
            backup_id = %report.backup_id,
            complete = report.is_complete(),
            uploaded = report.total_uploaded(),
            "Cluster backup finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterNode;
    use crate::manifest::ManifestStore;
    use crate::retry::RetryConfig;
    use crate::storage::MemoryBackend;
    use crate::transport::{LocalTransport, NodePaths};
    use crate::types::keys;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        memory: Arc<MemoryBackend>,
        coordinator: BackupCoordinator,
        _dirs: Vec<TempDir>,
    }

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    /// Three nodes, each seeded with the same `files` tree.
    fn fixture(node_names: &[&str], files: &[(&str, &[u8])]) -> Fixture {
        let memory = Arc::new(MemoryBackend::new());
        let backend: Arc<dyn Backend> = memory.clone();
        let mut transport = LocalTransport::new(backend.clone(), 4).with_retry(RetryConfig::quick());
        let mut dirs = Vec::new();
        let mut nodes = Vec::new();
        for name in node_names {
            let data = TempDir::new().unwrap();
            let staging = TempDir::new().unwrap();
            for (rel, content) in files {
                write(data.path(), rel, content);
            }
            transport = transport.with_node(
                NodeId::new(*name),
                NodePaths {
                    data_dir: data.path().to_path_buf(),
                    staging_dir: staging.path().to_path_buf(),
                    index_cache: None,
                },
            );
            dirs.push(data);
            dirs.push(staging);
            nodes.push(ClusterNode::new(*name));
        }
        let coordinator =
            BackupCoordinator::new(backend, Arc::new(transport), Cluster::new(nodes));
        Fixture {
            memory,
            coordinator,
            _dirs: dirs,
        }
    }

    #[tokio::test]
    async fn identical_replicas_upload_one_blob() {
        // Three nodes with ten identical files: one unique segment total.
        let files: Vec<(String, Vec<u8>)> = (0..10)
            .map(|i| (format!("data/f{i}.db"), b"identical-content".to_vec()))
            .collect();
        let refs: Vec<(&str, &[u8])> = files
            .iter()
            .map(|(p, c)| (p.as_str(), c.as_slice()))
            .collect();
        let fx = fixture(&["node-a", "node-b", "node-c"], &refs);

        let report = fx.coordinator.run(BackupOptions::default()).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.total_uploaded(), 1);
        assert_eq!(fx.memory.list("segments/").await.unwrap().len(), 1);
        assert_eq!(fx.memory.list("manifests/").await.unwrap().len(), 3);

        // Every manifest lists all ten files, referencing the same blob.
        let store = ManifestStore::new(fx.memory.clone());
        let set = store.load_set(&report.backup_id).await.unwrap();
        assert!(set.is_complete());
        for manifest in &set.manifests {
            assert_eq!(manifest.segments.len(), 10);
        }
    }

    #[tokio::test]
    async fn unchanged_rerun_uploads_nothing() {
        let fx = fixture(&["node-a", "node-b"], &[("a.db", b"alpha")]);

        let first = fx.coordinator.run(BackupOptions::default()).await.unwrap();
        assert_eq!(first.total_uploaded(), 1);

        let second = fx.coordinator.run(BackupOptions::default()).await.unwrap();
        assert!(second.is_complete());
        assert_eq!(second.total_uploaded(), 0);
        // Two generations, still one blob.
        assert_eq!(fx.memory.list("segments/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn changed_file_uploads_exactly_one_segment() {
        let fx = fixture(&["node-a", "node-b", "node-c"], &[("a.db", b"shared")]);
        let first = fx.coordinator.run(BackupOptions::default()).await.unwrap();
        assert_eq!(first.total_uploaded(), 1);

        // Touch one file on one node only (node-a's data dir).
        write(fx._dirs[0].path(), "a.db", b"shared-v2");

        let second = fx.coordinator.run(BackupOptions::default()).await.unwrap();
        assert!(second.is_complete());
        assert_eq!(second.total_uploaded(), 1);
        assert_eq!(fx.memory.list("segments/").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn resumed_backup_reuses_confirmed_blobs() {
        let fx = fixture(&["node-a"], &[("a.db", b"alpha"), ("b.db", b"beta")]);
        // First attempt: b.db's blob cannot be written (all three attempts
        // of the quick() retry config fail), so the manifest fails.
        let blob_key = keys::segment(&crate::Fingerprint::from_data(b"beta"));
        fx.memory.fail_puts(&blob_key, 3);

        let first = fx.coordinator.run(BackupOptions::default()).await.unwrap();
        assert!(!first.is_complete());
        assert!(fx.memory.contains(&keys::segment(&crate::Fingerprint::from_data(b"alpha"))).await);

        // Retry under the same backup id re-uploads only the missing blob.
        let second = fx
            .coordinator
            .run(BackupOptions {
                backup_id: Some(first.backup_id.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(second.is_complete());
        assert_eq!(second.total_uploaded(), 1);
        assert_eq!(second.nodes[0].referenced, 1);
    }
}
