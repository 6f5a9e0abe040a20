use crate::cancel::CancelFlag;
use crate::cluster::{Cluster, QuorumPolicy, TransferLimits};
use crate::manifest::{BackupSet, Manifest, ManifestStore};
use crate::storage::Backend;
use crate::transport::NodeTransport;
use crate::{BackupId, Error, NodeId, Result, RestoreId, SegmentEntry, keys};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePhase {
    Selecting,
    Validating,
    Staging,
    Activating,
    Complete,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NodeRestoreState {
    Pending,
    Validated { missing: usize },
    Staged,
    Activated,
    Failed { error: String },
}

impl NodeRestoreState {
    pub fn is_activated(&self) -> bool {
        matches!(self, NodeRestoreState::Activated)
    }

    fn survives(&self) -> bool {
        matches!(
            self,
            NodeRestoreState::Staged | NodeRestoreState::Activated
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeProgress {
    /// Which manifest of the backup set this cluster node restores from.
    pub manifest_node: NodeId,
    pub state: NodeRestoreState,
}

/// The restore state machine's durable form: written to the backend after
/// every transition, re-entered idempotently by `resume`. Backend contents
/// stay the only source of truth across coordinator restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreProgress {
    pub restore_id: RestoreId,
    pub backup_id: BackupId,
    pub phase: RestorePhase,
    pub nodes: BTreeMap<NodeId, NodeProgress>,
    pub updated_at: DateTime<Utc>,
}

impl RestoreProgress {
    fn new(restore_id: RestoreId, backup_id: BackupId) -> Self {
        Self {
            restore_id,
            backup_id,
            phase: RestorePhase::Selecting,
            nodes: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> String {
        keys::restore(&self.restore_id)
    }

    async fn save(&mut self, backend: &Arc<dyn Backend>) -> Result<()> {
        self.updated_at = Utc::now();
        let data = serde_json::to_vec(self)?;
        backend.put(&self.key(), Bytes::from(data)).await
    }

    pub async fn load(backend: &Arc<dyn Backend>, restore_id: &RestoreId) -> Result<Self> {
        let data = backend
            .get(&keys::restore(restore_id))
            .await
            .map_err(|_| Error::RestoreNotFound {
                restore_id: restore_id.to_string(),
            })?;
        Ok(serde_json::from_slice(&data)?)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub restore_id: RestoreId,
    pub backup_id: BackupId,
    pub phase: RestorePhase,
    pub nodes: BTreeMap<NodeId, NodeRestoreState>,
    pub bytes_downloaded: u64,
    pub segments_skipped: usize,
}

impl RestoreReport {
    pub fn succeeded(&self) -> bool {
        self.phase == RestorePhase::Complete
    }
}

/// Sequences a cluster-wide restore: select and check the backup set,
/// validate each node against its target manifest, stage the missing
/// delta, then activate only what staged clean. Partial node failure is
/// tolerated down to the configured quorum; below it the whole operation
/// aborts without activating anything.
pub struct RestoreCoordinator {
    backend: Arc<dyn Backend>,
    store: ManifestStore,
    transport: Arc<dyn NodeTransport>,
    cluster: Cluster,
    quorum: QuorumPolicy,
    limits: TransferLimits,
    cancel: CancelFlag,
}

impl RestoreCoordinator {
    pub fn new(
        backend: Arc<dyn Backend>,
        transport: Arc<dyn NodeTransport>,
        cluster: Cluster,
    ) -> Self {
        Self {
            store: ManifestStore::new(backend.clone()),
            backend,
            transport,
            cluster,
            quorum: QuorumPolicy::require_all(),
            limits: TransferLimits::default(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_quorum(mut self, quorum: QuorumPolicy) -> Self {
        self.quorum = quorum;
        self
    }

    pub fn with_limits(mut self, limits: TransferLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Starts a fresh restore of the given backup set.
    pub async fn run(&self, backup_id: &BackupId) -> Result<RestoreReport> {
        let restore_id = RestoreId::generate();
        let mut progress = RestoreProgress::new(restore_id, backup_id.clone());
        info!(restore_id = %progress.restore_id, backup_id = %backup_id, "Starting restore");

        let set = self.store.load_set(backup_id).await?;
        if !set.is_complete() {
            warn!(backup_id = %backup_id, "Backup set incomplete, refusing to restore");
            progress.phase = RestorePhase::Aborted;
            progress.save(&self.backend).await?;
            return Ok(report_from(&progress, 0, 0));
        }

        let assignment = assign_manifests(&self.cluster, &set)?;
        for (cluster_node, manifest_node) in assignment {
            progress.nodes.insert(
                cluster_node,
                NodeProgress {
                    manifest_node,
                    state: NodeRestoreState::Pending,
                },
            );
        }
        self.execute(&set, progress).await
    }

    /// Re-enters a persisted restore. Nodes already activated are left
    /// alone; every other node goes back through validation, where
    /// already-staged verified segments make staging cheap.
    pub async fn resume(&self, restore_id: &RestoreId) -> Result<RestoreReport> {
        let mut progress = RestoreProgress::load(&self.backend, restore_id).await?;
        info!(restore_id = %restore_id, backup_id = %progress.backup_id, "Resuming restore");

        let set = self.store.load_set(&progress.backup_id).await?;
        for node_progress in progress.nodes.values_mut() {
            if !node_progress.state.is_activated() {
                node_progress.state = NodeRestoreState::Pending;
            }
        }
        self.execute(&set, progress).await
    }

    async fn execute(
        &self,
        set: &BackupSet,
        mut progress: RestoreProgress,
    ) -> Result<RestoreReport> {
        let mut bytes_downloaded = 0u64;
        let mut segments_skipped = 0usize;

        // Validating: diff each node against its target manifest so only
        // the delta is ever staged.
        progress.phase = RestorePhase::Validating;
        progress.save(&self.backend).await?;
        self.cancel.checkpoint()?;

        let pending: Vec<(NodeId, Manifest)> = progress
            .nodes
            .iter()
            .filter(|(_, p)| !p.state.is_activated())
            .filter_map(|(node_id, p)| {
                set.manifest_for(&p.manifest_node)
                    .map(|m| (node_id.clone(), m.clone()))
            })
            .collect();

        let mut missing_by_node: BTreeMap<NodeId, Vec<SegmentEntry>> = BTreeMap::new();
        let mut validations = stream::iter(pending.clone())
            .map(|(node_id, manifest)| {
                let transport = self.transport.clone();
                async move {
                    let result = transport.fetch_snapshot(&node_id).await.map(|snapshot| {
                        manifest
                            .segments
                            .iter()
                            .filter(|entry| {
                                snapshot
                                    .segments
                                    .get(&entry.path)
                                    .map(|meta| meta.fingerprint)
                                    != Some(entry.fingerprint)
                            })
                            .cloned()
                            .collect::<Vec<_>>()
                    });
                    (node_id, result)
                }
            })
            .buffer_unordered(self.limits.node_parallelism.max(1));

        while let Some((node_id, result)) = validations.next().await {
            let state = match result {
                Ok(missing) => {
                    let count = missing.len();
                    missing_by_node.insert(node_id.clone(), missing);
                    NodeRestoreState::Validated { missing: count }
                }
                Err(error) => {
                    warn!(node = %node_id, %error, "Validation failed");
                    NodeRestoreState::Failed {
                        error: error.to_string(),
                    }
                }
            };
            set_state(&mut progress, &node_id, state);
            progress.save(&self.backend).await?;
        }
        drop(validations);

        // Staging: download and verify the delta; a node that fails here
        // is marked failed but does not stop the others.
        progress.phase = RestorePhase::Staging;
        progress.save(&self.backend).await?;
        self.cancel.checkpoint()?;

        let to_stage: Vec<(NodeId, Vec<SegmentEntry>)> = progress
            .nodes
            .iter()
            .filter(|(_, p)| matches!(p.state, NodeRestoreState::Validated { .. }))
            .map(|(node_id, _)| {
                let missing = missing_by_node.get(node_id).cloned().unwrap_or_default();
                (node_id.clone(), missing)
            })
            .collect();

        let mut stagings = stream::iter(to_stage)
            .map(|(node_id, missing)| {
                let transport = self.transport.clone();
                async move {
                    let result = transport.stage_segments(&node_id, &missing).await;
                    (node_id, result)
                }
            })
            .buffer_unordered(self.limits.node_parallelism.max(1));

        while let Some((node_id, result)) = stagings.next().await {
            let state = match result {
                Ok(report) if report.is_clean() => {
                    bytes_downloaded += report.bytes_transferred;
                    segments_skipped += report.skipped;
                    NodeRestoreState::Staged
                }
                Ok(report) => {
                    let summary = report
                        .failures
                        .iter()
                        .take(3)
                        .map(|f| format!("{}: {}", f.path, f.error))
                        .collect::<Vec<_>>()
                        .join("; ");
                    warn!(node = %node_id, failed = report.failures.len(), "Staging failed");
                    NodeRestoreState::Failed {
                        error: format!("{} segment(s) failed staging: {}", report.failures.len(), summary),
                    }
                }
                Err(error) => {
                    warn!(node = %node_id, %error, "Staging failed");
                    NodeRestoreState::Failed {
                        error: error.to_string(),
                    }
                }
            };
            set_state(&mut progress, &node_id, state);
            progress.save(&self.backend).await?;
        }
        drop(stagings);

        // Quorum gate: activation is all-or-nothing below the configured
        // minimum, so a half-restored cluster is never published.
        let required = self.quorum.required(progress.nodes.len());
        let survivors = progress
            .nodes
            .values()
            .filter(|p| p.state.survives())
            .count();
        if survivors < required {
            warn!(
                survivors,
                required,
                "Too few nodes staged, aborting restore"
            );
            progress.phase = RestorePhase::Aborted;
            progress.save(&self.backend).await?;
            return Ok(report_from(&progress, bytes_downloaded, segments_skipped));
        }

        // Activating: only nodes whose staging verified clean.
        progress.phase = RestorePhase::Activating;
        progress.save(&self.backend).await?;
        self.cancel.checkpoint()?;

        let to_activate: Vec<(NodeId, Vec<SegmentEntry>)> = progress
            .nodes
            .iter()
            .filter(|(_, p)| matches!(p.state, NodeRestoreState::Staged))
            .filter_map(|(node_id, p)| {
                set.manifest_for(&p.manifest_node)
                    .map(|m| (node_id.clone(), m.segments.clone()))
            })
            .collect();

        let mut activations = stream::iter(to_activate)
            .map(|(node_id, target)| {
                let transport = self.transport.clone();
                async move {
                    let result = transport.activate(&node_id, &target).await;
                    (node_id, result)
                }
            })
            .buffer_unordered(self.limits.node_parallelism.max(1));

        while let Some((node_id, result)) = activations.next().await {
            let state = match result {
                Ok(()) => NodeRestoreState::Activated,
                Err(error) => {
                    warn!(node = %node_id, %error, "Activation failed");
                    NodeRestoreState::Failed {
                        error: error.to_string(),
                    }
                }
            };
            set_state(&mut progress, &node_id, state);
            progress.save(&self.backend).await?;
        }
        drop(activations);

        let activated = progress
            .nodes
            .values()
            .filter(|p| p.state.is_activated())
            .count();
        progress.phase = if activated >= required {
            RestorePhase::Complete
        } else {
            RestorePhase::Aborted
        };
        progress.save(&self.backend).await?;

        info!(
            restore_id = %progress.restore_id,
            phase = ?progress.phase,
            activated,
            bytes_downloaded,
            "Restore finished"
        );
        Ok(report_from(&progress, bytes_downloaded, segments_skipped))
    }
}

fn set_state(progress: &mut RestoreProgress, node_id: &NodeId, state: NodeRestoreState) {
    if let Some(node_progress) = progress.nodes.get_mut(node_id) {
        node_progress.state = state;
    }
}

fn report_from(
    progress: &RestoreProgress,
    bytes_downloaded: u64,
    segments_skipped: usize,
) -> RestoreReport {
    RestoreReport {
        restore_id: progress.restore_id.clone(),
        backup_id: progress.backup_id.clone(),
        phase: progress.phase,
        nodes: progress
            .nodes
            .iter()
            .map(|(id, p)| (id.clone(), p.state.clone()))
            .collect(),
        bytes_downloaded,
        segments_skipped,
    }
}

/// Maps cluster nodes to the manifests they restore from: matching node
/// ids pair up first, leftovers pair positionally. A backup covering more
/// nodes than the cluster has cannot be restored.
fn assign_manifests(cluster: &Cluster, set: &BackupSet) -> Result<Vec<(NodeId, NodeId)>> {
    if set.manifests.len() > cluster.len() {
        return Err(Error::InsufficientNodes {
            required: set.manifests.len(),
            available: cluster.len(),
        });
    }

    let cluster_ids = cluster.node_ids();
    let mut assignment: Vec<(NodeId, NodeId)> = Vec::new();
    let mut unmatched_manifests: Vec<NodeId> = Vec::new();

    for manifest in &set.manifests {
        if cluster_ids.contains(&manifest.node_id) {
            assignment.push((manifest.node_id.clone(), manifest.node_id.clone()));
        } else {
            unmatched_manifests.push(manifest.node_id.clone());
        }
    }

    let assigned: std::collections::HashSet<&NodeId> =
        assignment.iter().map(|(cluster_node, _)| cluster_node).collect();
    let mut free_nodes: Vec<NodeId> = cluster_ids
        .iter()
        .filter(|id| !assigned.contains(id))
        .cloned()
        .collect();

    for manifest_node in unmatched_manifests {
        // len checked above: every manifest finds a home.
        let cluster_node = free_nodes.remove(0);
        assignment.push((cluster_node, manifest_node));
    }
    Ok(assignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{BackupCoordinator, BackupOptions};
    use crate::cluster::ClusterNode;
    use crate::retry::RetryConfig;
    use crate::storage::MemoryBackend;
    use crate::transport::{LocalTransport, NodePaths};
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        backend: Arc<dyn Backend>,
        transport: Arc<LocalTransport>,
        cluster: Cluster,
        data_dirs: BTreeMap<NodeId, TempDir>,
        _staging_dirs: Vec<TempDir>,
    }

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn fixture(node_names: &[&str], files: &[(&str, &[u8])]) -> Fixture {
        let memory = Arc::new(MemoryBackend::new());
        let backend: Arc<dyn Backend> = memory.clone();
        let mut transport =
            LocalTransport::new(backend.clone(), 4).with_retry(RetryConfig::quick());
        let mut data_dirs = BTreeMap::new();
        let mut staging_dirs = Vec::new();
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
            data_dirs.insert(NodeId::new(*name), data);
            staging_dirs.push(staging);
            nodes.push(ClusterNode::new(*name));
        }
        Fixture {
            backend,
            transport: Arc::new(transport),
            cluster: Cluster::new(nodes),
            data_dirs,
            _staging_dirs: staging_dirs,
        }
    }

    async fn backup(fx: &Fixture) -> BackupId {
        let coordinator = BackupCoordinator::new(
            fx.backend.clone(),
            fx.transport.clone(),
            fx.cluster.clone(),
        );
        let report = coordinator.run(BackupOptions::default()).await.unwrap();
        assert!(report.is_complete());
        report.backup_id
    }

    fn restore_coordinator(fx: &Fixture) -> RestoreCoordinator {
        RestoreCoordinator::new(
            fx.backend.clone(),
            fx.transport.clone(),
            fx.cluster.clone(),
        )
    }

    #[tokio::test]
    async fn restores_cluster_to_backed_up_state() {
        let fx = fixture(
            &["node-a", "node-b"],
            &[("data/a.db", b"alpha"), ("data/b.db", b"beta")],
        );
        let backup_id = backup(&fx).await;

        // Diverge both nodes: mutate one file, add a stray.
        for dir in fx.data_dirs.values() {
            write(dir.path(), "data/a.db", b"corrupted");
            write(dir.path(), "stray.tmp", b"junk");
        }

        let report = restore_coordinator(&fx).run(&backup_id).await.unwrap();

        assert!(report.succeeded());
        for dir in fx.data_dirs.values() {
            assert_eq!(
                std::fs::read(dir.path().join("data/a.db")).unwrap(),
                b"alpha"
            );
            assert_eq!(std::fs::read(dir.path().join("data/b.db")).unwrap(), b"beta");
            assert!(!dir.path().join("stray.tmp").exists());
        }
    }

    #[tokio::test]
    async fn matching_segments_are_not_downloaded() {
        let fx = fixture(
            &["node-a"],
            &[("a.db", b"alpha"), ("b.db", b"beta")],
        );
        let backup_id = backup(&fx).await;

        // Only a.db diverges; b.db still matches the manifest.
        let dir = &fx.data_dirs[&NodeId::new("node-a")];
        write(dir.path(), "a.db", b"drifted");

        let report = restore_coordinator(&fx).run(&backup_id).await.unwrap();

        assert!(report.succeeded());
        assert_eq!(report.bytes_downloaded, "alpha".len() as u64);
    }

    #[tokio::test]
    async fn incomplete_set_is_rejected_in_selecting() {
        let fx = fixture(&["node-a"], &[("a.db", b"alpha")]);
        let backup_id = backup(&fx).await;

        // Corrupt the set: overwrite the manifest as failed.
        let store = ManifestStore::new(fx.backend.clone());
        let mut manifest = store
            .load(&backup_id, &NodeId::new("node-a"))
            .await
            .unwrap();
        manifest.status = crate::manifest::ManifestStatus::Failed;
        store.save(&manifest).await.unwrap();

        let report = restore_coordinator(&fx).run(&backup_id).await.unwrap();
        assert_eq!(report.phase, RestorePhase::Aborted);
        assert!(report.nodes.is_empty());
    }

    #[tokio::test]
    async fn staging_failure_below_quorum_aborts_without_activation() {
        let fx = fixture(&["node-a"], &[("a.db", b"alpha")]);
        let backup_id = backup(&fx).await;

        // Make the node need a download, then break the blob.
        let dir = &fx.data_dirs[&NodeId::new("node-a")];
        write(dir.path(), "a.db", b"drifted");
        let blob_key = keys::segment(&crate::Fingerprint::from_data(b"alpha"));
        fx.backend.delete(&blob_key).await.unwrap();

        let report = restore_coordinator(&fx).run(&backup_id).await.unwrap();

        assert_eq!(report.phase, RestorePhase::Aborted);
        // Nothing was activated: the drifted file is untouched.
        assert_eq!(std::fs::read(dir.path().join("a.db")).unwrap(), b"drifted");
    }

    #[tokio::test]
    async fn quorum_tolerates_non_critical_node_failure() {
        let fx = fixture(&["node-a", "node-b"], &[]);
        // Per-node distinct content so each node downloads its own blob.
        write(
            fx.data_dirs[&NodeId::new("node-a")].path(),
            "a.db",
            b"content-a",
        );
        write(
            fx.data_dirs[&NodeId::new("node-b")].path(),
            "b.db",
            b"content-b",
        );
        let backup_id = backup(&fx).await;

        // Diverge both, then break only node-b's blob.
        write(fx.data_dirs[&NodeId::new("node-a")].path(), "a.db", b"x");
        write(fx.data_dirs[&NodeId::new("node-b")].path(), "b.db", b"y");
        fx.backend
            .delete(&keys::segment(&crate::Fingerprint::from_data(b"content-b")))
            .await
            .unwrap();

        let report = restore_coordinator(&fx)
            .with_quorum(QuorumPolicy::at_least(1))
            .run(&backup_id)
            .await
            .unwrap();

        assert_eq!(report.phase, RestorePhase::Complete);
        assert!(report.nodes[&NodeId::new("node-a")].is_activated());
        assert!(matches!(
            report.nodes[&NodeId::new("node-b")],
            NodeRestoreState::Failed { .. }
        ));
        assert_eq!(
            std::fs::read(fx.data_dirs[&NodeId::new("node-a")].path().join("a.db")).unwrap(),
            b"content-a"
        );
    }

    #[tokio::test]
    async fn resume_skips_already_verified_staging() {
        let fx = fixture(&["node-a", "node-b"], &[]);
        write(
            fx.data_dirs[&NodeId::new("node-a")].path(),
            "a.db",
            b"content-a",
        );
        write(
            fx.data_dirs[&NodeId::new("node-b")].path(),
            "b.db",
            b"content-b",
        );
        let backup_id = backup(&fx).await;

        write(fx.data_dirs[&NodeId::new("node-a")].path(), "a.db", b"x");
        write(fx.data_dirs[&NodeId::new("node-b")].path(), "b.db", b"y");

        // First attempt: node-b's blob is unavailable, so with full quorum
        // the restore aborts after node-a staged successfully.
        let blob_b = keys::segment(&crate::Fingerprint::from_data(b"content-b"));
        let blob_bytes = fx.backend.get(&blob_b).await.unwrap();
        fx.backend.delete(&blob_b).await.unwrap();

        let first = restore_coordinator(&fx).run(&backup_id).await.unwrap();
        assert_eq!(first.phase, RestorePhase::Aborted);
        assert_eq!(first.bytes_downloaded, "content-a".len() as u64);

        // Blob comes back; resume re-validates but does not re-download
        // node-a's already verified staged segment.
        fx.backend.put(&blob_b, blob_bytes).await.unwrap();
        let second = restore_coordinator(&fx)
            .resume(&first.restore_id)
            .await
            .unwrap();

        assert_eq!(second.phase, RestorePhase::Complete);
        assert_eq!(second.bytes_downloaded, "content-b".len() as u64);
        assert_eq!(second.segments_skipped, 1);
    }

    #[tokio::test]
    async fn resume_of_unknown_restore_errors() {
        let fx = fixture(&["node-a"], &[("a.db", b"alpha")]);
        let err = restore_coordinator(&fx)
            .resume(&RestoreId::new("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RestoreNotFound { .. }));
    }

    #[tokio::test]
    async fn backup_with_more_nodes_than_cluster_cannot_restore() {
        let fx = fixture(&["node-a", "node-b"], &[("a.db", b"alpha")]);
        let backup_id = backup(&fx).await;

        let small = fixture(&["node-a"], &[]);
        // Same backend contents, smaller cluster.
        let coordinator = RestoreCoordinator::new(
            fx.backend.clone(),
            small.transport.clone(),
            small.cluster.clone(),
        );
        let err = coordinator.run(&backup_id).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientNodes { .. }));
    }

    #[test]
    fn assignment_prefers_matching_node_ids() {
        let cluster = Cluster::new(vec![
            ClusterNode::new("node-a"),
            ClusterNode::new("node-z"),
        ]);
        let set = BackupSet {
            backup_id: BackupId::new("b-1"),
            manifests: vec![
                Manifest::new(
                    BackupId::new("b-1"),
                    NodeId::new("node-a"),
                    vec![],
                    serde_json::Value::Null,
                ),
                Manifest::new(
                    BackupId::new("b-1"),
                    NodeId::new("node-gone"),
                    vec![],
                    serde_json::Value::Null,
                ),
            ],
        };
        let assignment = assign_manifests(&cluster, &set).unwrap();
        assert!(assignment.contains(&(NodeId::new("node-a"), NodeId::new("node-a"))));
        assert!(assignment.contains(&(NodeId::new("node-z"), NodeId::new("node-gone"))));
    }
}
