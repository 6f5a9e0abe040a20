use crate::agent;
use crate::cancel::CancelFlag;
use crate::planner::NodeSnapshot;
use crate::retry::RetryConfig;
use crate::storage::Backend;
use crate::{Error, NodeId, Result, SegmentEntry};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Outcome of a batch of segment transfers on one node.
#[derive(Debug, Clone, Default)]
pub struct TransferReport {
    /// Segments transferred and verified this run.
    pub completed: usize,
    /// Segments already present and verified, nothing transferred.
    pub skipped: usize,
    pub bytes_transferred: u64,
    pub failures: Vec<TransferFailure>,
}

impl TransferReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TransferFailure {
    pub path: String,
    pub fingerprint: crate::Fingerprint,
    pub error: String,
}

/// The consumed per-node interface: a reliable-request-with-timeout
/// abstraction over whatever carries commands to cluster members.
///
/// Implementations run the node-side operations in `agent` wherever the
/// node's data actually lives; `LocalTransport` runs them in-process.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// Refresh and return the node's fingerprint snapshot of its data dir.
    async fn fetch_snapshot(&self, node: &NodeId) -> Result<NodeSnapshot>;

    /// Upload the given segments from the node's data dir to the backend,
    /// verifying each upload by read-back.
    async fn upload_segments(
        &self,
        node: &NodeId,
        segments: &[SegmentEntry],
    ) -> Result<TransferReport>;

    /// Download the given segments into the node's staging area, verifying
    /// each by fingerprint. Already-staged verified segments are skipped.
    async fn stage_segments(
        &self,
        node: &NodeId,
        segments: &[SegmentEntry],
    ) -> Result<TransferReport>;

    /// Swap staged data into the live data dir and reload the node's
    /// storage engine. Only called for nodes whose staging verified clean.
    async fn activate(&self, node: &NodeId, target: &[SegmentEntry]) -> Result<()>;
}

/// Filesystem locations of one node as seen by `LocalTransport`.
#[derive(Debug, Clone)]
pub struct NodePaths {
    pub data_dir: PathBuf,
    pub staging_dir: PathBuf,
    /// Where the fingerprint index cache persists; `None` disables caching.
    pub index_cache: Option<PathBuf>,
}

/// In-process transport: node operations run directly against local
/// directories. Used by tests and single-host deployments; a remote
/// transport would carry the same calls over the wire.
pub struct LocalTransport {
    backend: Arc<dyn Backend>,
    nodes: HashMap<NodeId, NodePaths>,
    segment_parallelism: usize,
    retry: RetryConfig,
    cancel: CancelFlag,
}

impl LocalTransport {
    pub fn new(backend: Arc<dyn Backend>, segment_parallelism: usize) -> Self {
        Self {
            backend,
            nodes: HashMap::new(),
            segment_parallelism: segment_parallelism.max(1),
            retry: RetryConfig::default(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_node(mut self, node_id: NodeId, paths: NodePaths) -> Self {
        self.nodes.insert(node_id, paths);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    fn paths(&self, node: &NodeId) -> Result<&NodePaths> {
        self.nodes
            .get(node)
            .ok_or_else(|| Error::Other(format!("unknown node: {node}")))
    }
}

#[async_trait]
impl NodeTransport for LocalTransport {
    async fn fetch_snapshot(&self, node: &NodeId) -> Result<NodeSnapshot> {
        let paths = self.paths(node)?;
        agent::take_snapshot(node, &paths.data_dir, paths.index_cache.as_deref()).await
    }

    async fn upload_segments(
        &self,
        node: &NodeId,
        segments: &[SegmentEntry],
    ) -> Result<TransferReport> {
        let paths = self.paths(node)?;
        agent::upload_segments(
            &self.backend,
            &paths.data_dir,
            segments,
            self.segment_parallelism,
            &self.retry,
            &self.cancel,
        )
        .await
    }

    async fn stage_segments(
        &self,
        node: &NodeId,
        segments: &[SegmentEntry],
    ) -> Result<TransferReport> {
        let paths = self.paths(node)?;
        agent::stage_segments(
            &self.backend,
            &paths.staging_dir,
            segments,
            self.segment_parallelism,
            &self.retry,
            &self.cancel,
        )
        .await
    }

    async fn activate(&self, node: &NodeId, target: &[SegmentEntry]) -> Result<()> {
        let paths = self.paths(node)?;
        agent::activate_staged(&paths.data_dir, &paths.staging_dir, target).await
    }
}
