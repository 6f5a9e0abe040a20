use anyhow::{Context, Result, bail};
use clustersnap_core::cluster::{Cluster, ClusterNode, QuorumPolicy, TransferLimits};
use clustersnap_core::retention::RetentionPolicy;
use clustersnap_core::storage::Backend;
use clustersnap_core::transport::{LocalTransport, NodePaths};
use clustersnap_backends::{LocalBackend, S3Backend};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// `cluster.toml`: the whole operator-facing configuration surface.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root for per-node staging areas (`<staging_root>/<node-id>`).
    pub staging_root: PathBuf,
    /// Where fingerprint index caches persist; omit to disable caching.
    #[serde(default)]
    pub index_cache_dir: Option<PathBuf>,
    pub backend: BackendConfig,
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub restore: RestoreConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    Local {
        path: PathBuf,
    },
    S3 {
        bucket: String,
        #[serde(default)]
        prefix: String,
        #[serde(default)]
        endpoint: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    pub data_dir: PathBuf,
    #[serde(default)]
    pub address: Option<String>,
    /// Overrides the default `<staging_root>/<id>` staging location.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub max_backups_to_keep: usize,
    pub max_age_days: Option<u32>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_backups_to_keep: 7,
            max_age_days: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// Minimum nodes that must stage successfully before activation;
    /// omitted means every node is required.
    pub min_nodes_required: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub node_parallelism: usize,
    pub segment_parallelism: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let defaults = TransferLimits::default();
        Self {
            node_parallelism: defaults.node_parallelism,
            segment_parallelism: defaults.segment_parallelism,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config =
            toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
        if config.nodes.is_empty() {
            bail!("config {} declares no nodes", path.display());
        }
        Ok(config)
    }

    pub fn cluster(&self) -> Cluster {
        Cluster::new(
            self.nodes
                .iter()
                .map(|n| {
                    let node = ClusterNode::new(n.id.as_str());
                    match &n.address {
                        Some(address) => node.with_address(address.clone()),
                        None => node,
                    }
                })
                .collect(),
        )
    }

    pub fn quorum(&self) -> QuorumPolicy {
        QuorumPolicy {
            min_nodes_required: self.restore.min_nodes_required,
        }
    }

    pub fn transfer_limits(&self) -> TransferLimits {
        TransferLimits {
            node_parallelism: self.limits.node_parallelism.max(1),
            segment_parallelism: self.limits.segment_parallelism.max(1),
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_backups_to_keep: self.retention.max_backups_to_keep,
            max_age: self
                .retention
                .max_age_days
                .map(|days| chrono::Duration::days(days as i64)),
        }
    }

    pub async fn build_backend(&self) -> Result<Arc<dyn Backend>> {
        match &self.backend {
            BackendConfig::Local { path } => {
                let backend = LocalBackend::create(path).await?;
                Ok(Arc::new(backend))
            }
            BackendConfig::S3 {
                bucket,
                prefix,
                endpoint,
            } => {
                let backend = match endpoint {
                    Some(endpoint) => {
                        S3Backend::with_endpoint(
                            bucket.clone(),
                            prefix.clone(),
                            endpoint.clone(),
                        )
                        .await?
                    }
                    None => S3Backend::new(bucket.clone(), prefix.clone()).await?,
                };
                backend.check().await?;
                Ok(Arc::new(backend))
            }
        }
    }

    pub fn build_transport(&self, backend: Arc<dyn Backend>) -> Arc<LocalTransport> {
        let mut transport =
            LocalTransport::new(backend, self.transfer_limits().segment_parallelism);
        for node in &self.nodes {
            let staging_dir = node
                .staging_dir
                .clone()
                .unwrap_or_else(|| self.staging_root.join(&node.id));
            let index_cache = self
                .index_cache_dir
                .as_ref()
                .map(|dir| dir.join(format!("{}.json", node.id)));
            transport = transport.with_node(
                clustersnap_core::NodeId::new(node.id.as_str()),
                NodePaths {
                    data_dir: node.data_dir.clone(),
                    staging_dir,
                    index_cache,
                },
            );
        }
        Arc::new(transport)
    }
}
