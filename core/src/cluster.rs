use crate::NodeId;
use serde::{Deserialize, Serialize};

/// One member of the cluster as the coordinator sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterNode {
    pub id: NodeId,
    /// Endpoint for remote transports; in-process transports ignore it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl ClusterNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(id),
            address: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

/// The set of nodes an operation spans, in stable order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    nodes: Vec<ClusterNode>,
}

impl Cluster {
    pub fn new(nodes: Vec<ClusterNode>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[ClusterNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.iter().any(|n| &n.id == id)
    }
}

/// How many nodes must survive staging for a restore to proceed.
///
/// Operator-configured; `None` means all nodes are required.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QuorumPolicy {
    #[serde(default)]
    pub min_nodes_required: Option<usize>,
}

impl QuorumPolicy {
    pub fn require_all() -> Self {
        Self {
            min_nodes_required: None,
        }
    }

    pub fn at_least(n: usize) -> Self {
        Self {
            min_nodes_required: Some(n),
        }
    }

    pub fn required(&self, cluster_size: usize) -> usize {
        match self.min_nodes_required {
            Some(n) => n.min(cluster_size),
            None => cluster_size,
        }
    }
}

/// Bounds on concurrent work: per-node operations across the cluster and
/// per-segment transfers within one node are limited separately, since
/// segment transfer dominates I/O cost.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TransferLimits {
    pub node_parallelism: usize,
    pub segment_parallelism: usize,
}

impl Default for TransferLimits {
    fn default() -> Self {
        Self {
            node_parallelism: 4,
            segment_parallelism: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_defaults_to_all_nodes() {
        assert_eq!(QuorumPolicy::require_all().required(3), 3);
        assert_eq!(QuorumPolicy::at_least(2).required(3), 2);
        // A threshold above cluster size clamps down.
        assert_eq!(QuorumPolicy::at_least(9).required(3), 3);
    }
}
