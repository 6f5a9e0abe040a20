use crate::cluster_index::ClusterIndex;
use crate::{Fingerprint, NodeId, SegmentEntry, SegmentMeta};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// A node's current on-disk segments, as reported by its fingerprint index.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub node_id: NodeId,
    pub segments: BTreeMap<String, SegmentMeta>,
}

impl NodeSnapshot {
    pub fn entries(&self) -> impl Iterator<Item = SegmentEntry> + '_ {
        self.segments.iter().map(|(path, meta)| SegmentEntry {
            path: path.clone(),
            size: meta.size,
            fingerprint: meta.fingerprint,
        })
    }
}

/// Upload/reference split for one node's backup attempt.
#[derive(Debug, Clone, Default)]
pub struct BackupPlan {
    pub to_upload: Vec<SegmentEntry>,
    pub to_reference: Vec<SegmentEntry>,
}

impl BackupPlan {
    pub fn upload_bytes(&self) -> u64 {
        self.to_upload.iter().map(|s| s.size).sum()
    }

    /// All segments of the attempt, manifest-ordered.
    pub fn all_entries(&self) -> Vec<SegmentEntry> {
        let mut entries: Vec<SegmentEntry> = self
            .to_upload
            .iter()
            .chain(self.to_reference.iter())
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }
}

/// One node's share of a cluster-wide backup plan.
#[derive(Debug, Clone)]
pub struct NodeAssignment {
    pub node_id: NodeId,
    pub plan: BackupPlan,
}

/// Splits a single node's snapshot against the cluster index.
///
/// A fingerprint present anywhere in the cluster's history — any node, any
/// generation — is a reference; only unseen content uploads. If the same
/// fingerprint is racing with a concurrent run, referencing it
/// optimistically is safe: content-addressed puts of identical bytes are
/// idempotent, so no locking is needed.
pub fn plan(current: &BTreeMap<String, SegmentMeta>, index: &ClusterIndex) -> BackupPlan {
    let mut plan = BackupPlan::default();
    let mut uploading: HashSet<Fingerprint> = HashSet::new();

    for (path, meta) in current {
        let entry = SegmentEntry {
            path: path.clone(),
            size: meta.size,
            fingerprint: meta.fingerprint,
        };
        if index.contains(&meta.fingerprint) || uploading.contains(&meta.fingerprint) {
            plan.to_reference.push(entry);
        } else {
            uploading.insert(meta.fingerprint);
            plan.to_upload.push(entry);
        }
    }
    plan
}

/// Plans a whole cluster backup, assigning each missing fingerprint's
/// upload to exactly one node.
///
/// Replicas commonly hold byte-identical segments; uploading each unique
/// fingerprint once is the point. Assignment order is rarest-first, then
/// largest-first, each going to the least-loaded node holding the content,
/// to spread upload bytes fairly across the cluster.
pub fn plan_cluster(snapshots: &[NodeSnapshot], index: &ClusterIndex) -> Vec<NodeAssignment> {
    // fingerprint -> (size, node indices holding it)
    let mut holders: HashMap<Fingerprint, (u64, Vec<usize>)> = HashMap::new();
    for (node_index, snapshot) in snapshots.iter().enumerate() {
        let mut seen: HashSet<Fingerprint> = HashSet::new();
        for meta in snapshot.segments.values() {
            if seen.insert(meta.fingerprint) {
                holders
                    .entry(meta.fingerprint)
                    .or_insert((meta.size, Vec::new()))
                    .1
                    .push(node_index);
            }
        }
    }

    let mut todo: Vec<(&Fingerprint, &(u64, Vec<usize>))> = holders
        .iter()
        .filter(|(fingerprint, _)| !index.contains(fingerprint))
        .collect();
    todo.sort_by_key(|(fingerprint, (size, nodes))| {
        (nodes.len(), std::cmp::Reverse(*size), **fingerprint)
    });

    let mut assigned_bytes = vec![0u64; snapshots.len()];
    let mut assignment: HashMap<Fingerprint, usize> = HashMap::new();
    for (fingerprint, (size, node_indices)) in todo {
        let node_index = node_indices
            .iter()
            .copied()
            .min_by_key(|i| (assigned_bytes[*i], *i))
            .expect("fingerprint with no holder");
        assigned_bytes[node_index] += size;
        assignment.insert(*fingerprint, node_index);
    }

    let assignments: Vec<NodeAssignment> = snapshots
        .iter()
        .enumerate()
        .map(|(node_index, snapshot)| {
            let mut plan = BackupPlan::default();
            let mut uploading: HashSet<Fingerprint> = HashSet::new();
            for entry in snapshot.entries() {
                let ours = assignment.get(&entry.fingerprint) == Some(&node_index)
                    && uploading.insert(entry.fingerprint);
                if ours {
                    plan.to_upload.push(entry);
                } else {
                    plan.to_reference.push(entry);
                }
            }
            NodeAssignment {
                node_id: snapshot.node_id.clone(),
                plan,
            }
        })
        .collect();

    debug!(
        nodes = assignments.len(),
        unique_uploads = assignment.len(),
        "Planned cluster backup"
    );
    assignments
}
