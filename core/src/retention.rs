use crate::manifest::{BackupSet, ManifestStore};
use crate::storage::Backend;
use crate::{BackupId, Error, Fingerprint, Result, keys};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which backup sets to keep, ordered by recency.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub max_backups_to_keep: usize,
    pub max_age: Option<Duration>,
}

impl RetentionPolicy {
    pub fn keep_last(n: usize) -> Self {
        Self {
            max_backups_to_keep: n,
            max_age: None,
        }
    }
}

/// The deletions a policy implies, computed before anything is touched.
#[derive(Debug, Clone)]
pub struct PurgePlan {
    pub delete_sets: Vec<BackupId>,
    pub retained_sets: Vec<BackupId>,
    pub delete_segments: Vec<Fingerprint>,
}

impl PurgePlan {
    pub fn is_noop(&self) -> bool {
        self.delete_sets.is_empty() && self.delete_segments.is_empty()
    }
}

/// Applies the policy over all backup sets and computes which sets and
/// which orphaned segment blobs are safe to delete.
///
/// The most recent complete set is always retained, whatever the policy
/// says. Segment deletion is reference-counted across every retained
/// manifest — failed and in-progress manifests count as referencing,
/// since they may be resumed.
pub fn compute_purge_set(
    sets: &[BackupSet],
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Result<PurgePlan> {
    let mut ordered: Vec<&BackupSet> = sets.iter().collect();
    ordered.sort_by(|a, b| b.started_at().cmp(&a.started_at()));

    let safety_floor: Option<&BackupId> = ordered
        .iter()
        .find(|set| set.is_complete())
        .map(|set| &set.backup_id);

    let mut delete_sets = Vec::new();
    let mut retained_sets = Vec::new();
    for (rank, set) in ordered.iter().enumerate() {
        let too_many = rank >= policy.max_backups_to_keep;
        let too_old = policy
            .max_age
            .map(|max| now - set.started_at() > max)
            .unwrap_or(false);
        let is_floor = Some(&set.backup_id) == safety_floor;

        if (too_many || too_old) && !is_floor {
            delete_sets.push(set.backup_id.clone());
        } else {
            retained_sets.push(set.backup_id.clone());
        }
    }

    if !sets.is_empty() && retained_sets.is_empty() {
        return Err(Error::PolicyViolation(
            "purge would remove every backup; refusing".to_string(),
        ));
    }

    let retained_refs: HashSet<Fingerprint> = ordered
        .iter()
        .filter(|set| retained_sets.contains(&set.backup_id))
        .flat_map(|set| set.manifests.iter())
        .flat_map(|m| m.segments.iter().map(|s| s.fingerprint))
        .collect();

    let mut delete_segments: Vec<Fingerprint> = ordered
        .iter()
        .filter(|set| delete_sets.contains(&set.backup_id))
        .flat_map(|set| set.manifests.iter())
        .flat_map(|m| m.segments.iter().map(|s| s.fingerprint))
        .filter(|fp| !retained_refs.contains(fp))
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    delete_segments.sort();

    debug!(
        delete_sets = delete_sets.len(),
        retained_sets = retained_sets.len(),
        delete_segments = delete_segments.len(),
        "Computed purge plan"
    );
    Ok(PurgePlan {
        delete_sets,
        retained_sets,
        delete_segments,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct PurgeReport {
    pub deleted_sets: Vec<BackupId>,
    pub retained_sets: Vec<BackupId>,
    pub deleted_segments: usize,
    pub reclaimed_bytes: u64,
}

/// Executes a purge in crash-safe order: condemned manifests first, then
/// reference counts re-derived from what the backend still holds, then
/// orphaned blobs. A crash at any point leaves at worst an unreferenced
/// blob, reclaimed by the next run — never a referenced blob deleted.
pub async fn purge(backend: &Arc<dyn Backend>, policy: &RetentionPolicy) -> Result<PurgeReport> {
    let store = ManifestStore::new(backend.clone());
    let sets = store.list_sets().await?;
    let plan = compute_purge_set(&sets, policy, Utc::now())?;

    for backup_id in &plan.delete_sets {
        if let Some(set) = sets.iter().find(|s| &s.backup_id == backup_id) {
            for manifest in &set.manifests {
                store.delete(backup_id, &manifest.node_id).await?;
            }
            info!(backup_id = %backup_id, "Deleted backup set manifests");
        }
    }

    // Re-derive references from the backend itself: only blobs nothing
    // still names are deletable, including orphans from earlier crashes.
    let surviving = store.list_sets().await?;
    let referenced: HashSet<Fingerprint> = surviving
        .iter()
        .flat_map(|set| set.manifests.iter())
        .flat_map(|m| m.segments.iter().map(|s| s.fingerprint))
        .collect();

    let mut deleted_segments = 0usize;
    let mut reclaimed_bytes = 0u64;
    for key in backend.list(keys::SEGMENT_PREFIX).await? {
        let hex = &key[keys::SEGMENT_PREFIX.len()..];
        let fingerprint = match hex.parse::<Fingerprint>() {
            Ok(fp) => fp,
            Err(_) => {
                warn!(%key, "Leaving segment object with undecodable key in place");
                continue;
            }
        };
        if referenced.contains(&fingerprint) {
            continue;
        }
        if let Ok(info) = backend.stat(&key).await {
            reclaimed_bytes += info.size;
        }
        backend.delete(&key).await?;
        deleted_segments += 1;
    }

    info!(
        deleted_sets = plan.delete_sets.len(),
        deleted_segments,
        reclaimed_bytes,
        "Purge finished"
    );
    Ok(PurgeReport {
        deleted_sets: plan.delete_sets,
        retained_sets: plan.retained_sets,
        deleted_segments,
        reclaimed_bytes,
    })
}
