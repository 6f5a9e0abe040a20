use crate::storage::Backend;
use crate::{Fingerprint, Result, keys};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Cluster-wide view of which segment content already exists remotely.
///
/// Built per run from the backend's own listing — blob keys are derived
/// from fingerprints, so the key listing IS the fingerprint-to-location
/// index. Nothing is cached between runs; readers tolerate staleness
/// (a missed entry costs a redundant upload, never correctness). This is
/// also what makes a failed backup resumable: whatever blobs a previous
/// attempt confirmed are in the listing and plan as references.
#[derive(Debug, Clone, Default)]
pub struct ClusterIndex {
    present: HashSet<Fingerprint>,
}

impl ClusterIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    pub async fn load(backend: &Arc<dyn Backend>) -> Result<Self> {
        let blob_keys = backend.list(keys::SEGMENT_PREFIX).await?;
        let mut present = HashSet::with_capacity(blob_keys.len());
        for key in blob_keys {
            let hex = &key[keys::SEGMENT_PREFIX.len()..];
            match hex.parse::<Fingerprint>() {
                Ok(fingerprint) => {
                    present.insert(fingerprint);
                }
                Err(_) => {
                    warn!(%key, "Ignoring segment object with undecodable key");
                }
            }
        }
        debug!(blobs = present.len(), "Loaded cluster fingerprint index");
        Ok(Self { present })
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.present.contains(fingerprint)
    }

    pub fn insert(&mut self, fingerprint: Fingerprint) {
        self.present.insert(fingerprint);
    }

    pub fn len(&self) -> usize {
        self.present.len()
    }

    pub fn is_empty(&self) -> bool {
        self.present.is_empty()
    }
}
