use crate::cancel::CancelFlag;
use crate::manifest::{Manifest, ManifestStatus, ManifestStore};
use crate::planner::BackupPlan;
use crate::storage::Backend;
use crate::transport::{NodeTransport, TransferReport};
use crate::{BackupId, Error, NodeId, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Builds one node's manifest: drives the planned uploads, verifies every
/// referenced blob, and publishes the manifest only once the attempt's
/// fate is known (write-before-publish).
///
/// A failed attempt still publishes a `Failed` manifest — never silently
/// discarded — so a retry with the same backup id re-plans against the
/// blobs this attempt confirmed and uploads only what is missing.
pub struct ManifestBuilder {
    backend: Arc<dyn Backend>,
    store: ManifestStore,
    transport: Arc<dyn NodeTransport>,
    cancel: CancelFlag,
}

/// The stored manifest plus the transfer statistics behind it.
#[derive(Debug)]
pub struct BuildOutcome {
    pub manifest: Manifest,
    pub report: TransferReport,
}

impl ManifestBuilder {
    pub fn new(backend: Arc<dyn Backend>, transport: Arc<dyn NodeTransport>) -> Self {
        Self {
            store: ManifestStore::new(backend.clone()),
            backend,
            transport,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn build(
        &self,
        backup_id: &BackupId,
        node_id: &NodeId,
        plan: BackupPlan,
        cluster_metadata: serde_json::Value,
    ) -> Result<BuildOutcome> {
        self.cancel.checkpoint()?;

        let mut manifest = Manifest::new(
            backup_id.clone(),
            node_id.clone(),
            plan.all_entries(),
            cluster_metadata,
        );

        let report = match self
            .transport
            .upload_segments(node_id, &plan.to_upload)
            .await
        {
            Ok(report) => report,
            Err(error) => {
                manifest.status = ManifestStatus::Failed;
                manifest.failure = Some(error.to_string());
                self.store.save(&manifest).await?;
                return Ok(BuildOutcome {
                    manifest,
                    report: TransferReport::default(),
                });
            }
        };

        if !report.is_clean() {
            let summary = report
                .failures
                .iter()
                .take(3)
                .map(|f| format!("{}: {}", f.path, f.error))
                .collect::<Vec<_>>()
                .join("; ");
            warn!(
                backup_id = %backup_id,
                node_id = %node_id,
                failed = report.failures.len(),
                "Upload failures, marking manifest failed"
            );
            manifest.status = ManifestStatus::Failed;
            manifest.failure = Some(format!(
                "{} segment upload(s) failed: {}",
                report.failures.len(),
                summary
            ));
            self.store.save(&manifest).await?;
            return Ok(BuildOutcome { manifest, report });
        }

        // Referenced segments were planned against a possibly stale index;
        // a manifest is complete only when every blob it names is actually
        // present in the backend.
        for entry in &plan.to_reference {
            if !self.backend.exists(&entry.blob_key()).await? {
                let error = Error::ManifestInconsistent {
                    backup_id: backup_id.to_string(),
                    node_id: node_id.to_string(),
                    path: entry.path.clone(),
                    fingerprint: entry.fingerprint.to_hex(),
                };
                manifest.status = ManifestStatus::Failed;
                manifest.failure = Some(error.to_string());
                self.store.save(&manifest).await?;
                return Ok(BuildOutcome { manifest, report });
            }
        }

        if self.cancel.is_cancelled() {
            manifest.status = ManifestStatus::Failed;
            manifest.failure = Some(Error::Cancelled.to_string());
            self.store.save(&manifest).await?;
            return Ok(BuildOutcome { manifest, report });
        }

        manifest.status = ManifestStatus::Complete;
        self.store.save(&manifest).await?;
        info!(
            backup_id = %backup_id,
            node_id = %node_id,
            uploaded = report.completed,
            skipped = report.skipped,
            referenced = plan.to_reference.len(),
            "Manifest complete"
        );
        Ok(BuildOutcome { manifest, report })
    }
}
