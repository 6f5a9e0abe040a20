//! Node-side operations: snapshotting, segment upload, staging and
//! activation. These run wherever the node's data directory lives —
//! in-process for `LocalTransport`, on the node itself for a remote
//! transport.

use crate::cancel::CancelFlag;
use crate::index::FingerprintIndex;
use crate::planner::NodeSnapshot;
use crate::retry::{RetryConfig, retry_with_backoff};
use crate::storage::Backend;
use crate::transport::{TransferFailure, TransferReport};
use crate::{Error, Fingerprint, NodeId, Result, SegmentEntry};
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Lock file guarding the activation swap; never treated as segment data.
const ACTIVATE_LOCK: &str = ".clustersnap-activate.lock";

enum SegmentOutcome {
    Completed { bytes: u64 },
    Skipped,
    Failed(TransferFailure),
}

fn collect(outcomes: Vec<SegmentOutcome>) -> TransferReport {
    let mut report = TransferReport::default();
    for outcome in outcomes {
        match outcome {
            SegmentOutcome::Completed { bytes } => {
                report.completed += 1;
                report.bytes_transferred += bytes;
            }
            SegmentOutcome::Skipped => report.skipped += 1,
            SegmentOutcome::Failed(failure) => report.failures.push(failure),
        }
    }
    report
}

fn failure(entry: &SegmentEntry, error: impl ToString) -> SegmentOutcome {
    SegmentOutcome::Failed(TransferFailure {
        path: entry.path.clone(),
        fingerprint: entry.fingerprint,
        error: error.to_string(),
    })
}

/// Refreshes the node's fingerprint index and returns the current
/// snapshot. Unreadable files are logged, not fatal.
pub async fn take_snapshot(
    node_id: &NodeId,
    data_dir: &Path,
    index_cache: Option<&Path>,
) -> Result<NodeSnapshot> {
    let mut index = match index_cache {
        Some(path) => FingerprintIndex::load(path).await,
        None => FingerprintIndex::new(),
    };
    let update = index.update(data_dir);
    for error in &update.errors {
        warn!(node = %node_id, path = %error.path, error = %error.error, "Unreadable file skipped in snapshot");
    }
    if let Some(path) = index_cache {
        index.save(path).await?;
    }
    debug!(node = %node_id, files = update.current.len(), changed = update.changed.len(), "Node snapshot taken");
    Ok(NodeSnapshot {
        node_id: node_id.clone(),
        segments: update.current,
    })
}

/// Uploads segments from the data dir to the backend with bounded
/// concurrency. Each upload is verified by reading the object back and
/// checking size and fingerprint; a mismatch is surfaced, never retried.
pub async fn upload_segments(
    backend: &Arc<dyn Backend>,
    data_dir: &Path,
    segments: &[SegmentEntry],
    parallelism: usize,
    retry: &RetryConfig,
    cancel: &CancelFlag,
) -> Result<TransferReport> {
    let outcomes = stream::iter(segments.iter().cloned())
        .map(|entry| {
            let backend = backend.clone();
            let data_dir = data_dir.to_path_buf();
            let retry = retry.clone();
            let cancel = cancel.clone();
            async move { upload_one(&backend, &data_dir, &entry, &retry, &cancel).await }
        })
        .buffer_unordered(parallelism.max(1))
        .collect::<Vec<_>>()
        .await;

    let report = collect(outcomes);
    info!(
        completed = report.completed,
        skipped = report.skipped,
        failed = report.failures.len(),
        bytes = report.bytes_transferred,
        "Segment upload batch finished"
    );
    Ok(report)
}

async fn upload_one(
    backend: &Arc<dyn Backend>,
    data_dir: &Path,
    entry: &SegmentEntry,
    retry: &RetryConfig,
    cancel: &CancelFlag,
) -> SegmentOutcome {
    if cancel.is_cancelled() {
        return failure(entry, Error::Cancelled);
    }
    let key = entry.blob_key();

    // Concurrent or resumed runs may have put the blob already; the key is
    // content-derived, so present means correct.
    match backend.exists(&key).await {
        Ok(true) => return SegmentOutcome::Skipped,
        Ok(false) => {}
        Err(error) => return failure(entry, error),
    }

    let data = match fs::read(data_dir.join(&entry.path)).await {
        Ok(data) => Bytes::from(data),
        Err(error) => return failure(entry, error),
    };
    let actual = Fingerprint::from_data(&data);
    if actual != entry.fingerprint {
        // Segments are immutable by contract; a drifting fingerprint means
        // the snapshot is stale and this attempt must not publish it.
        return failure(
            entry,
            Error::Integrity {
                key: key.clone(),
                expected: entry.fingerprint.to_hex(),
                actual: actual.to_hex(),
            },
        );
    }

    let put_result = retry_with_backoff(retry, "segment_put", || {
        let data = data.clone();
        let backend = backend.clone();
        let key = key.clone();
        async move { backend.put(&key, data).await }
    })
    .await;
    if let Err(error) = put_result {
        return failure(entry, error);
    }

    match verify_remote(backend, &key, entry).await {
        Ok(()) => SegmentOutcome::Completed {
            bytes: entry.size,
        },
        Err(error) => failure(entry, error),
    }
}

/// Read-back verification of a remote object against the local fingerprint.
async fn verify_remote(
    backend: &Arc<dyn Backend>,
    key: &str,
    entry: &SegmentEntry,
) -> Result<()> {
    let info = backend.stat(key).await?;
    if info.size != entry.size {
        return Err(Error::Integrity {
            key: key.to_string(),
            expected: format!("{} bytes", entry.size),
            actual: format!("{} bytes", info.size),
        });
    }
    let remote = backend.get(key).await?;
    let actual = Fingerprint::from_data(&remote);
    if actual != entry.fingerprint {
        return Err(Error::Integrity {
            key: key.to_string(),
            expected: entry.fingerprint.to_hex(),
            actual: actual.to_hex(),
        });
    }
    Ok(())
}

/// Downloads segments into the staging dir with bounded concurrency.
/// A staged file already matching its target fingerprint is skipped, which
/// is what makes interrupted restores cheap to resume. Downloaded bytes
/// are verified before anything is written into the staging tree.
pub async fn stage_segments(
    backend: &Arc<dyn Backend>,
    staging_dir: &Path,
    segments: &[SegmentEntry],
    parallelism: usize,
    retry: &RetryConfig,
    cancel: &CancelFlag,
) -> Result<TransferReport> {
    let outcomes = stream::iter(segments.iter().cloned())
        .map(|entry| {
            let backend = backend.clone();
            let staging_dir = staging_dir.to_path_buf();
            let retry = retry.clone();
            let cancel = cancel.clone();
            async move { stage_one(&backend, &staging_dir, &entry, &retry, &cancel).await }
        })
        .buffer_unordered(parallelism.max(1))
        .collect::<Vec<_>>()
        .await;

    let report = collect(outcomes);
    info!(
        completed = report.completed,
        skipped = report.skipped,
        failed = report.failures.len(),
        bytes = report.bytes_transferred,
        "Segment staging batch finished"
    );
    Ok(report)
}

async fn stage_one(
    backend: &Arc<dyn Backend>,
    staging_dir: &Path,
    entry: &SegmentEntry,
    retry: &RetryConfig,
    cancel: &CancelFlag,
) -> SegmentOutcome {
    if cancel.is_cancelled() {
        return failure(entry, Error::Cancelled);
    }
    let staged_path = staging_dir.join(&entry.path);

    if let Ok(existing) = fs::read(&staged_path).await {
        if Fingerprint::from_data(&existing) == entry.fingerprint {
            return SegmentOutcome::Skipped;
        }
        // Stale leftover from an earlier attempt at different content.
        let _ = fs::remove_file(&staged_path).await;
    }

    let key = entry.blob_key();
    let data = match retry_with_backoff(retry, "segment_get", || {
        let backend = backend.clone();
        let key = key.clone();
        async move { backend.get(&key).await }
    })
    .await
    {
        Ok(data) => data,
        Err(error) => return failure(entry, error),
    };

    let actual = Fingerprint::from_data(&data);
    if actual != entry.fingerprint {
        // Discard the transfer; never stage bytes that fail verification.
        return failure(
            entry,
            Error::Integrity {
                key,
                expected: entry.fingerprint.to_hex(),
                actual: actual.to_hex(),
            },
        );
    }

    if let Err(error) = write_staged(&staged_path, &data).await {
        return failure(entry, error);
    }
    SegmentOutcome::Completed {
        bytes: entry.size,
    }
}

async fn write_staged(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    // tmp-then-rename so a crash never leaves a plausible-looking partial
    // file for a later resume pass to trust.
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".part");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, data).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Scoped exclusive access to a data directory for the activation swap.
struct ActivationGuard {
    lock_path: PathBuf,
}

impl ActivationGuard {
    fn acquire(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let lock_path = data_dir.join(ACTIVATE_LOCK);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(_) => Ok(Self { lock_path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(Error::Other(format!(
                "data directory {} is locked by another activation",
                data_dir.display()
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for ActivationGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.lock_path);
    }
}

/// Swaps staged segments into the data directory and removes files the
/// target manifest does not name. Holds the directory lock only for the
/// duration of the swap.
pub async fn activate_staged(
    data_dir: &Path,
    staging_dir: &Path,
    target: &[SegmentEntry],
) -> Result<()> {
    let _guard = ActivationGuard::acquire(data_dir)?;

    for entry in target {
        let staged = staging_dir.join(&entry.path);
        let live = data_dir.join(&entry.path);
        if fs::metadata(&staged).await.is_ok() {
            if let Some(parent) = live.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::rename(&staged, &live).await?;
        } else if fs::metadata(&live).await.is_err() {
            return Err(Error::Other(format!(
                "segment {} neither staged nor present, activation refused",
                entry.path
            )));
        }
    }

    // Files the manifest does not name must not survive activation.
    let wanted: std::collections::HashSet<&str> =
        target.iter().map(|e| e.path.as_str()).collect();
    for file_entry in walkdir::WalkDir::new(data_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let relative = match file_entry.path().strip_prefix(data_dir) {
            Ok(p) => p.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        if relative == ACTIVATE_LOCK {
            continue;
        }
        if !wanted.contains(relative.as_str()) {
            debug!(path = %relative, "Removing file not present in target manifest");
            fs::remove_file(file_entry.path()).await?;
        }
    }

    info!(data_dir = %data_dir.display(), segments = target.len(), "Activated staged data");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn entry(path: &str, content: &[u8]) -> SegmentEntry {
        SegmentEntry {
            path: path.to_string(),
            size: content.len() as u64,
            fingerprint: Fingerprint::from_data(content),
        }
    }

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
        walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = e
                    .path()
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .to_string();
                (rel, std::fs::read(e.path()).unwrap())
            })
            .collect()
    }

    fn test_backend() -> Arc<dyn Backend> {
        Arc::new(MemoryBackend::new())
    }

    #[tokio::test]
    async fn upload_verifies_and_stores_by_fingerprint() {
        let backend = test_backend();
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.db", b"alpha");
        let entries = vec![entry("a.db", b"alpha")];

        let report = upload_segments(
            &backend,
            dir.path(),
            &entries,
            2,
            &RetryConfig::quick(),
            &CancelFlag::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.completed, 1);
        assert!(report.is_clean());
        assert!(backend.exists(&entries[0].blob_key()).await.unwrap());
    }

    #[tokio::test]
    async fn upload_skips_existing_blobs() {
        let backend = test_backend();
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.db", b"alpha");
        let entries = vec![entry("a.db", b"alpha")];
        backend
            .put(&entries[0].blob_key(), Bytes::from_static(b"alpha"))
            .await
            .unwrap();

        let report = upload_segments(
            &backend,
            dir.path(),
            &entries,
            2,
            &RetryConfig::quick(),
            &CancelFlag::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.completed, 0);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn upload_fails_when_file_drifted_from_snapshot() {
        let backend = test_backend();
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.db", b"drifted content");
        let entries = vec![entry("a.db", b"snapshotted content")];

        let report = upload_segments(
            &backend,
            dir.path(),
            &entries,
            2,
            &RetryConfig::quick(),
            &CancelFlag::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(backend.list("segments/").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn staging_skips_verified_segments_on_resume() {
        let backend = test_backend();
        let staging = TempDir::new().unwrap();
        let e = entry("a.db", b"alpha");
        backend
            .put(&e.blob_key(), Bytes::from_static(b"alpha"))
            .await
            .unwrap();
        write(staging.path(), "a.db", b"alpha");

        let report = stage_segments(
            &backend,
            staging.path(),
            &[e],
            2,
            &RetryConfig::quick(),
            &CancelFlag::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.bytes_transferred, 0);
    }

    #[tokio::test]
    async fn staging_discards_corrupt_downloads() {
        let backend = test_backend();
        let staging = TempDir::new().unwrap();
        let e = entry("a.db", b"alpha");
        // Blob under the right key but with wrong bytes.
        backend
            .put(&e.blob_key(), Bytes::from_static(b"corrupted"))
            .await
            .unwrap();

        let report = stage_segments(
            &backend,
            staging.path(),
            &[e],
            2,
            &RetryConfig::quick(),
            &CancelFlag::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].error.contains("Integrity"));
        assert!(!staging.path().join("a.db").exists());
    }

    #[tokio::test]
    async fn activation_swaps_staging_and_removes_strays() {
        let data = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        write(data.path(), "keep.db", b"kept");
        write(data.path(), "stray.db", b"stray");
        write(staging.path(), "new.db", b"downloaded");

        let target = vec![entry("keep.db", b"kept"), entry("new.db", b"downloaded")];
        activate_staged(data.path(), staging.path(), &target)
            .await
            .unwrap();

        let tree = read_tree(data.path());
        assert_eq!(tree.len(), 2);
        assert_eq!(tree["keep.db"], b"kept");
        assert_eq!(tree["new.db"], b"downloaded");
        assert!(!data.path().join("stray.db").exists());
        assert!(!data.path().join(ACTIVATE_LOCK).exists());
    }

    #[tokio::test]
    async fn activation_refuses_missing_segments() {
        let data = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let target = vec![entry("gone.db", b"never staged")];
        let err = activate_staged(data.path(), staging.path(), &target)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("gone.db"));
    }

    #[tokio::test]
    async fn snapshot_reports_current_fingerprints() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.db", b"alpha");
        let snapshot = take_snapshot(&NodeId::new("node-a"), dir.path(), None)
            .await
            .unwrap();
        assert_eq!(snapshot.segments.len(), 1);
        assert_eq!(
            snapshot.segments["a.db"].fingerprint,
            Fingerprint::from_data(b"alpha")
        );
    }
}
