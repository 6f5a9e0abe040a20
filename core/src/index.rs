use crate::{Fingerprint, Result, SegmentMeta};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::UNIX_EPOCH;
use tokio::fs;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Per-node cache mapping relative paths to `(size, mtime, fingerprint)`.
///
/// The `(size, mtime)` pair is a fast-path heuristic only: a matching pair
/// reuses the cached fingerprint, anything else rehashes the file. The
/// cache is an optimization, never a source of truth — a missing or
/// corrupt cache file just means a full rehash on the next update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FingerprintIndex {
    entries: BTreeMap<String, SegmentMeta>,
}

/// Result of one index update pass over a data directory.
#[derive(Debug, Clone)]
pub struct IndexUpdate {
    /// Full current mapping of relative path to segment metadata.
    pub current: BTreeMap<String, SegmentMeta>,
    /// Paths whose content fingerprint differs from the prior pass
    /// (includes paths seen for the first time). An mtime-only touch with
    /// unchanged bytes does not appear here.
    pub changed: BTreeSet<String>,
    /// Files that could not be read; never fatal to the whole pass.
    pub errors: Vec<FileError>,
}

#[derive(Debug, Clone)]
pub struct FileError {
    pub path: String,
    pub error: String,
}

impl FingerprintIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a previously persisted index. Missing or unreadable caches
    /// degrade to an empty index rather than an error.
    pub async fn load<P: AsRef<Path>>(path: P) -> Self {
        match fs::read(path.as_ref()).await {
            Ok(data) => match serde_json::from_slice(&data) {
                Ok(index) => index,
                Err(error) => {
                    warn!(
                        path = %path.as_ref().display(),
                        %error,
                        "Fingerprint index cache corrupt, rehashing everything"
                    );
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let data = serde_json::to_vec(self)?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, data).await?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&SegmentMeta> {
        self.entries.get(path)
    }

    /// Walks `root` and refreshes the index. Files whose `(size, mtime)`
    /// are unchanged keep their cached fingerprint without rehashing;
    /// everything else is rehashed. Deleted files drop out of the mapping.
    pub fn update(&mut self, root: &Path) -> IndexUpdate {
        let mut current = BTreeMap::new();
        let mut changed = BTreeSet::new();
        let mut errors = Vec::new();

        for entry in WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = match entry.path().strip_prefix(root) {
                Ok(p) => p.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(error) => {
                    errors.push(FileError {
                        path: relative,
                        error: error.to_string(),
                    });
                    continue;
                }
            };
            let size = metadata.len();
            let mtime_ns = mtime_ns(&metadata);

            let prior = self.entries.get(&relative).copied();
            let meta = match prior {
                Some(cached) if cached.size == size && cached.mtime_ns == mtime_ns => cached,
                _ => {
                    let fingerprint = match hash_file(entry.path()) {
                        Ok(fp) => fp,
                        Err(error) => {
                            errors.push(FileError {
                                path: relative,
                                error: error.to_string(),
                            });
                            continue;
                        }
                    };
                    SegmentMeta {
                        size,
                        mtime_ns,
                        fingerprint,
                    }
                }
            };

            // Changed means changed content, not changed stat data.
            if prior.map(|p| p.fingerprint) != Some(meta.fingerprint) {
                changed.insert(relative.clone());
            }
            current.insert(relative, meta);
        }

        debug!(
            files = current.len(),
            changed = changed.len(),
            errors = errors.len(),
            root = %root.display(),
            "Fingerprint index updated"
        );

        self.entries = current.clone();
        IndexUpdate {
            current,
            changed,
            errors,
        }
    }
}

fn mtime_ns(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

fn hash_file(path: &Path) -> std::io::Result<Fingerprint> {
    let file = std::fs::File::open(path)?;
    Fingerprint::from_reader(std::io::BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, rel: &str, content: &[u8]) {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn first_pass_reports_everything_changed() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.db", b"alpha");
        write(&dir, "sub/b.db", b"beta");

        let mut index = FingerprintIndex::new();
        let update = index.update(dir.path());

        assert_eq!(update.current.len(), 2);
        assert_eq!(update.changed.len(), 2);
        assert!(update.changed.contains("a.db"));
        assert!(update.changed.contains("sub/b.db"));
        assert!(update.errors.is_empty());
    }

    #[test]
    fn unchanged_files_are_not_reported() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.db", b"alpha");

        let mut index = FingerprintIndex::new();
        index.update(dir.path());
        let update = index.update(dir.path());

        assert_eq!(update.current.len(), 1);
        assert!(update.changed.is_empty());
    }

    #[test]
    fn mtime_only_touch_is_not_a_change() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.db", b"alpha");

        let mut index = FingerprintIndex::new();
        let before = index.update(dir.path());

        // Rewrite identical bytes; mtime moves, content does not.
        std::thread::sleep(std::time::Duration::from_millis(20));
        write(&dir, "a.db", b"alpha");

        let update = index.update(dir.path());
        assert!(update.changed.is_empty());
        assert_eq!(
            update.current["a.db"].fingerprint,
            before.current["a.db"].fingerprint
        );
    }

    #[test]
    fn modified_content_is_rehashed() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.db", b"alpha");

        let mut index = FingerprintIndex::new();
        index.update(dir.path());

        std::thread::sleep(std::time::Duration::from_millis(20));
        write(&dir, "a.db", b"alpha-v2");

        let update = index.update(dir.path());
        assert_eq!(update.changed.len(), 1);
        assert_eq!(
            update.current["a.db"].fingerprint,
            Fingerprint::from_data(b"alpha-v2")
        );
    }

    #[test]
    fn deleted_files_drop_out() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.db", b"alpha");
        write(&dir, "b.db", b"beta");

        let mut index = FingerprintIndex::new();
        index.update(dir.path());
        fs::remove_file(dir.path().join("b.db")).unwrap();

        let update = index.update(dir.path());
        assert_eq!(update.current.len(), 1);
        assert!(update.changed.is_empty());
        assert!(index.get("b.db").is_none());
    }

    #[tokio::test]
    async fn persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.db", b"alpha");
        let cache = dir.path().join("cache").join("index.json");

        let mut index = FingerprintIndex::new();
        index.update(dir.path());
        index.save(&cache).await.unwrap();

        let reloaded = FingerprintIndex::load(&cache).await;
        assert_eq!(reloaded.len(), 1);
        assert_eq!(
            reloaded.get("a.db").unwrap().fingerprint,
            Fingerprint::from_data(b"alpha")
        );
    }

    #[tokio::test]
    async fn corrupt_cache_degrades_to_empty() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("index.json");
        fs::write(&cache, b"{not json").unwrap();

        let index = FingerprintIndex::load(&cache).await;
        assert!(index.is_empty());
    }
}
