use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Content fingerprint of a segment. Two segments with equal fingerprints
/// hold identical bytes, regardless of where or when they were observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(blake3::Hash);

impl PartialOrd for Fingerprint {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fingerprint {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.as_bytes().cmp(other.0.as_bytes())
    }
}

impl Fingerprint {
    pub fn new(hash: blake3::Hash) -> Self {
        Self(hash)
    }

    pub fn from_data(data: &[u8]) -> Self {
        Self(blake3::hash(data))
    }

    /// Hashes a reader without pulling the whole content into memory.
    pub fn from_reader<R: std::io::Read>(reader: R) -> std::io::Result<Self> {
        let mut hasher = blake3::Hasher::new();
        hasher.update_reader(reader)?;
        Ok(Self(hasher.finalize()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }

    pub fn short_string(&self) -> String {
        self.to_hex().chars().take(8).collect()
    }
}

impl From<blake3::Hash> for Fingerprint {
    fn from(hash: blake3::Hash) -> Self {
        Self(hash)
    }
}

impl FromStr for Fingerprint {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut array = [0u8; 32];
        array.copy_from_slice(&bytes);
        Ok(Self(blake3::Hash::from(array)))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Fingerprint::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Identifier of one cluster node, stable across backup generations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier shared by every per-node manifest of one logical backup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupId(String);

impl BackupId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short_string(&self) -> String {
        self.0.chars().take(8).collect()
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BackupId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of one restore operation; names the persisted progress record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RestoreId(String);

impl RestoreId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RestoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RestoreId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What the fingerprint index knows about one local file: enough to decide
/// whether a rehash is needed, and the fingerprint once computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub size: u64,
    pub mtime_ns: i64,
    pub fingerprint: Fingerprint,
}

/// One row of a manifest: a relative path and the content it must hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentEntry {
    pub path: String,
    pub size: u64,
    pub fingerprint: Fingerprint,
}

impl SegmentEntry {
    pub fn blob_key(&self) -> String {
        keys::segment(&self.fingerprint)
    }
}

/// Deterministic, flat object keys. Segment keys depend only on content,
/// which is what makes concurrent uploads of identical data idempotent.
pub mod keys {
    use super::{BackupId, Fingerprint, NodeId, RestoreId};

    pub const SEGMENT_PREFIX: &str = "segments/";
    pub const MANIFEST_PREFIX: &str = "manifests/";
    pub const RESTORE_PREFIX: &str = "restores/";

    pub fn segment(fingerprint: &Fingerprint) -> String {
        format!("{}{}", SEGMENT_PREFIX, fingerprint.to_hex())
    }

    pub fn manifest(backup_id: &BackupId, node_id: &NodeId) -> String {
        format!("{}{}/{}", MANIFEST_PREFIX, backup_id, node_id)
    }

    pub fn manifest_prefix(backup_id: &BackupId) -> String {
        format!("{}{}/", MANIFEST_PREFIX, backup_id)
    }

    pub fn restore(restore_id: &RestoreId) -> String {
        format!("{}{}", RESTORE_PREFIX, restore_id)
    }
}
