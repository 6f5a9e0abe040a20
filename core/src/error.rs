use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Integrity error for {key}: expected {expected}, got {actual}")]
    Integrity {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Manifest {backup_id}/{node_id} references missing segment {fingerprint} ({path})")]
    ManifestInconsistent {
        backup_id: String,
        node_id: String,
        path: String,
        fingerprint: String,
    },

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Manifest not found: {backup_id}/{node_id}")]
    ManifestNotFound { backup_id: String, node_id: String },

    #[error("Backup not found: {backup_id}")]
    BackupNotFound { backup_id: String },

    #[error("Restore not found: {restore_id}")]
    RestoreNotFound { restore_id: String },

    #[error("Insufficient nodes: backup covers {required} nodes, cluster has {available}")]
    InsufficientNodes { required: usize, available: usize },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
