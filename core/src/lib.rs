pub mod agent;
pub mod backup;
pub mod builder;
pub mod cancel;
pub mod cluster;
pub mod cluster_index;
pub mod error;
pub mod index;
pub mod manifest;
pub mod planner;
pub mod restore;
pub mod retention;
pub mod retry;
pub mod storage;
pub mod transport;
pub mod types;

pub use backup::{BackupCoordinator, BackupOptions, BackupReport};
pub use cancel::CancelFlag;
pub use cluster::{Cluster, ClusterNode, QuorumPolicy, TransferLimits};
pub use error::{Error, Result};
pub use index::FingerprintIndex;
pub use manifest::{BackupSet, Manifest, ManifestStatus, ManifestStore};
pub use restore::{RestoreCoordinator, RestorePhase, RestoreReport};
pub use retention::{PurgeReport, RetentionPolicy};
pub use storage::Backend;
pub use transport::{LocalTransport, NodePaths, NodeTransport};
pub use types::*;
