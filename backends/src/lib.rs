//! Concrete storage backend adapters behind the
//! `clustersnap_core::storage::Backend` seam.

pub mod local;
pub mod s3;

pub use local::LocalBackend;
pub use s3::S3Backend;
