//! Blob store abstraction.
//!
//! The vendor object storage service is the only production backend; tests
//! provide an in-memory one.

mod backend;
mod oss;

pub use backend::{object_base_name, BlobStore, BucketInfo, ObjectInfo, RetentionPolicy, StorageError};
#[cfg(test)]
pub use backend::StorageResult;
pub use oss::OssStorage;
