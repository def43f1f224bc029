//! Blob store trait definition.
//!
//! Buckets hold opaque objects addressed by `(bucket_key, object_name)`. The
//! automation service never talks to us for bytes: it reads and writes objects
//! directly, so the store must also hand out URLs for them.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::forge::{AccessToken, ForgeError};

/// Storage error types
#[derive(Debug)]
pub enum StorageError {
    /// Bucket or object not found
    NotFound(String),
    /// Bucket key already taken
    AlreadyExists(String),
    /// IO error
    Io(std::io::Error),
    /// Other error
    Other(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound(key) => write!(f, "Object not found: {}", key),
            StorageError::AlreadyExists(key) => write!(f, "Bucket already exists: {}", key),
            StorageError::Io(e) => write!(f, "IO error: {}", e),
            StorageError::Other(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(e.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

impl StorageError {
    /// Map a vendor error, naming the bucket/object it concerned
    pub fn from_forge(e: ForgeError, what: &str) -> Self {
        match e.status() {
            Some(404) => StorageError::NotFound(what.to_string()),
            Some(409) => StorageError::AlreadyExists(what.to_string()),
            _ => StorageError::Other(e.to_string()),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Bucket retention policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPolicy {
    /// Objects kept for 24 hours
    Transient,
    /// Objects kept for 30 days
    Temporary,
    /// Objects kept until deleted
    Persistent,
}

/// Last component of a client-supplied file name.
///
/// Browsers on Windows may send the full local path, so both `/` and `\`
/// count as separators whatever platform the server runs on.
pub fn object_base_name(file_name: &str) -> Option<&str> {
    file_name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .filter(|name| !name.is_empty())
}

/// Bucket details
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketInfo {
    pub bucket_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_key: Option<String>,
}

/// Object details
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    pub bucket_key: String,
    pub object_key: String,
    pub object_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Blob store client.
///
/// Every call carries the bearer token it runs under; the store itself holds
/// no credentials.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// List buckets visible to the token
    async fn list_buckets(&self, token: &AccessToken) -> StorageResult<Vec<BucketInfo>>;

    /// Create a bucket; `AlreadyExists` if the key is taken
    async fn create_bucket(
        &self,
        token: &AccessToken,
        bucket_key: &str,
        policy: RetentionPolicy,
    ) -> StorageResult<BucketInfo>;

    /// List objects in a bucket
    async fn list_objects(&self, token: &AccessToken, bucket_key: &str) -> StorageResult<Vec<ObjectInfo>>;

    /// Upload an object, replacing any previous content
    async fn put(
        &self,
        token: &AccessToken,
        bucket_key: &str,
        object_name: &str,
        data: Bytes,
    ) -> StorageResult<ObjectInfo>;

    /// Create a short-lived signed read URL for an object
    async fn signed_url(
        &self,
        token: &AccessToken,
        bucket_key: &str,
        object_name: &str,
        minutes: u32,
    ) -> StorageResult<String>;

    /// Download content from a pre-signed URL (reports, signed objects)
    async fn fetch_url(&self, url: &str) -> StorageResult<Bytes>;

    /// Direct URL of an object, usable with a bearer header
    fn object_url(&self, bucket_key: &str, object_name: &str) -> String;
}
