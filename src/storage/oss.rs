//! Object storage service backend.
//!
//! Talks to the vendor's bucket/object REST API (`oss/v2`) over reqwest.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::backend::{BlobStore, BucketInfo, ObjectInfo, RetentionPolicy, StorageError, StorageResult};
use crate::forge::{AccessToken, ForgeHttp};

/// Region buckets are created in
const DEFAULT_REGION: &str = "US";

/// Page size for bucket and object listings
const PAGE_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
struct ListPage<T> {
    items: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBucketBody<'a> {
    bucket_key: &'a str,
    policy_key: RetentionPolicy,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignedBody {
    minutes_expiration: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedResponse {
    signed_url: String,
}

/// Object storage service client
pub struct OssStorage {
    http: Arc<ForgeHttp>,
    region: String,
}

impl OssStorage {
    pub fn new(http: Arc<ForgeHttp>) -> Self {
        Self {
            http,
            region: DEFAULT_REGION.to_string(),
        }
    }

    /// Build `oss/v2/buckets/{bucket}[/objects/{object}[/extra...]]` with
    /// every segment percent-encoded.
    fn endpoint(&self, bucket_key: Option<&str>, object_name: Option<&str>, extra: &[&str]) -> StorageResult<Url> {
        let mut url = Url::parse(&self.http.url("oss/v2/buckets"))
            .map_err(|e| StorageError::Other(format!("Invalid API base: {}", e)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StorageError::Other("API base cannot carry a path".to_string()))?;
            if let Some(bucket) = bucket_key {
                segments.push(bucket);
            }
            if let Some(object) = object_name {
                segments.push("objects");
                segments.push(object);
            }
            segments.extend(extra);
        }
        Ok(url)
    }

    async fn list_pages<T: serde::de::DeserializeOwned>(
        &self,
        token: &AccessToken,
        endpoint: &str,
        first: Url,
        what: &str,
    ) -> StorageResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(first.to_string());

        while let Some(url) = next.take() {
            let request = self
                .http
                .client()
                .get(&url)
                .header("Authorization", token.bearer());
            let page: ListPage<T> = self
                .http
                .send_json(endpoint, request)
                .await
                .map_err(|e| StorageError::from_forge(e, what))?;

            items.extend(page.items);
            next = page.next.filter(|n| !n.is_empty());
        }

        Ok(items)
    }
}

#[async_trait]
impl BlobStore for OssStorage {
    async fn list_buckets(&self, token: &AccessToken) -> StorageResult<Vec<BucketInfo>> {
        let mut url = self.endpoint(None, None, &[])?;
        url.query_pairs_mut()
            .append_pair("region", &self.region)
            .append_pair("limit", &PAGE_LIMIT.to_string());

        self.list_pages(token, "GET buckets", url, "buckets").await
    }

    async fn create_bucket(
        &self,
        token: &AccessToken,
        bucket_key: &str,
        policy: RetentionPolicy,
    ) -> StorageResult<BucketInfo> {
        let url = self.endpoint(None, None, &[])?;
        let request = self
            .http
            .client()
            .post(url)
            .header("Authorization", token.bearer())
            .header("x-ads-region", &self.region)
            .json(&CreateBucketBody {
                bucket_key,
                policy_key: policy,
            });

        let bucket = self
            .http
            .send_json("POST buckets", request)
            .await
            .map_err(|e| StorageError::from_forge(e, bucket_key))?;

        tracing::info!("Created bucket {} ({:?})", bucket_key, policy);
        Ok(bucket)
    }

    async fn list_objects(&self, token: &AccessToken, bucket_key: &str) -> StorageResult<Vec<ObjectInfo>> {
        let mut url = self.endpoint(Some(bucket_key), None, &["objects"])?;
        url.query_pairs_mut().append_pair("limit", &PAGE_LIMIT.to_string());

        self.list_pages(token, "GET objects", url, bucket_key).await
    }

    async fn put(
        &self,
        token: &AccessToken,
        bucket_key: &str,
        object_name: &str,
        data: Bytes,
    ) -> StorageResult<ObjectInfo> {
        let url = self.endpoint(Some(bucket_key), Some(object_name), &[])?;
        let size = data.len();
        let request = self
            .http
            .client()
            .put(url)
            .header("Authorization", token.bearer())
            .header("Content-Type", "application/octet-stream")
            .body(data);

        let object = self
            .http
            .send_json("PUT object", request)
            .await
            .map_err(|e| StorageError::from_forge(e, &format!("{}/{}", bucket_key, object_name)))?;

        tracing::debug!("Uploaded {}/{} ({} bytes)", bucket_key, object_name, size);
        Ok(object)
    }

    async fn signed_url(
        &self,
        token: &AccessToken,
        bucket_key: &str,
        object_name: &str,
        minutes: u32,
    ) -> StorageResult<String> {
        let mut url = self.endpoint(Some(bucket_key), Some(object_name), &["signed"])?;
        url.query_pairs_mut().append_pair("access", "read");

        let request = self
            .http
            .client()
            .post(url)
            .header("Authorization", token.bearer())
            .json(&SignedBody {
                minutes_expiration: minutes,
            });

        let signed: SignedResponse = self
            .http
            .send_json("POST signed", request)
            .await
            .map_err(|e| StorageError::from_forge(e, &format!("{}/{}", bucket_key, object_name)))?;

        Ok(signed.signed_url)
    }

    async fn fetch_url(&self, url: &str) -> StorageResult<Bytes> {
        let request = self.http.client().get(url);
        self.http
            .send_bytes("GET signed content", request)
            .await
            .map_err(|e| StorageError::from_forge(e, url))
    }

    fn object_url(&self, bucket_key: &str, object_name: &str) -> String {
        match self.endpoint(Some(bucket_key), Some(object_name), &[]) {
            Ok(url) => url.to_string(),
            Err(_) => self
                .http
                .url(&format!("oss/v2/buckets/{}/objects/{}", bucket_key, object_name)),
        }
    }
}
