//! Object-store client: artifact existence, uploads, and signed read URLs.
//!
//! Artifacts are uploaded by the remote jobs themselves, directly to the
//! store, under fingerprint- or client-derived names. The server only checks
//! existence, mints signed read URLs, and (in session mode) stores screenshot
//! bytes delivered through the data callback.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::StorageConfig;
use crate::error::StorageError;

/// External object store holding job artifacts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether `object` exists in the bucket.
    async fn exists(&self, object: &str) -> Result<bool, StorageError>;

    /// Upload raw bytes as `object`.
    async fn put(&self, object: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    /// Mint a time-limited, pre-authorized read URL for `object`.
    async fn signed_read_url(&self, object: &str) -> Result<String, StorageError>;

    /// Direct (authenticated) URL for `object` — the target of workitem
    /// output arguments.
    fn object_url(&self, object: &str) -> String;

    /// Fully qualified object id for the translation pipeline.
    fn object_id(&self, object: &str) -> String;

    /// Headers the engine needs to PUT an output directly into the store.
    fn upload_headers(&self) -> HashMap<String, String>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedResource {
    signed_url: String,
}

/// Reqwest-backed store client for an OSS-style bucket API.
pub struct BucketStore {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
    token: SecretString,
    signed_url_minutes: u32,
}

impl BucketStore {
    pub fn new(client: reqwest::Client, config: &StorageConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            token: config.access_token.clone(),
            signed_url_minutes: config.signed_url_minutes,
        }
    }
}

#[async_trait]
impl ObjectStore for BucketStore {
    async fn exists(&self, object: &str) -> Result<bool, StorageError> {
        let url = format!("{}/details", self.object_url(object));
        let resp = self
            .client
            .head(url)
            .bearer_auth(self.token.expose_secret())
            .send()
            .await?;

        match resp.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(StorageError::UnexpectedStatus {
                object: object.to_string(),
                status,
            }),
        }
    }

    async fn put(&self, object: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let resp = self
            .client
            .put(self.object_url(object))
            .bearer_auth(self.token.expose_secret())
            .header("Content-Type", "application/octet-stream")
            .body(bytes)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(StorageError::UnexpectedStatus {
                object: object.to_string(),
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn signed_read_url(&self, object: &str) -> Result<String, StorageError> {
        let url = format!("{}/signed?access=read", self.object_url(object));
        let resp = self
            .client
            .post(url)
            .bearer_auth(self.token.expose_secret())
            .json(&serde_json::json!({ "minutesExpiration": self.signed_url_minutes }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(StorageError::UnexpectedStatus {
                object: object.to_string(),
                status: resp.status().as_u16(),
            });
        }

        let signed: SignedResource = resp
            .json()
            .await
            .map_err(|e| StorageError::InvalidResponse(e.to_string()))?;
        Ok(signed.signed_url)
    }

    fn object_url(&self, object: &str) -> String {
        format!("{}/buckets/{}/objects/{}", self.base_url, self.bucket, object)
    }

    fn object_id(&self, object: &str) -> String {
        format!("urn:adsk.objects:os.object:{}/{}", self.bucket, object)
    }

    fn upload_headers(&self) -> HashMap<String, String> {
        HashMap::from([(
            "Authorization".to_string(),
            format!("Bearer {}", self.token.expose_secret()),
        )])
    }
}

/// Existence check for previously produced artifacts.
///
/// Lookup failures report a miss: the store is eventually consistent and a
/// spurious miss only costs a redundant job, while a spurious hit would skip
/// work that was never done.
pub struct ResultCache {
    store: Arc<dyn ObjectStore>,
}

impl ResultCache {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// `true` only when the artifact is known to exist.
    pub async fn exists(&self, object: &str) -> bool {
        match self.store.exists(object).await {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(object, error = %err, "Cache lookup failed, treating as miss");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeStore;

    fn bucket_store() -> BucketStore {
        BucketStore {
            client: reqwest::Client::new(),
            base_url: "https://store.example/oss/v2".to_string(),
            bucket: "acme-shelving".to_string(),
            token: SecretString::from("tok".to_string()),
            signed_url_minutes: 10,
        }
    }

    #[test]
    fn object_url_and_id_formats() {
        let store = bucket_store();
        assert_eq!(
            store.object_url("ab12.zip"),
            "https://store.example/oss/v2/buckets/acme-shelving/objects/ab12.zip"
        );
        assert_eq!(
            store.object_id("ab12.zip"),
            "urn:adsk.objects:os.object:acme-shelving/ab12.zip"
        );
    }

    #[test]
    fn upload_headers_carry_bearer_token() {
        let headers = bucket_store().upload_headers();
        assert_eq!(headers.get("Authorization").unwrap(), "Bearer tok");
    }

    #[tokio::test]
    async fn cache_hit_when_object_exists() {
        let store = Arc::new(FakeStore::new().with_object("ab12.zip"));
        let cache = ResultCache::new(store);
        assert!(cache.exists("ab12.zip").await);
        assert!(!cache.exists("other.zip").await);
    }

    #[tokio::test]
    async fn cache_lookup_error_is_a_miss() {
        let store = Arc::new(FakeStore::new().with_object("ab12.zip").failing());
        let cache = ResultCache::new(store);
        assert!(!cache.exists("ab12.zip").await);
    }
}
