//! C2: Blob Store Adapter. Writes produced bytes under a deterministic key
//! and mints time-bounded signed read URLs (spec §4, table row C2). The
//! adapter is a thin capability wrapper, not a general object-store client —
//! callers never read bytes back through it; a signed URL is how a reader
//! gets the bytes.

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob store put failed: {0}")]
    PutFailed(String),

    #[error("failed to mint signed url: {0}")]
    SignFailed(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write bytes under `key`, overwriting any existing object at that key.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), BlobError>;

    /// Mint a time-bounded signed URL granting read access to `key` without
    /// the caller re-authenticating against the blob store.
    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, BlobError>;
}

pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    pub async fn from_config(bucket: String, region: String) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region))
            .load()
            .await;
        Self::new(Client::new(&config), bucket)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), BlobError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| BlobError::PutFailed(e.to_string()))?;

        Ok(())
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, BlobError> {
        let config = PresigningConfig::expires_in(ttl)
            .map_err(|e| BlobError::SignFailed(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| BlobError::SignFailed(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }
}

/// In-memory test double for [`BlobStore`]. Not behind `#[cfg(test)]` because
/// integration tests in `tests/` link against this crate as an ordinary
/// dependency and need it too.
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    /// In-memory blob store for unit tests: records puts and deterministically
    /// derives a "signed url" from the key and ttl so tests can assert on it.
    #[derive(Default)]
    pub struct InMemoryBlobStore {
        objects: RwLock<HashMap<String, Vec<u8>>>,
    }

    impl InMemoryBlobStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
            self.objects.read().await.get(key).cloned()
        }
    }

    #[async_trait]
    impl BlobStore for InMemoryBlobStore {
        async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<(), BlobError> {
            self.objects.write().await.insert(key.to_string(), bytes);
            Ok(())
        }

        async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, BlobError> {
            Ok(format!("https://blob.test/{key}?ttl={}", ttl.as_secs()))
        }
    }

    #[tokio::test]
    async fn put_then_signed_url_roundtrip() {
        let store = InMemoryBlobStore::new();
        store.put("cards/x.png", b"hello".to_vec(), "image/png").await.unwrap();
        assert_eq!(store.get("cards/x.png").await, Some(b"hello".to_vec()));

        let url = store.signed_url("cards/x.png", Duration::from_secs(900)).await.unwrap();
        assert!(url.contains("cards/x.png"));
        assert!(url.contains("ttl=900"));
    }
}
