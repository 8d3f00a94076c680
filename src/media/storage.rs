use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};

use super::MediaError;

/// Durable blob storage. `put` returns the stored object's URL.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, MediaError>;
}

/// S3-style storage reached with plain `PUT {endpoint}/{bucket}/{key}`.
pub struct HttpObjectStorage {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpObjectStorage {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        let encoded_key = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}/{}", self.endpoint, bucket, encoded_key)
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, MediaError> {
        let url = self.object_url(bucket, key);
        let checksum = format!("{:x}", Sha256::digest(&bytes));

        let mut request = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-content-sha256", checksum)
            .body(bytes);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MediaError::Storage(e.to_string()))?;
        if !response.status().is_success() {
            return Err(MediaError::Storage(format!(
                "PUT {} returned {}",
                key,
                response.status()
            )));
        }
        Ok(url)
    }
}

/// In-process storage used when no endpoint is configured.
#[derive(Default)]
pub struct MemoryObjectStorage {
    objects: DashMap<String, (Vec<u8>, String)>,
    failing: AtomicBool,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `put` fail, simulating an outage.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<(Vec<u8>, String)> {
        self.objects
            .get(&format!("{bucket}/{key}"))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, MediaError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MediaError::Storage(format!("bucket {bucket} unavailable")));
        }
        let path = format!("{bucket}/{key}");
        self.objects
            .insert(path.clone(), (bytes, content_type.to_string()));
        Ok(format!("memory://{path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_urls_encode_each_key_segment() {
        let storage = HttpObjectStorage::new(reqwest::Client::new(), "https://store.local/", None);
        assert_eq!(
            storage.object_url("snaps", "abc/top left.jpg"),
            "https://store.local/snaps/abc/top%20left.jpg"
        );
    }

    #[tokio::test]
    async fn memory_storage_keeps_bytes_until_it_is_failed() {
        let storage = MemoryObjectStorage::new();
        let url = storage
            .put("snaps", "i/left.png", vec![1, 2, 3], "image/png")
            .await
            .unwrap();
        assert_eq!(url, "memory://snaps/i/left.png");
        assert_eq!(
            storage.get("snaps", "i/left.png"),
            Some((vec![1, 2, 3], "image/png".to_string()))
        );

        storage.set_failing(true);
        let err = storage
            .put("snaps", "i/right.png", vec![4], "image/png")
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Storage(_)));
        assert_eq!(storage.len(), 1);
    }
}
