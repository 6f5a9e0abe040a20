use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use clustersnap_core::storage::{Backend, ObjectInfo};
use clustersnap_core::{Error, Result};

/// S3-compatible object store adapter. Keys are stored flat under an
/// optional prefix inside one bucket.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Backend {
    pub async fn new(bucket: String, prefix: String) -> Result<Self> {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        let client = Client::new(&config);

        Ok(Self {
            client,
            bucket,
            prefix,
        })
    }

    /// For S3-compatible stores outside AWS (MinIO, Ceph, ...).
    pub async fn with_endpoint(bucket: String, prefix: String, endpoint: String) -> Result<Self> {
        let config = aws_config::from_env()
            .endpoint_url(endpoint)
            .load()
            .await;
        let client = Client::new(&config);

        Ok(Self {
            client,
            bucket,
            prefix,
        })
    }

    /// Verifies the bucket is reachable before any operation runs.
    pub async fn check(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| Error::Backend(format!("Bucket {} not accessible: {}", self.bucket, e)))?;
        Ok(())
    }

    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }
}

#[async_trait]
impl Backend for S3Backend {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let body = ByteStream::from(data.to_vec());

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Backend(format!("Failed to write {}: {}", key, e)))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let response = self.client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| Error::Backend(format!("Failed to read {}: {}", key, e)))?;

        let data = response.body.collect().await
            .map_err(|e| Error::Backend(format!("Failed to read body: {}", e)))?;

        Ok(data.into_bytes())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let result = self.client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.to_string().contains("NotFound") {
                    Ok(false)
                } else {
                    Err(Error::Backend(format!("Failed to check existence: {}", e)))
                }
            }
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let full_prefix = self.full_key(prefix);
        let mut results = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut request = self.client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix);

            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request.send().await
                .map_err(|e| Error::Backend(format!("Failed to list: {}", e)))?;

            if let Some(contents) = response.contents {
                for object in contents {
                    if let Some(object_key) = object.key {
                        let key = if self.prefix.is_empty() {
                            object_key
                        } else {
                            object_key
                                .strip_prefix(&format!("{}/", self.prefix))
                                .unwrap_or(&object_key)
                                .to_string()
                        };
                        results.push(key);
                    }
                }
            }

            if response.is_truncated.unwrap_or(false) {
                continuation_token = response.next_continuation_token;
            } else {
                break;
            }
        }

        Ok(results)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| Error::Backend(format!("Failed to delete {}: {}", key, e)))?;

        Ok(())
    }

    async fn stat(&self, key: &str) -> Result<ObjectInfo> {
        let response = self.client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| Error::Backend(format!("Failed to stat {}: {}", key, e)))?;

        Ok(ObjectInfo {
            key: key.to_string(),
            size: response.content_length.unwrap_or(0) as u64,
        })
    }
}
