use async_trait::async_trait;
use aws_sdk_s3 as s3;

use crate::error::ServiceError;

/// Object storage seam for recipient lists and the unsubscribe file.
/// `get` returns `None` for a missing key; callers decide whether that is an
/// error (recipient lists) or an empty set (unsubscribe file).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ServiceError>;
}

#[derive(Clone)]
pub struct S3ObjectStore {
    client: s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    pub async fn new(bucket: String) -> Self {
        let config = aws_config::load_from_env().await;
        Self { client: s3::Client::new(&config), bucket }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ServiceError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                let is_no_such_key = match &err {
                    aws_smithy_http::result::SdkError::ServiceError(service_err) => {
                        service_err.err().is_no_such_key()
                    }
                    _ => false,
                };
                if is_no_such_key {
                    return Ok(None);
                }
                return Err(ServiceError::TransientIo(err.to_string()));
            }
        };

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| ServiceError::TransientIo(e.to_string()))?;
        Ok(Some(body.into_bytes().to_vec()))
    }
}

/// In-memory store used by tests and local development.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, data: impl Into<Vec<u8>>) {
        self.objects.lock().unwrap().insert(key.to_string(), data.into());
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ServiceError> {
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }
}
