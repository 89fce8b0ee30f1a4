use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::path::{Component, Path, PathBuf};

/// Object storage for rendered creatives.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Store `data` under `key` and return its public URL.
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<String, StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    fn url_for(&self, key: &str) -> String;
}

/// S3-compatible object storage (R2, MinIO, AWS).
pub struct S3AssetStore {
    bucket: Box<Bucket>,
    public_base_url: String,
}

impl S3AssetStore {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        public_base_url: &str,
        path_style: bool,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let mut bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;
        if path_style {
            bucket = bucket.with_path_style();
        }

        Ok(Self {
            bucket,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AssetStore for S3AssetStore {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<String, StorageError> {
        validate_key(key)?;
        let response = self
            .bucket
            .put_object_with_content_type(key, data, content_type)
            .await?;
        check_status(response.status_code(), key)?;
        Ok(self.url_for(key))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        validate_key(key)?;
        let response = self.bucket.get_object(key).await?;
        check_status(response.status_code(), key)?;
        Ok(response.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        let response = self.bucket.delete_object(key).await?;
        match check_status(response.status_code(), key) {
            Ok(()) | Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }
}

/// Assets written under a local directory, for development and tests.
pub struct LocalAssetStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalAssetStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl AssetStore for LocalAssetStore {
    async fn put(&self, key: &str, data: &[u8], _content_type: &str) -> Result<String, StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        Ok(self.url_for(key))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }
}

/// Object keys are relative, slash-separated and never climb out of the root.
fn validate_key(key: &str) -> Result<(), StorageError> {
    let path = Path::new(key);
    let ok = !key.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// The bucket client reports error statuses as successful responses.
fn check_status(status: u16, key: &str) -> Result<(), StorageError> {
    match status {
        200..=299 => Ok(()),
        404 => Err(StorageError::NotFound(key.to_string())),
        _ => Err(StorageError::Status {
            status,
            key: key.to_string(),
        }),
    }
}

/// Key of one rendered format of a creative.
pub fn asset_key(creative_id: uuid::Uuid, file: &str) -> String {
    format!("creatives/{creative_id}/{file}")
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("S3 returned status {status} for {key}")]
    Status { status: u16, key: String },

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid asset key: {0}")]
    InvalidKey(String),

    #[error("Asset not found: {0}")]
    NotFound(String),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
