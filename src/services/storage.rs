use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::path::{Path, PathBuf};

use crate::config::{AppConfig, StorageBackend};

const R2_SCHEME: &str = "r2://";
const FILE_SCHEME: &str = "file://";

/// Blob storage for uploaded photos and generated candidates.
///
/// `put` returns an opaque reference that `get` accepts back: a `file://`
/// URL for the local backend, `r2://<key>` for Cloudflare R2.
pub enum ImageStorage {
    Local { root: PathBuf },
    R2 { bucket: Box<Bucket> },
}

impl ImageStorage {
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self::Local { root: root.into() }
    }

    pub fn r2(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self::R2 { bucket })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, StorageError> {
        match config.storage_backend {
            StorageBackend::Local => Ok(Self::local(&config.storage_dir)),
            StorageBackend::R2 => {
                let missing = |name: &str| StorageError::Config(format!("{} is required for R2 storage", name));
                Self::r2(
                    config.r2_bucket.as_deref().ok_or_else(|| missing("R2_BUCKET"))?,
                    config.r2_endpoint.as_deref().ok_or_else(|| missing("R2_ENDPOINT"))?,
                    config.r2_access_key.as_deref().ok_or_else(|| missing("R2_ACCESS_KEY"))?,
                    config.r2_secret_key.as_deref().ok_or_else(|| missing("R2_SECRET_KEY"))?,
                )
            }
        }
    }

    /// Store bytes under `key` and return their reference.
    pub async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<String, StorageError> {
        match self {
            Self::Local { root } => {
                let path = root.join(key);
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, data).await?;
                let absolute = std::path::absolute(&path)?;
                Ok(format!("{}{}", FILE_SCHEME, absolute.display()))
            }
            Self::R2 { bucket } => {
                bucket
                    .put_object_with_content_type(key, data, content_type)
                    .await
                    .map_err(StorageError::S3)?;
                Ok(format!("{}{}", R2_SCHEME, key))
            }
        }
    }

    /// Load the bytes behind a reference.
    pub async fn get(&self, reference: &str) -> Result<Vec<u8>, StorageError> {
        if let Some(key) = reference.strip_prefix(R2_SCHEME) {
            return match self {
                Self::R2 { bucket } => {
                    let response = bucket.get_object(key).await.map_err(StorageError::S3)?;
                    Ok(response.to_vec())
                }
                Self::Local { .. } => Err(StorageError::UnsupportedReference(reference.to_string())),
            };
        }

        let path = reference.strip_prefix(FILE_SCHEME).unwrap_or(reference);
        Ok(tokio::fs::read(Path::new(path)).await?)
    }

    /// Check the backend is reachable (for health checks).
    pub async fn health_check(&self) -> Result<(), StorageError> {
        match self {
            Self::Local { root } => {
                tokio::fs::create_dir_all(root).await?;
                Ok(())
            }
            Self::R2 { bucket } => {
                bucket.list_page(String::new(), None, None, None, Some(1)).await.map_err(StorageError::S3)?;
                Ok(())
            }
        }
    }
}

/// Key of the n-th candidate (1-based) of a job.
pub fn candidate_key(job_id: &str, ordinal: usize, extension: &str) -> String {
    format!("results/{}/cand_{}.{}", job_id, ordinal, extension)
}

/// Key of an uploaded input photo.
pub fn upload_key(job_id: &str, name: &str, extension: &str) -> String {
    format!("uploads/{}/{}.{}", job_id, name, extension)
}

/// File extension and content type of encoded image bytes, JPEG when the
/// format is not recognised.
pub fn image_kind(bytes: &[u8]) -> (&'static str, &'static str) {
    match image::guess_format(bytes) {
        Ok(format) => (
            format.extensions_str().first().copied().unwrap_or("jpg"),
            format.to_mime_type(),
        ),
        Err(_) => ("jpg", "image/jpeg"),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Local storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Reference {0} cannot be served by this storage backend")]
    UnsupportedReference(String),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
