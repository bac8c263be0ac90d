//! Blob storage for uploaded PDFs.
//!
//! Two backends implement [`ObjectStore`]: S3 for deployments and a local directory for
//! development and tests. Downloads always land in a fresh temporary file owned by a
//! [`DownloadedDocument`]; dropping the handle removes the file.

mod keys;
mod local;
mod s3;

pub use keys::{generate_key, sanitize_file_name, unix_millis};
pub use local::LocalObjectStore;
pub use s3::S3ObjectStore;

use crate::config::{Config, StorageBackend};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedDocument {
    /// Storage key, `uploads/<millis><sanitized name>`.
    pub file_key: String,
    /// Name the caller supplied, unmodified.
    pub file_name: String,
}

/// Upload progress in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    /// Bytes accepted by the backend so far.
    pub loaded: u64,
    /// Total size of the upload.
    pub total: u64,
}

/// Callback receiving upload progress.
pub type ProgressCallback<'a> = &'a (dyn Fn(UploadProgress) + Send + Sync);

/// Best-effort deletion outcome. Deletion never fails the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    /// Whether the backend confirmed the delete. Deleting a missing key counts as deleted.
    pub deleted: bool,
    /// Backend error message when the delete failed.
    pub error: Option<String>,
}

impl DeleteOutcome {
    pub(crate) fn ok() -> Self {
        Self {
            deleted: true,
            error: None,
        }
    }

    pub(crate) fn failed(error: impl Into<String>) -> Self {
        Self {
            deleted: false,
            error: Some(error.into()),
        }
    }
}

/// Errors raised while storing a blob.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Local filesystem failure.
    #[error("upload I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// S3 rejected the upload.
    #[error("S3 upload failed: {0}")]
    S3(String),
}

/// Errors raised while fetching a blob into a temporary file.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// No blob stored under the key.
    #[error("no document stored under key '{0}'")]
    NotFound(String),
    /// Temporary file or local backend failure.
    #[error("download I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// S3 request failed.
    #[error("S3 download failed: {0}")]
    S3(String),
    /// The caller abandoned the download.
    #[error("download cancelled")]
    Cancelled,
}

/// Errors raised while constructing a storage backend.
#[derive(Debug, Error)]
pub enum StorageConfigError {
    /// A backend setting was missing.
    #[error("storage backend misconfigured: missing {0}")]
    Missing(&'static str),
}

/// A downloaded blob on local disk. The file is deleted when this value is dropped.
#[derive(Debug)]
pub struct DownloadedDocument {
    path: TempPath,
    size: u64,
}

impl DownloadedDocument {
    /// Location of the temporary file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of bytes written.
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Gateway to wherever PDF blobs live.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under a freshly generated key.
    async fn upload(
        &self,
        bytes: Vec<u8>,
        original_name: &str,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<UploadedDocument, UploadError>;

    /// Copy the blob under `key` into a temporary file.
    async fn download(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<DownloadedDocument, DownloadError>;

    /// Remove the blob under `key`.
    async fn delete(&self, key: &str) -> DeleteOutcome;

    /// Public location of `key`. Pure; performs no I/O.
    fn url_for(&self, key: &str) -> String;
}

/// Build the configured object store.
pub async fn build_object_store(
    config: &Config,
) -> Result<Arc<dyn ObjectStore>, StorageConfigError> {
    let store: Arc<dyn ObjectStore> = match config.storage_backend {
        StorageBackend::S3 => {
            let bucket = config
                .s3_bucket_name
                .clone()
                .ok_or(StorageConfigError::Missing("S3_BUCKET_NAME"))?;
            let region = config
                .s3_region
                .clone()
                .ok_or(StorageConfigError::Missing("S3_REGION"))?;
            Arc::new(
                S3ObjectStore::connect(bucket, region)
                    .await
                    .with_download_dir(config.download_tmp_dir.clone()),
            )
        }
        StorageBackend::Local => Arc::new(
            LocalObjectStore::new(config.local_storage_dir.clone())
                .with_download_dir(config.download_tmp_dir.clone()),
        ),
    };
    Ok(store)
}

/// Stream `reader` into a new `pdf-<millis>-XXXX.pdf` temp file.
///
/// The partially written file is removed on error or cancellation.
pub(crate) async fn spool_to_temp<R>(
    reader: R,
    tmp_dir: Option<&PathBuf>,
    cancel: &CancellationToken,
) -> Result<DownloadedDocument, DownloadError>
where
    R: AsyncRead + Send,
{
    let prefix = format!("pdf-{}-", unix_millis());
    let mut builder = tempfile::Builder::new();
    builder.prefix(&prefix).suffix(".pdf");
    let named = match tmp_dir {
        Some(dir) => {
            tokio::fs::create_dir_all(dir).await?;
            builder.tempfile_in(dir)?
        }
        None => builder.tempfile()?,
    };
    let (file, path) = named.into_parts();
    let mut file = tokio::fs::File::from_std(file);

    let copy = async {
        let mut reader = Box::pin(reader);
        let copied = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        Ok::<u64, std::io::Error>(copied)
    };

    let size = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
        result = copy => result?,
    };

    tracing::debug!(path = %path.display(), size, "Spooled download to temporary file");
    Ok(DownloadedDocument { path, size })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spooled_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tmp = dir.path().to_path_buf();
        let document = spool_to_temp(&b"%PDF-1.5"[..], Some(&tmp), &CancellationToken::new())
            .await
            .expect("spool");

        let path = document.path().to_path_buf();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("pdf-"));
        assert!(name.ends_with(".pdf"));
        assert_eq!(document.size(), 8);
        assert_eq!(std::fs::read(&path).expect("read"), b"%PDF-1.5");

        drop(document);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn cancelled_spool_leaves_no_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tmp = dir.path().to_path_buf();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = spool_to_temp(&b"data"[..], Some(&tmp), &cancel)
            .await
            .expect_err("cancelled");

        assert!(matches!(error, DownloadError::Cancelled));
        assert_eq!(std::fs::read_dir(&tmp).expect("list").count(), 0);
    }
}
