use super::{
    DeleteOutcome, DownloadError, DownloadedDocument, ObjectStore, ProgressCallback,
    UploadError, UploadProgress, UploadedDocument, generate_key, spool_to_temp, unix_millis,
};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

const WRITE_CHUNK: usize = 64 * 1024;

/// Stores blobs as files under a root directory, keyed by relative path.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    download_dir: Option<PathBuf>,
}

impl LocalObjectStore {
    /// Store rooted at `root`; the directory is created on first upload.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            download_dir: None,
        }
    }

    /// Place temporary downloads in `dir` instead of the system temp directory.
    pub fn with_download_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.download_dir = dir;
        self
    }

    /// Path of the blob for `key`, or `None` when the key would resolve outside the root.
    fn blob_path(&self, key: &str) -> Option<PathBuf> {
        let relative = Path::new(key);
        let confined = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        confined.then(|| self.root.join(relative))
    }

    async fn write_blob(
        &self,
        path: &Path,
        bytes: &[u8],
        progress: Option<ProgressCallback<'_>>,
    ) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Written under a sibling name and renamed so a failed upload never leaves a partial blob.
        let partial = path.with_extension("partial");
        let result = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            let total = bytes.len() as u64;
            let mut loaded = 0u64;
            for piece in bytes.chunks(WRITE_CHUNK) {
                file.write_all(piece).await?;
                loaded += piece.len() as u64;
                if let Some(report) = progress {
                    report(UploadProgress { loaded, total });
                }
            }
            file.flush().await?;
            tokio::fs::rename(&partial, path).await
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&partial).await;
        }
        result
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        original_name: &str,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<UploadedDocument, UploadError> {
        let file_key = generate_key(original_name, unix_millis());
        let path = self.blob_path(&file_key).ok_or_else(|| {
            std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("generated key {file_key} escapes the store root"),
            )
        })?;
        self.write_blob(&path, &bytes, progress).await?;
        tracing::info!(key = %file_key, bytes = bytes.len(), "Stored document locally");
        Ok(UploadedDocument {
            file_key,
            file_name: original_name.to_string(),
        })
    }

    async fn download(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<DownloadedDocument, DownloadError> {
        let Some(path) = self.blob_path(key) else {
            tracing::warn!(key, "Rejected download outside the store root");
            return Err(DownloadError::NotFound(key.to_string()));
        };
        let file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(DownloadError::NotFound(key.to_string()));
            }
            Err(error) => return Err(error.into()),
        };
        spool_to_temp(file, self.download_dir.as_ref(), cancel).await
    }

    async fn delete(&self, key: &str) -> DeleteOutcome {
        let Some(path) = self.blob_path(key) else {
            tracing::warn!(key, "Refusing to delete outside the store root");
            return DeleteOutcome::failed(format!("invalid document key: {key}"));
        };
        match tokio::fs::remove_file(path).await {
            Ok(()) => DeleteOutcome::ok(),
            Err(error) if error.kind() == ErrorKind::NotFound => DeleteOutcome::ok(),
            Err(error) => {
                tracing::warn!(key, error = %error, "Failed to delete local document");
                DeleteOutcome::failed(error.to_string())
            }
        }
    }

    fn url_for(&self, key: &str) -> String {
        match self.blob_path(key) {
            Some(path) => format!("file://{}", path.display()),
            None => format!("file://{}/{key}", self.root.display()),
        }
    }
}
