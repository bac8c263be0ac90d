use super::{
    DeleteOutcome, DownloadError, DownloadedDocument, ObjectStore, ProgressCallback,
    UploadError, UploadProgress, UploadedDocument, generate_key, spool_to_temp, unix_millis,
};
use async_trait::async_trait;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Part size for multipart uploads. Bodies up to this size go up in a single request.
const PART_SIZE: usize = 8 * 1024 * 1024;
const CONTENT_TYPE: &str = "application/pdf";

/// Object store backed by an S3 bucket.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    region: String,
    download_dir: Option<PathBuf>,
}

impl S3ObjectStore {
    /// Connect using the default AWS credential chain, pinned to `region`.
    pub async fn connect(bucket: String, region: String) -> Self {
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .load()
            .await;
        Self::with_client(aws_sdk_s3::Client::new(&shared), bucket, region)
    }

    /// Wrap an already configured client.
    pub fn with_client(client: aws_sdk_s3::Client, bucket: String, region: String) -> Self {
        Self {
            client,
            bucket,
            region,
            download_dir: None,
        }
    }

    /// Place temporary downloads in `dir` instead of the system temp directory.
    pub fn with_download_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.download_dir = dir;
        self
    }

    async fn put_single(
        &self,
        key: &str,
        bytes: Vec<u8>,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<(), UploadError> {
        let total = bytes.len() as u64;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(CONTENT_TYPE)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|error| UploadError::S3(DisplayErrorContext(&error).to_string()))?;
        if let Some(report) = progress {
            report(UploadProgress {
                loaded: total,
                total,
            });
        }
        Ok(())
    }

    async fn put_multipart(
        &self,
        key: &str,
        bytes: &[u8],
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<(), UploadError> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(CONTENT_TYPE)
            .send()
            .await
            .map_err(|error| UploadError::S3(DisplayErrorContext(&error).to_string()))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| UploadError::S3("multipart upload returned no upload id".into()))?
            .to_string();

        match self.send_parts(key, &upload_id, bytes, progress).await {
            Ok(parts) => {
                let completed = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();
                let result = self
                    .client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await;
                if let Err(error) = result {
                    self.abort(key, &upload_id).await;
                    return Err(UploadError::S3(DisplayErrorContext(&error).to_string()));
                }
                Ok(())
            }
            Err(error) => {
                self.abort(key, &upload_id).await;
                Err(error)
            }
        }
    }

    async fn send_parts(
        &self,
        key: &str,
        upload_id: &str,
        bytes: &[u8],
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<Vec<CompletedPart>, UploadError> {
        let total = bytes.len() as u64;
        let mut loaded = 0u64;
        let mut parts = Vec::new();

        for (index, piece) in bytes.chunks(PART_SIZE).enumerate() {
            let part_number = (index + 1) as i32;
            let output = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(piece.to_vec()))
                .send()
                .await
                .map_err(|error| UploadError::S3(DisplayErrorContext(&error).to_string()))?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            loaded += piece.len() as u64;
            if let Some(report) = progress {
                report(UploadProgress { loaded, total });
            }
        }

        Ok(parts)
    }

    async fn abort(&self, key: &str, upload_id: &str) {
        let result = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await;
        if let Err(error) = result {
            tracing::warn!(key, upload_id, error = %DisplayErrorContext(&error), "Failed to abort multipart upload");
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        original_name: &str,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<UploadedDocument, UploadError> {
        let file_key = generate_key(original_name, unix_millis());
        let size = bytes.len();
        if size <= PART_SIZE {
            self.put_single(&file_key, bytes, progress).await?;
        } else {
            self.put_multipart(&file_key, &bytes, progress).await?;
        }
        tracing::info!(bucket = %self.bucket, key = %file_key, bytes = size, "Uploaded document to S3");
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
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send();
        let object = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            result = request => result,
        };
        let object = object.map_err(|error| {
            if error
                .as_service_error()
                .is_some_and(|service| service.is_no_such_key())
            {
                DownloadError::NotFound(key.to_string())
            } else {
                DownloadError::S3(DisplayErrorContext(&error).to_string())
            }
        })?;

        spool_to_temp(
            object.body.into_async_read(),
            self.download_dir.as_ref(),
            cancel,
        )
        .await
    }

    async fn delete(&self, key: &str) -> DeleteOutcome {
        let result = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;
        match result {
            Ok(_) => DeleteOutcome::ok(),
            Err(error) => {
                let message = DisplayErrorContext(&error).to_string();
                tracing::warn!(bucket = %self.bucket, key, error = %message, "Failed to delete S3 object");
                DeleteOutcome::failed(message)
            }
        }
    }

    fn url_for(&self, key: &str) -> String {
        format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            self.bucket, self.region, key
        )
    }
}
