use super::dedupe::dedupe_chunks;
use super::types::{IngestError, IngestStage, IngestionReport};
use crate::config::Config;
use crate::embedding::{EmbeddingClient, RetryPolicy, embed_with_retry};
use crate::extract::PdfExtractor;
use crate::segment::{Chunk, Page, Segmenter};
use crate::storage::ObjectStore;
use crate::vector::{
    DEFAULT_NAMESPACE_PREFIX, DEFAULT_UPSERT_BATCH_SIZE, VectorIndex, VectorRecord,
    namespace_with_prefix, upsert_batches,
};
use futures_util::{StreamExt, TryStreamExt, stream};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Tunables for one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSettings {
    /// Prefix applied to the document namespace.
    pub namespace_prefix: String,
    /// Records per upsert request.
    pub upsert_batch_size: usize,
    /// Chunk embeddings in flight at once.
    pub embedding_concurrency: usize,
    /// Retry policy for each chunk embedding.
    pub retry: RetryPolicy,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            namespace_prefix: DEFAULT_NAMESPACE_PREFIX.to_string(),
            upsert_batch_size: DEFAULT_UPSERT_BATCH_SIZE,
            embedding_concurrency: 8,
            retry: RetryPolicy::default(),
        }
    }
}

impl IngestSettings {
    /// Settings described by the application configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            namespace_prefix: config.namespace_prefix.clone(),
            upsert_batch_size: config.upsert_batch_size,
            embedding_concurrency: config.embedding_concurrency,
            retry: RetryPolicy::from_config(config),
        }
    }
}

/// Turns a stored PDF into vectors in the document's namespace.
///
/// Stages run strictly in order: download, extract, split, embed, upsert. The temporary download
/// is dropped as soon as extraction finishes and on every early return.
pub struct IngestPipeline {
    store: Arc<dyn ObjectStore>,
    extractor: Arc<dyn PdfExtractor>,
    segmenter: Arc<Segmenter>,
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    settings: IngestSettings,
}

impl IngestPipeline {
    /// Assemble a pipeline from its collaborators.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        extractor: Arc<dyn PdfExtractor>,
        segmenter: Arc<Segmenter>,
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            store,
            extractor,
            segmenter,
            embedder,
            index,
            settings,
        }
    }

    /// Namespace that holds the vectors of `file_key`.
    pub fn namespace_for(&self, file_key: &str) -> String {
        namespace_with_prefix(&self.settings.namespace_prefix, file_key)
    }

    /// Ingest the blob stored under `file_key`.
    pub async fn run(
        &self,
        file_key: &str,
        cancel: &CancellationToken,
    ) -> Result<IngestionReport, IngestError> {
        let result = self.run_stages(file_key, cancel).await;
        match &result {
            Ok(report) if report.is_partial() => tracing::warn!(
                file_key,
                namespace = %report.namespace,
                chunks = report.chunk_count,
                upserted = report.upsert.upserted_records,
                failed_batches = report.upsert.failed_batches,
                "Document partially ingested"
            ),
            Ok(report) => tracing::info!(
                file_key,
                namespace = %report.namespace,
                pages = report.page_count,
                chunks = report.chunk_count,
                upserted = report.upsert.upserted_records,
                failed_batches = report.upsert.failed_batches,
                "Document ingested"
            ),
            Err(error) => tracing::error!(
                file_key,
                stage = %error.stage(),
                error = %error,
                "Ingestion failed"
            ),
        }
        result
    }

    async fn run_stages(
        &self,
        file_key: &str,
        cancel: &CancellationToken,
    ) -> Result<IngestionReport, IngestError> {
        let namespace = self.namespace_for(file_key);
        let mut warnings = Vec::new();

        enter(IngestStage::Downloading, file_key, cancel)?;
        let downloaded = self.store.download(file_key, cancel).await?;

        enter(IngestStage::Extracting, file_key, cancel)?;
        let pages = self.extract(downloaded.path().to_path_buf(), cancel).await?;
        drop(downloaded);

        let page_count = pages.len();
        let empty_pages = pages
            .iter()
            .filter(|page| page.text.trim().is_empty())
            .count();
        if page_count == 0 {
            tracing::warn!(file_key, "PDF contains no pages");
            warnings.push("document contains no pages".to_string());
        } else if empty_pages > 0 {
            tracing::warn!(file_key, empty_pages, page_count, "Pages without extractable text");
            warnings.push(format!(
                "{empty_pages} of {page_count} pages contained no extractable text"
            ));
        }

        enter(IngestStage::Splitting, file_key, cancel)?;
        let per_page = self.split(&pages)?;
        let sample = per_page.first().cloned().unwrap_or_default();
        let (chunks, skipped_duplicates) = dedupe_chunks(per_page.into_iter().flatten().collect());
        if chunks.is_empty() && page_count > 0 {
            warnings.push("no text could be extracted from the document".to_string());
        }

        enter(IngestStage::Embedding, file_key, cancel)?;
        let records = self.embed(chunks, cancel).await?;

        enter(IngestStage::Upserting, file_key, cancel)?;
        let upsert = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(IngestError::Cancelled { stage: IngestStage::Upserting });
            }
            summary = upsert_batches(
                self.index.as_ref(),
                &namespace,
                &records,
                self.settings.upsert_batch_size,
            ) => summary,
        };
        if upsert.failed_batches > 0 {
            warnings.push(format!(
                "{} of {} upsert batches failed",
                upsert.failed_batches,
                upsert.failed_batches + upsert.succeeded_batches
            ));
        }

        tracing::debug!(file_key, stage = %IngestStage::Done, "Ingestion stage");
        Ok(IngestionReport {
            file_key: file_key.to_string(),
            namespace,
            page_count,
            empty_pages,
            chunk_count: records.len(),
            skipped_duplicates,
            upsert,
            sample,
            warnings,
        })
    }

    async fn extract(
        &self,
        path: std::path::PathBuf,
        cancel: &CancellationToken,
    ) -> Result<Vec<Page>, IngestError> {
        let extractor = Arc::clone(&self.extractor);
        let task = tokio::task::spawn_blocking(move || extractor.extract_pages(&path));
        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(IngestError::Cancelled { stage: IngestStage::Extracting });
            }
            joined = task => joined,
        };
        joined
            .map_err(|error| IngestError::ExtractionTask(error.to_string()))?
            .map_err(IngestError::Extraction)
    }

    fn split(&self, pages: &[Page]) -> Result<Vec<Vec<Chunk>>, IngestError> {
        pages
            .iter()
            .map(|page| self.segmenter.prepare(page))
            .collect::<Result<Vec<_>, _>>()
            .map_err(IngestError::Splitting)
    }

    async fn embed(
        &self,
        chunks: Vec<Chunk>,
        cancel: &CancellationToken,
    ) -> Result<Vec<VectorRecord>, IngestError> {
        let embedder = self.embedder.as_ref();
        let policy = &self.settings.retry;

        let mut vectors: Vec<(usize, Vec<f32>)> = stream::iter(0..chunks.len())
            .map(|position| {
                let chunk = &chunks[position];
                async move {
                    embed_with_retry(embedder, &chunk.content, policy, cancel)
                        .await
                        .map(|vector| (position, vector))
                        .inspect_err(|error| {
                            tracing::warn!(
                                position,
                                page = chunk.metadata.page_number,
                                attempts = error.attempts,
                                error = %error.source,
                                "Chunk embedding failed"
                            );
                        })
                }
            })
            .buffer_unordered(self.settings.embedding_concurrency.max(1))
            .try_collect()
            .await?;
        vectors.sort_by_key(|(position, _)| *position);

        Ok(chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, (_, values))| VectorRecord {
                id: chunk.record_id(),
                values,
                metadata: chunk.metadata,
            })
            .collect())
    }
}

fn enter(
    stage: IngestStage,
    file_key: &str,
    cancel: &CancellationToken,
) -> Result<(), IngestError> {
    if cancel.is_cancelled() {
        return Err(IngestError::Cancelled { stage });
    }
    tracing::debug!(file_key, %stage, "Ingestion stage");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingError;
    use crate::extract::ExtractionError;
    use crate::segment::{ChunkMetadata, SegmenterConfig};
    use crate::storage::{DownloadError, LocalObjectStore};
    use crate::vector::{InMemoryIndex, UpsertSummary};
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedPages(Vec<Page>);

    impl PdfExtractor for FixedPages {
        fn extract_pages(&self, path: &Path) -> Result<Vec<Page>, ExtractionError> {
            assert!(path.exists(), "extractor must see the downloaded file");
            Ok(self.0.clone())
        }
    }

    struct Malformed;

    impl PdfExtractor for Malformed {
        fn extract_pages(&self, _path: &Path) -> Result<Vec<Page>, ExtractionError> {
            Err(ExtractionError::Malformed("no xref".into()))
        }
    }

    /// Letter-frequency vectors: deterministic, and similar texts score close.
    struct LetterEmbedder {
        calls: AtomicUsize,
        fail_on: Option<&'static str>,
    }

    impl LetterEmbedder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on: None,
            }
        }
    }

    #[async_trait]
    impl EmbeddingClient for LetterEmbedder {
        fn dimension(&self) -> usize {
            26
        }

        async fn embed(
            &self,
            text: &str,
            _cancel: &CancellationToken,
        ) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(marker) = self.fail_on
                && text.contains(marker)
            {
                return Err(EmbeddingError::Api {
                    status: StatusCode::BAD_GATEWAY,
                    message: "upstream".into(),
                });
            }
            let mut vector = vec![0.0; 26];
            for byte in text.bytes().filter(u8::is_ascii_alphabetic) {
                vector[(byte.to_ascii_lowercase() - b'a') as usize] += 1.0;
            }
            Ok(vector)
        }
    }

    struct Harness {
        _root: tempfile::TempDir,
        tmp: tempfile::TempDir,
        store: Arc<LocalObjectStore>,
        index: Arc<InMemoryIndex>,
        embedder: Arc<LetterEmbedder>,
    }

    impl Harness {
        fn new(embedder: LetterEmbedder) -> Self {
            let root = tempfile::tempdir().expect("root");
            let tmp = tempfile::tempdir().expect("tmp");
            let store = Arc::new(
                LocalObjectStore::new(root.path())
                    .with_download_dir(Some(tmp.path().to_path_buf())),
            );
            Self {
                _root: root,
                tmp,
                store,
                index: Arc::new(InMemoryIndex::new()),
                embedder: Arc::new(embedder),
            }
        }

        fn pipeline(&self, extractor: impl PdfExtractor + 'static, chunk_size: usize) -> IngestPipeline {
            let segmenter = Segmenter::new(SegmenterConfig {
                chunk_size,
                chunk_overlap: 0,
                ..SegmenterConfig::default()
            })
            .expect("segmenter");
            IngestPipeline::new(
                self.store.clone(),
                Arc::new(extractor),
                Arc::new(segmenter),
                self.embedder.clone(),
                self.index.clone(),
                IngestSettings {
                    retry: RetryPolicy {
                        max_attempts: 2,
                        backoff: vec![Duration::ZERO],
                    },
                    ..IngestSettings::default()
                },
            )
        }

        async fn upload(&self) -> String {
            self.store
                .upload(b"%PDF-1.5".to_vec(), "paper.pdf", None)
                .await
                .expect("upload")
                .file_key
        }

        fn leftover_temp_files(&self) -> usize {
            std::fs::read_dir(self.tmp.path()).expect("tmp dir").count()
        }
    }

    fn long_page() -> Page {
        Page {
            number: 1,
            text: "Ownership rules keep every value with exactly one owner.\nBorrowing lets code read a value without taking it away from its owner.".into(),
        }
    }

    #[tokio::test]
    async fn two_page_document_yields_records_per_chunk() {
        let harness = Harness::new(LetterEmbedder::new());
        let key = harness.upload().await;
        let pipeline = harness.pipeline(
            FixedPages(vec![
                long_page(),
                Page {
                    number: 2,
                    text: "Lifetimes name borrow scopes.".into(),
                },
            ]),
            80,
        );

        let report = pipeline
            .run(&key, &CancellationToken::new())
            .await
            .expect("ingest");

        assert_eq!(report.page_count, 2);
        assert_eq!(report.empty_pages, 0);
        assert_eq!(report.chunk_count, 3);
        assert_eq!(
            report.upsert,
            UpsertSummary {
                succeeded_batches: 1,
                failed_batches: 0,
                upserted_records: 3,
            }
        );
        assert_eq!(report.sample.len(), 2);
        assert!(report.warnings.is_empty());

        let namespace = pipeline.namespace_for(&key);
        assert_eq!(report.namespace, namespace);
        assert_eq!(harness.index.count(&namespace).await.expect("count"), 3);

        let mut pages: Vec<u32> = harness
            .index
            .query(&namespace, &[1.0; 26], 10)
            .await
            .expect("query")
            .into_iter()
            .map(|m| m.metadata.page_number)
            .collect();
        pages.sort();
        assert_eq!(pages, vec![1, 1, 2]);
        assert_eq!(harness.leftover_temp_files(), 0);
    }

    #[tokio::test]
    async fn reingesting_is_idempotent() {
        let harness = Harness::new(LetterEmbedder::new());
        let key = harness.upload().await;
        let pipeline = harness.pipeline(FixedPages(vec![long_page()]), 80);

        let first = pipeline.run(&key, &CancellationToken::new()).await.expect("first");
        let second = pipeline.run(&key, &CancellationToken::new()).await.expect("second");

        assert_eq!(first.chunk_count, second.chunk_count);
        assert_eq!(
            harness
                .index
                .count(&pipeline.namespace_for(&key))
                .await
                .expect("count"),
            first.chunk_count
        );
    }

    #[tokio::test]
    async fn rejected_upsert_yields_partial_report() {
        let harness = Harness::new(LetterEmbedder::new());
        let key = harness.upload().await;
        let pipeline = harness.pipeline(FixedPages(vec![long_page()]), 80);
        let namespace = pipeline.namespace_for(&key);
        // A namespace created with another dimension rejects the 26-wide letter vectors.
        harness
            .index
            .upsert(
                &namespace,
                &[VectorRecord {
                    id: "seed".into(),
                    values: vec![1.0, 0.0, 0.0],
                    metadata: ChunkMetadata {
                        text: "seed".into(),
                        page_number: 1,
                    },
                }],
            )
            .await
            .expect("seed");

        let report = pipeline.run(&key, &CancellationToken::new()).await.expect("ingest");

        assert!(report.is_partial());
        assert_eq!(report.upsert.failed_batches, 1);
        assert_eq!(report.upsert.upserted_records, 0);
        assert!(report.warnings.iter().any(|warning| warning.contains("upsert batches failed")));
        assert_eq!(harness.index.count(&namespace).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn empty_document_completes_with_warnings() {
        let harness = Harness::new(LetterEmbedder::new());
        let key = harness.upload().await;
        let pipeline = harness.pipeline(FixedPages(Vec::new()), 80);

        let report = pipeline.run(&key, &CancellationToken::new()).await.expect("ingest");

        assert_eq!(report.page_count, 0);
        assert_eq!(report.chunk_count, 0);
        assert_eq!(report.upsert, UpsertSummary::default());
        assert!(!report.warnings.is_empty());
        assert!(report.sample.is_empty());
        assert_eq!(harness.embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn blank_pages_are_counted() {
        let harness = Harness::new(LetterEmbedder::new());
        let key = harness.upload().await;
        let pipeline = harness.pipeline(
            FixedPages(vec![
                Page {
                    number: 1,
                    text: "  \n ".into(),
                },
                Page {
                    number: 2,
                    text: "Only page with words.".into(),
                },
            ]),
            80,
        );

        let report = pipeline.run(&key, &CancellationToken::new()).await.expect("ingest");

        assert_eq!(report.empty_pages, 1);
        assert_eq!(report.chunk_count, 1);
        assert_eq!(report.warnings.len(), 1);
    }

    #[tokio::test]
    async fn repeated_chunks_are_collapsed() {
        let harness = Harness::new(LetterEmbedder::new());
        let key = harness.upload().await;
        let header = Page {
            number: 1,
            text: "Company Confidential".into(),
        };
        let pipeline = harness.pipeline(
            FixedPages(vec![
                header.clone(),
                Page {
                    number: 2,
                    ..header
                },
            ]),
            80,
        );

        let report = pipeline.run(&key, &CancellationToken::new()).await.expect("ingest");
        assert_eq!(report.chunk_count, 1);
        assert_eq!(report.skipped_duplicates, 1);
    }

    #[tokio::test]
    async fn missing_blob_fails_in_download_stage() {
        let harness = Harness::new(LetterEmbedder::new());
        let pipeline = harness.pipeline(FixedPages(vec![long_page()]), 80);

        let error = pipeline
            .run("uploads/never-uploaded.pdf", &CancellationToken::new())
            .await
            .expect_err("missing");

        assert_eq!(error.stage(), IngestStage::Downloading);
        assert!(matches!(error, IngestError::Download(DownloadError::NotFound(_))));
        assert!(harness.index.namespaces().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_pdf_fails_and_cleans_up() {
        let harness = Harness::new(LetterEmbedder::new());
        let key = harness.upload().await;
        let pipeline = harness.pipeline(Malformed, 80);

        let error = pipeline
            .run(&key, &CancellationToken::new())
            .await
            .expect_err("malformed");

        assert_eq!(error.stage(), IngestStage::Extracting);
        assert_eq!(harness.leftover_temp_files(), 0);
        assert!(harness.index.namespaces().await.is_empty());
    }

    #[tokio::test]
    async fn exhausted_embedding_fails_whole_ingestion() {
        let harness = Harness::new(LetterEmbedder {
            calls: AtomicUsize::new(0),
            fail_on: Some("Lifetimes"),
        });
        let key = harness.upload().await;
        let pipeline = harness.pipeline(
            FixedPages(vec![
                long_page(),
                Page {
                    number: 2,
                    text: "Lifetimes name borrow scopes.".into(),
                },
            ]),
            80,
        );

        let error = pipeline
            .run(&key, &CancellationToken::new())
            .await
            .expect_err("embedding");

        assert_eq!(error.stage(), IngestStage::Embedding);
        match error {
            IngestError::Embedding(exhausted) => assert_eq!(exhausted.attempts, 2),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(harness.index.namespaces().await.is_empty());
        assert_eq!(harness.leftover_temp_files(), 0);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_download() {
        let harness = Harness::new(LetterEmbedder::new());
        let key = harness.upload().await;
        let pipeline = harness.pipeline(FixedPages(vec![long_page()]), 80);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = pipeline.run(&key, &cancel).await.expect_err("cancelled");

        assert!(matches!(
            error,
            IngestError::Cancelled {
                stage: IngestStage::Downloading
            }
        ));
        assert_eq!(harness.embedder.calls.load(Ordering::SeqCst), 0);
    }

    /// Extractor that cancels the token while it runs, as if the client disconnected mid-ingest.
    struct CancelDuringExtraction {
        cancel: CancellationToken,
        seen_path: Mutex<Option<std::path::PathBuf>>,
    }

    impl PdfExtractor for CancelDuringExtraction {
        fn extract_pages(&self, path: &Path) -> Result<Vec<Page>, ExtractionError> {
            *self.seen_path.lock().unwrap() = Some(path.to_path_buf());
            self.cancel.cancel();
            Ok(vec![long_page()])
        }
    }

    #[tokio::test]
    async fn cancellation_mid_pipeline_removes_temp_file() {
        let harness = Harness::new(LetterEmbedder::new());
        let key = harness.upload().await;
        let cancel = CancellationToken::new();
        let extractor = Arc::new(CancelDuringExtraction {
            cancel: cancel.clone(),
            seen_path: Mutex::new(None),
        });
        let segmenter = Segmenter::new(SegmenterConfig::default()).expect("segmenter");
        let pipeline = IngestPipeline::new(
            harness.store.clone(),
            extractor.clone(),
            Arc::new(segmenter),
            harness.embedder.clone(),
            harness.index.clone(),
            IngestSettings::default(),
        );

        let error = pipeline.run(&key, &cancel).await.expect_err("cancelled");

        assert!(matches!(error, IngestError::Cancelled { .. }));
        let seen = extractor.seen_path.lock().unwrap().clone().expect("path");
        assert!(!seen.exists());
        assert!(harness.index.namespaces().await.is_empty());
    }
}
