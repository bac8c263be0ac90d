use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion and retrieval activity.
#[derive(Default)]
pub struct IngestMetrics {
    documents_ingested: AtomicU64,
    chunks_upserted: AtomicU64,
    failed_batches: AtomicU64,
    empty_documents: AtomicU64,
    context_queries: AtomicU64,
}

impl IngestMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished ingestion.
    ///
    /// `empty` marks documents that produced no chunks at all.
    pub fn record_document(&self, chunks_upserted: u64, failed_batches: u64, empty: bool) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.chunks_upserted
            .fetch_add(chunks_upserted, Ordering::Relaxed);
        self.failed_batches
            .fetch_add(failed_batches, Ordering::Relaxed);
        if empty {
            self.empty_documents.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a context lookup.
    pub fn record_context_query(&self) {
        self.context_queries.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            chunks_upserted: self.chunks_upserted.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            empty_documents: self.empty_documents.load(Ordering::Relaxed),
            context_queries: self.context_queries.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of the counters used for reporting.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents that reached the `Done` state since startup.
    pub documents_ingested: u64,
    /// Vector records written across all ingestions.
    pub chunks_upserted: u64,
    /// Upsert batches that failed and were skipped.
    pub failed_batches: u64,
    /// Ingested documents that yielded zero chunks.
    pub empty_documents: u64,
    /// Context lookups served (chat and note assist).
    pub context_queries: u64,
}
