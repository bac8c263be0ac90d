use super::types::{UpsertBatchError, UpsertSummary, VectorRecord};
use super::VectorIndex;

/// Records per upsert request when nothing else is configured.
pub const DEFAULT_UPSERT_BATCH_SIZE: usize = 100;

/// Upsert `records` in sequential batches of `batch_size`.
///
/// A rejected batch is logged and skipped; later batches are still attempted. Callers inspect the
/// returned summary to detect partial indexing.
pub async fn upsert_batches(
    index: &dyn VectorIndex,
    namespace: &str,
    records: &[VectorRecord],
    batch_size: usize,
) -> UpsertSummary {
    let mut summary = UpsertSummary::default();

    for (batch_index, batch) in records.chunks(batch_size.max(1)).enumerate() {
        match index.upsert(namespace, batch).await {
            Ok(()) => {
                summary.succeeded_batches += 1;
                summary.upserted_records += batch.len();
            }
            Err(source) => {
                summary.failed_batches += 1;
                let error = UpsertBatchError {
                    namespace: namespace.to_string(),
                    batch_index,
                    records: batch.len(),
                    source,
                };
                tracing::error!(error = %error, "Skipping failed upsert batch");
            }
        }
    }

    tracing::debug!(
        namespace,
        succeeded = summary.succeeded_batches,
        failed = summary.failed_batches,
        records = summary.upserted_records,
        "Upsert batches finished"
    );
    summary
}
