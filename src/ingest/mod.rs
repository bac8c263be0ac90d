//! Document ingestion: download, extract, split, embed, upsert.
//!
//! A failure in download, extraction, splitting or embedding aborts the run with an
//! [`IngestError`] naming the stage. Upsert failures are per batch and only reduce the
//! [`IngestionReport::upsert`] counts.

mod dedupe;
mod pipeline;
mod types;

pub use pipeline::{IngestPipeline, IngestSettings};
pub use types::{IngestError, IngestStage, IngestionReport};
