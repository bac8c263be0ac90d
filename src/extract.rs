//! PDF text extraction.

use crate::segment::Page;
use lopdf::Document;
use std::path::Path;
use thiserror::Error;

/// Errors raised while reading a PDF.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// File could not be read.
    #[error("failed to read PDF: {0}")]
    Io(#[from] std::io::Error),
    /// File is not a parseable PDF.
    #[error("malformed PDF: {0}")]
    Malformed(String),
}

/// Produces the ordered page texts of a PDF on disk.
///
/// Implementations are synchronous; callers on the async runtime run them under
/// `spawn_blocking`.
pub trait PdfExtractor: Send + Sync {
    /// Extract one [`Page`] per PDF page, numbered from 1 in document order.
    fn extract_pages(&self, path: &Path) -> Result<Vec<Page>, ExtractionError>;
}

/// Extractor backed by `lopdf`.
///
/// Pages whose text cannot be decoded are kept with empty text so page numbering stays aligned
/// with the document. A PDF without pages yields an empty list.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<Page>, ExtractionError> {
        let bytes = std::fs::read(path)?;
        let document =
            Document::load_mem(&bytes).map_err(|error| ExtractionError::Malformed(error.to_string()))?;

        let mut pages = Vec::new();
        for page_no in document.get_pages().into_keys() {
            let text = match document.extract_text(&[page_no]) {
                Ok(text) => text,
                Err(error) => {
                    tracing::warn!(page = page_no, error = %error, "Page text could not be decoded; treating as empty");
                    String::new()
                }
            };
            pages.push(Page {
                number: page_no,
                text,
            });
        }

        tracing::debug!(path = %path.display(), pages = pages.len(), "Extracted PDF text");
        Ok(pages)
    }
}
