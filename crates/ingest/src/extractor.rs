//! Identifier Extractor: find the masked national ID printed on a page.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use payroll_core::Identifier;
use payroll_core::identifier::IDENTIFIER_DIGITS;

use crate::error::IngestError;
use crate::splitter::Page;

/// `ddd.ddd.ddd-dd`, tolerating whitespace that text extraction inserts
/// between glyph runs. The check-digit group is matched loosely so a
/// truncated or overlong ID is reported as invalid instead of missing.
static IDENTIFIER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{3}\s*\.\s*\d{3}\s*\.\s*\d{3}\s*-\s*\d+\b").expect("identifier pattern is valid")
});

/// Reads the text layer of a single-page document.
pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, pdf: &[u8]) -> Result<String, IngestError>;
}

/// [`TextExtractor`] backed by `pdf-extract`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn extract_text(&self, pdf: &[u8]) -> Result<String, IngestError> {
        pdf_extract::extract_text_from_mem(pdf)
            .map_err(|e| IngestError::MalformedDocument(format!("text extraction failed: {e}")))
    }
}

/// Pure search for the first well-formed identifier in `text`.
///
/// Candidates with the wrong digit count are skipped; `IdentifierInvalid`
/// is reported only when every candidate on the page is malformed.
pub fn extract_identifier(text: &str) -> Result<Identifier, IngestError> {
    let mut rejected = None;
    for found in IDENTIFIER_PATTERN.find_iter(text) {
        let digits = found.as_str().chars().filter(char::is_ascii_digit).count();
        if digits != IDENTIFIER_DIGITS {
            rejected.get_or_insert(digits);
            continue;
        }
        return Identifier::parse(found.as_str())
            .map_err(|e| IngestError::IdentifierInvalid(e.to_string()));
    }

    match rejected {
        Some(digits) => Err(IngestError::IdentifierInvalid(format!(
            "expected {IDENTIFIER_DIGITS} digits, found {digits}"
        ))),
        None => Err(IngestError::IdentifierNotFound),
    }
}

#[derive(Clone)]
pub struct IdentifierExtractor {
    text: Arc<dyn TextExtractor>,
}

impl Default for IdentifierExtractor {
    fn default() -> Self {
        Self::new(Arc::new(PdfTextExtractor))
    }
}

impl IdentifierExtractor {
    pub fn new(text: Arc<dyn TextExtractor>) -> Self {
        Self { text }
    }

    /// Extract the page's identifier off the async runtime.
    ///
    /// A panic inside the PDF text layer parser is reported as a malformed page.
    pub async fn extract(&self, page: &Page) -> Result<Identifier, IngestError> {
        let text = self.text.clone();
        let bytes = page.bytes.clone();
        let content = tokio::task::spawn_blocking(move || text.extract_text(&bytes))
            .await
            .map_err(|e| IngestError::MalformedDocument(format!("text extraction aborted: {e}")))??;
        extract_identifier(&content)
    }
}
