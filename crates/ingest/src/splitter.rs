//! Page Splitter: one multi-page PDF in, one single-page PDF per page out.

use bytes::Bytes;
use lopdf::Document;
use tracing::debug;

use crate::error::IngestError;

/// One page of a source document, as a standalone PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// 1-indexed position in the source.
    pub number: u32,
    pub bytes: Bytes,
}

/// Splits PDFs with `lopdf`.
///
/// Parsing is CPU-bound, so callers on the async runtime go through
/// [`PageSplitter::split`], which runs the work on the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageSplitter;

impl PageSplitter {
    pub fn new() -> Self {
        Self
    }

    pub async fn split(&self, source: Bytes) -> Result<Vec<Page>, IngestError> {
        tokio::task::spawn_blocking(move || split_pdf(&source))
            .await
            .map_err(|e| IngestError::MalformedDocument(format!("page split aborted: {e}")))?
    }
}

/// Split `source` into single-page documents, in page order.
///
/// An empty page tree yields an empty vector.
pub fn split_pdf(source: &[u8]) -> Result<Vec<Page>, IngestError> {
    let document =
        Document::load_mem(source).map_err(|e| IngestError::MalformedDocument(e.to_string()))?;
    let numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    debug!(pages = numbers.len(), "source document parsed");

    numbers
        .iter()
        .map(|&keep| {
            let mut single = document.clone();
            let others: Vec<u32> = numbers.iter().copied().filter(|&n| n != keep).collect();
            single.delete_pages(&others);
            single.prune_objects();

            let mut buf = Vec::new();
            single
                .save_to(&mut buf)
                .map_err(|e| IngestError::MalformedDocument(format!("page {keep}: {e}")))?;
            Ok(Page {
                number: keep,
                bytes: Bytes::from(buf),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::make_pdf;

    #[test]
    fn splits_into_single_pages_in_order() {
        let source = make_pdf(&["Page one", "Page two", "Page three"]);
        let pages = split_pdf(&source).unwrap();

        assert_eq!(pages.len(), 3);
        for (i, page) in pages.iter().enumerate() {
            assert_eq!(page.number, i as u32 + 1);
            let single = Document::load_mem(&page.bytes).unwrap();
            assert_eq!(single.get_pages().len(), 1);
        }

        let second = pdf_extract::extract_text_from_mem(&pages[1].bytes).unwrap();
        assert!(second.contains("two"), "unexpected text: {second}");
        assert!(!second.contains("three"));
    }

    #[test]
    fn source_is_left_untouched() {
        let source = make_pdf(&["a", "b"]);
        let before = source.clone();
        split_pdf(&source).unwrap();
        assert_eq!(source, before);
    }

    #[test]
    fn empty_page_tree_yields_no_pages() {
        let pages = split_pdf(&make_pdf(&[])).unwrap();
        assert!(pages.is_empty());
    }

    #[tokio::test]
    async fn garbage_is_a_malformed_document() {
        let err = PageSplitter::new()
            .split(Bytes::from_static(b"definitely not a pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::MalformedDocument(_)));
    }
}
