//! Test fixtures: in-process PDFs and failure-injecting collaborators.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use lopdf::dictionary;
use lopdf::{Document, Object, Stream};
use payroll_infra::{BlobError, BlobMeta, BlobStore, ObjectBlobStore};

/// Build a PDF with one page per entry of `texts`, each showing that text
/// in Helvetica.
pub fn make_pdf(texts: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.4");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(texts.len());
    for text in texts {
        let content = format!("BT /F1 12 Tf 72 720 Td ({text}) Tj ET");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

/// A payslip page showing a formatted national ID.
pub fn payslip_text(identifier: &str) -> String {
    format!("Payslip CPF: {identifier}")
}

/// Blob store whose `put` fails for the first `failing_puts` calls
/// (`u32::MAX` for always), delegating everything else to memory.
///
/// `puts` counts every call, targeted or not.
pub struct FlakyBlobStore {
    inner: ObjectBlobStore,
    failing_puts: u32,
    key_filter: Option<String>,
    puts: AtomicU32,
}

impl FlakyBlobStore {
    pub fn failing(failing_puts: u32) -> Self {
        Self {
            inner: ObjectBlobStore::in_memory(),
            failing_puts,
            key_filter: None,
            puts: AtomicU32::new(0),
        }
    }

    /// Only fail puts whose key contains `fragment`.
    pub fn only_for(mut self, fragment: &str) -> Self {
        self.key_filter = Some(fragment.to_string());
        self
    }

    pub fn always_failing() -> Self {
        Self::failing(u32::MAX)
    }

    /// Number of `put` calls seen so far, failed or not.
    pub fn puts(&self) -> u32 {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<String, BlobError> {
        let seen = self.puts.fetch_add(1, Ordering::SeqCst);
        let targeted = self.key_filter.as_deref().is_none_or(|f| key.contains(f));
        if targeted && seen < self.failing_puts {
            return Err(BlobError::Storage("bucket unavailable".into()));
        }
        self.inner.put(key, bytes, content_type).await
    }

    async fn get(&self, key: &str) -> Result<Bytes, BlobError> {
        self.inner.get(key).await
    }

    async fn head(&self, key: &str) -> Result<BlobMeta, BlobError> {
        self.inner.head(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.inner.delete(key).await
    }
}
