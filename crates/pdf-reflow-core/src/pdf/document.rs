use std::path::Path;
use std::sync::Arc;

use mupdf::{Document as MuDocument, MetadataName};

use crate::error::{Error, Result};

/// A source PDF held in memory.
///
/// The bytes are shared, never modified, and reopened with MuPDF whenever
/// text is needed, so the document can be cloned and sent across threads.
#[derive(Clone)]
pub struct PdfDocument {
    bytes: Arc<Vec<u8>>,
    page_count: usize,
    title: Option<String>,
    /// MD5 hex of the bytes, names the fragment sidecar
    digest: String,
}

impl PdfDocument {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();

        let doc = MuDocument::from_bytes(&bytes, "")
            .map_err(|e| Error::PdfOpen(format!("Failed to parse PDF: {e}")))?;

        let page_count = doc
            .page_count()
            .map_err(|e| Error::PdfOpen(format!("Failed to get page count: {e}")))?;

        // mupdf returns an empty string for absent metadata
        let title = doc.metadata(MetadataName::Title).ok().filter(|s| !s.is_empty());

        let digest = format!("{:x}", md5::compute(&bytes));

        Ok(Self {
            bytes: Arc::new(bytes),
            page_count: usize::try_from(page_count).unwrap_or(0),
            title,
            digest,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| Error::PdfOpen(format!("Failed to read file {}: {e}", path.display())))?;
        Self::from_bytes(bytes)
    }

    pub const fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Content digest, stable for identical bytes
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub(crate) fn open_document(&self) -> Result<MuDocument> {
        MuDocument::from_bytes(&self.bytes, "")
            .map_err(|e| Error::PdfOpen(format!("Failed to open document: {e}")))
    }
}

impl std::fmt::Debug for PdfDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfDocument")
            .field("page_count", &self.page_count)
            .field("title", &self.title)
            .field("digest", &self.digest)
            .field("bytes_len", &self.bytes.len())
            .finish()
    }
}
