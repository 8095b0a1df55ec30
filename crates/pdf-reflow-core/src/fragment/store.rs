use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Fragment, FragmentId, PageSelection};
use crate::classify::{Classifier, FragmentClass};
use crate::error::{Error, Result};

const SIDECAR_VERSION: u32 = 1;

/// Every fragment of one document, grouped by page in reading order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentStore {
    document_digest: String,
    pages: Vec<Vec<Fragment>>,
}

#[derive(Serialize)]
struct SidecarRef<'a> {
    version: u32,
    #[serde(flatten)]
    store: &'a FragmentStore,
}

#[derive(Deserialize)]
struct Sidecar {
    version: u32,
    #[serde(flatten)]
    store: FragmentStore,
}

impl FragmentStore {
    /// Build a store from per-page fragment lists.
    ///
    /// `pages.len()` is the document's page count; pages without text are empty.
    pub fn from_pages(document_digest: impl Into<String>, pages: Vec<Vec<Fragment>>) -> Self {
        Self {
            document_digest: document_digest.into(),
            pages,
        }
    }

    pub fn document_digest(&self) -> &str {
        &self.document_digest
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Pages with their fragments, in page order
    pub fn pages(&self) -> impl Iterator<Item = (usize, &[Fragment])> {
        self.pages.iter().enumerate().map(|(i, p)| (i, p.as_slice()))
    }

    /// Fragments of one page; empty for pages outside the document
    pub fn fragments_on(&self, page: usize) -> &[Fragment] {
        self.pages.get(page).map_or(&[][..], Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fragment> {
        self.pages.iter().flatten()
    }

    pub fn get(&self, id: FragmentId) -> Option<&Fragment> {
        self.pages.get(id.page)?.get(id.index)
    }

    pub fn len(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.iter().all(Vec::is_empty)
    }

    /// Fragments classified as translatable prose
    pub fn prose(&self) -> impl Iterator<Item = &Fragment> {
        self.iter().filter(|f| !f.is_formula)
    }

    /// Copy of the store keeping only fragments on selected pages.
    ///
    /// The page count is unchanged so page indices stay valid.
    pub fn restrict_to(&self, selection: &PageSelection) -> Self {
        let pages = self
            .pages
            .iter()
            .enumerate()
            .map(|(i, fragments)| {
                if selection.contains(i) {
                    fragments.clone()
                } else {
                    Vec::new()
                }
            })
            .collect();

        Self {
            document_digest: self.document_digest.clone(),
            pages,
        }
    }

    /// Classify every fragment, setting `is_formula`.
    ///
    /// Returns the ids of fragments whose classification was a tie.
    pub fn classify_with(&mut self, classifier: &Classifier) -> Vec<FragmentId> {
        let mut ambiguous = Vec::new();
        for fragment in self.pages.iter_mut().flatten() {
            let result = classifier.classify(&fragment.raw_text);
            fragment.is_formula = result.class == FragmentClass::Formula;
            if result.ambiguous {
                debug!("Ambiguous classification for {}, keeping verbatim", fragment.id);
                ambiguous.push(fragment.id);
            }
        }
        ambiguous
    }

    /// Write the store as a JSON sidecar, replacing any previous file atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let sidecar = SidecarRef {
            version: SIDECAR_VERSION,
            store: self,
        };
        let json = serde_json::to_vec(&sidecar)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.persist(path)
            .map_err(|e| Error::FragmentStore(format!("Failed to write {}: {e}", path.display())))?;

        debug!("Saved {} fragments to {}", self.len(), path.display());
        Ok(())
    }

    /// Load a sidecar written for the document with `expected_digest`.
    pub fn load(path: impl AsRef<Path>, expected_digest: &str) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            Error::FragmentStore(format!("Failed to read {}: {e}", path.display()))
        })?;

        let sidecar: Sidecar = serde_json::from_slice(&bytes).map_err(|e| {
            Error::FragmentStore(format!("Failed to parse {}: {e}", path.display()))
        })?;

        if sidecar.version != SIDECAR_VERSION {
            return Err(Error::FragmentStore(format!(
                "Unsupported sidecar version {} in {}",
                sidecar.version,
                path.display()
            )));
        }

        if sidecar.store.document_digest != expected_digest {
            return Err(Error::FragmentStore(format!(
                "Sidecar {} belongs to a different document",
                path.display()
            )));
        }

        Ok(sidecar.store)
    }
}
