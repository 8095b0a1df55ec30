//! Per-run counters and non-fatal warnings.

use serde::Serialize;

use crate::fragment::FragmentId;

/// Something worth telling the user about a single fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum WarningKind {
    /// Symbolic density sat exactly on the threshold; kept verbatim
    ClassificationAmbiguous,
    /// Translation failed after all retries; the original text stays
    TranslationFailed(String),
    /// No cached translation at regeneration time; a marker was stamped
    MissingCacheEntry,
    /// Stamped at the minimum size; lines past the box are clipped
    ReflowOverflow,
    /// The stamping font has no glyphs for these characters
    MissingGlyphs(String),
    /// The fragment lies inside a formula's box and was left as is
    CoveredByFormula,
    /// The page has images but no extractable text; OCR is not attempted.
    /// Reported against index 0 of the page.
    ImageOnlyPage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FragmentWarning {
    pub fragment_id: FragmentId,
    pub kind: WarningKind,
}

impl std::fmt::Display for FragmentWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            WarningKind::ClassificationAmbiguous => {
                write!(f, "{}: ambiguous classification, kept verbatim", self.fragment_id)
            }
            WarningKind::TranslationFailed(reason) => {
                write!(f, "{}: translation failed: {reason}", self.fragment_id)
            }
            WarningKind::MissingCacheEntry => {
                write!(f, "{}: no cached translation, marked untranslated", self.fragment_id)
            }
            WarningKind::ReflowOverflow => {
                write!(f, "{}: text overflows its box at minimum size", self.fragment_id)
            }
            WarningKind::MissingGlyphs(chars) => {
                write!(f, "{}: font has no glyphs for \"{chars}\"", self.fragment_id)
            }
            WarningKind::CoveredByFormula => {
                write!(f, "{}: inside a formula region, kept verbatim", self.fragment_id)
            }
            WarningKind::ImageOnlyPage => write!(
                f,
                "p{}: page has images but no extractable text (scanned?), left unchanged",
                self.fragment_id.page
            ),
        }
    }
}

/// Summary of one phase run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub pages: usize,
    pub fragments: usize,
    pub prose: usize,
    pub formulas: usize,
    /// Distinct prose texts after deduplication
    pub unique_texts: usize,
    pub cache_hits: usize,
    /// Texts sent to the translator
    pub translated: usize,
    /// Fragments stamped with a translation
    pub stamped: usize,
    /// Fragments stamped with an `[untranslated]` marker
    pub marked: usize,
    pub warnings: Vec<FragmentWarning>,
}

impl RunReport {
    pub fn warn(&mut self, fragment_id: FragmentId, kind: WarningKind) {
        self.warnings.push(FragmentWarning { fragment_id, kind });
    }

    pub fn count(&self, matches: impl Fn(&WarningKind) -> bool) -> usize {
        self.warnings.iter().filter(|w| matches(&w.kind)).count()
    }

    pub fn failed_translations(&self) -> usize {
        self.count(|k| matches!(k, WarningKind::TranslationFailed(_)))
    }

    pub fn missing_entries(&self) -> usize {
        self.count(|k| *k == WarningKind::MissingCacheEntry)
    }

    pub fn overflows(&self) -> usize {
        self.count(|k| *k == WarningKind::ReflowOverflow)
    }

    pub fn missing_glyphs(&self) -> usize {
        self.count(|k| matches!(k, WarningKind::MissingGlyphs(_)))
    }

    pub fn image_only_pages(&self) -> usize {
        self.count(|k| *k == WarningKind::ImageOnlyPage)
    }

    /// Warnings ordered by fragment
    pub fn sort_warnings(&mut self) {
        self.warnings.sort_by_key(|w| w.fragment_id);
    }
}
