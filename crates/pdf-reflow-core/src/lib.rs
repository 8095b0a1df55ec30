//! PDF Reflow Core Library
//!
//! Layout-preserving translation of PDF documents in two phases:
//! - **translate**: extract paragraph fragments, keep formulas verbatim, and
//!   fill a persistent translation cache through a bounded worker pool
//! - **regenerate**: read translations back from the cache, shrink and wrap
//!   each one to fit its original box, and stamp it over the source pages
//!
//! The phases only share the cache file and a fragment sidecar, so layout
//! can be regenerated any number of times without touching the network.

pub mod assemble;
pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod fragment;
pub mod pdf;
pub mod reflow;
pub mod report;
pub mod translator;
pub mod util;

pub use assemble::{AssembledDocument, Assembler, Stamp};
pub use cache::{CacheKey, TranslationCache};
pub use classify::Classifier;
pub use config::{
    AppConfig, Lang, TextColor, TranslatorConfig,
    DEFAULT_SOURCE_LANG, DEFAULT_TARGET_LANG, DEFAULT_TEXT_COLOR,
};
pub use error::{Error, Result};
pub use fragment::{BoundingBox, Fragment, FragmentId, FragmentStore, PageSelection};
pub use pdf::{PdfDocument, PdfStamper, TextExtractor, TrueTypeFont};
pub use reflow::{FontSet, ReflowEngine, ReflowResult};
pub use report::{FragmentWarning, RunReport, WarningKind};
pub use translator::{Translator, OpenAiTranslator, TranslationDispatcher, create_translator};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use reflow::FontMetrics;
use translator::TranslationJob;

/// Progress callback: `(completed, total)`
pub type Progress<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

fn sidecar_path(config: &AppConfig, digest: &str) -> PathBuf {
    util::fragment_sidecar_path(config.cache.fragments_dir.as_deref(), digest)
}

/// Phase 1: extract, classify and translate into the cache.
pub struct ReflowTranslator {
    translator: Arc<dyn Translator>,
    cache: Arc<TranslationCache>,
    config: AppConfig,
}

impl ReflowTranslator {
    /// Create a translator for the configured API and cache file
    pub fn new(config: AppConfig) -> Result<Self> {
        let translator = create_translator(&config.translator)?;
        let cache = Arc::new(TranslationCache::from_config(&config));
        Ok(Self::with_translator(translator, cache, config))
    }

    /// Create with a custom translator and a shared cache
    pub const fn with_translator(
        translator: Arc<dyn Translator>,
        cache: Arc<TranslationCache>,
        config: AppConfig,
    ) -> Self {
        Self {
            translator,
            cache,
            config,
        }
    }

    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TranslationCache> {
        &self.cache
    }

    pub fn translator_info(&self) -> translator::TranslatorInfo {
        self.translator.info()
    }

    /// Translate every prose fragment on the selected pages that the cache
    /// does not already hold.
    ///
    /// Failed translations are reported, not returned as errors: the
    /// fragments stay untranslated and the rest of the batch continues.
    pub async fn translate(
        &self,
        doc: &PdfDocument,
        selection: &PageSelection,
        progress: Option<Progress<'_>>,
    ) -> Result<RunReport> {
        let mut store = TextExtractor::new(doc).extract_store()?;
        let ambiguous = store.classify_with(&Classifier::new(&self.config.classifier));

        let sidecar = sidecar_path(&self.config, doc.digest());
        if let Err(e) = store.save(&sidecar) {
            warn!("Could not save fragment sidecar, regeneration will re-extract: {e}");
        }

        let selected = store.restrict_to(selection);
        let mut report = RunReport {
            pages: selection.len(),
            fragments: selected.len(),
            prose: selected.prose().count(),
            formulas: selected.iter().filter(|f| f.is_formula).count(),
            ..RunReport::default()
        };
        for id in ambiguous.into_iter().filter(|id| selection.contains(id.page)) {
            report.warn(id, WarningKind::ClassificationAmbiguous);
        }

        // one job per distinct normalized text, in key order
        let mut distinct: BTreeMap<CacheKey, TranslationJob> = BTreeMap::new();
        for fragment in selected.prose() {
            if cache::normalize_text(&fragment.raw_text).is_empty() {
                continue;
            }
            let key = fragment.cache_key();
            distinct
                .entry(key.clone())
                .or_insert_with(|| TranslationJob {
                    key,
                    text: fragment.raw_text.clone(),
                    fragment_ids: Vec::new(),
                })
                .fragment_ids
                .push(fragment.id);
        }
        report.unique_texts = distinct.len();

        let jobs: Vec<TranslationJob> = distinct
            .into_values()
            .filter(|job| {
                let hit = self.cache.lookup(&job.key).is_some();
                if hit {
                    report.cache_hits += 1;
                }
                !hit
            })
            .collect();

        debug!(
            "{} distinct texts, {} cached, {} to translate",
            report.unique_texts,
            report.cache_hits,
            jobs.len()
        );

        let dispatcher = TranslationDispatcher::new(
            Arc::clone(&self.translator),
            Arc::clone(&self.cache),
            &self.config,
        );
        let summary = dispatcher.dispatch(jobs, progress).await;

        report.translated = summary.translated;
        report.cache_hits += summary.already_cached;
        for failed in summary.failed {
            for id in failed.fragment_ids {
                report.warn(id, WarningKind::TranslationFailed(failed.reason.clone()));
            }
        }

        self.cache.bulk_flush()?;
        log_cache_stats(&self.cache);
        report_image_only_pages(doc, &selected, selection, &mut report);
        report.sort_warnings();

        info!(
            "Translated {} texts ({} cached, {} failed) across {} pages",
            report.translated,
            report.cache_hits,
            report.failed_translations(),
            report.pages
        );

        Ok(report)
    }
}

/// Output of phase 2
#[derive(Debug)]
pub struct Regenerated {
    pub pdf_bytes: Vec<u8>,
    pub report: RunReport,
}

/// Phase 2: lay cached translations out over the original pages.
///
/// Never calls the translator. Fragments without a cached translation are
/// stamped with an `[untranslated]` marker.
pub struct Regenerator {
    cache: Arc<TranslationCache>,
    config: AppConfig,
    fonts: FontSet,
}

impl Regenerator {
    /// Open the configured cache. Lookups are always enabled here; with
    /// `ignore_cache` set the fragments are re-extracted instead of loaded.
    pub fn new(config: AppConfig) -> Self {
        let mut cache_config = config.clone();
        cache_config.cache.ignore_cache = false;
        let cache = Arc::new(TranslationCache::from_config(&cache_config));
        Self::with_cache(cache, config)
    }

    /// Uses the first usable system TrueType font, falling back to Helvetica
    pub fn with_cache(cache: Arc<TranslationCache>, config: AppConfig) -> Self {
        Self {
            cache,
            config,
            fonts: FontSet::system(),
        }
    }

    #[must_use]
    pub fn with_fonts(mut self, fonts: FontSet) -> Self {
        self.fonts = fonts;
        self
    }

    pub const fn fonts(&self) -> &FontSet {
        &self.fonts
    }

    /// Fragments from the phase-1 sidecar, or freshly extracted
    fn load_store(&self, doc: &PdfDocument) -> Result<FragmentStore> {
        if !self.config.cache.ignore_cache {
            let sidecar = sidecar_path(&self.config, doc.digest());
            match FragmentStore::load(&sidecar, doc.digest()) {
                Ok(store) => {
                    debug!("Loaded {} fragments from {}", store.len(), sidecar.display());
                    return Ok(store);
                }
                Err(e) => debug!("No usable sidecar, extracting: {e}"),
            }
        }
        TextExtractor::new(doc).extract_store()
    }

    pub fn regenerate(&self, doc: &PdfDocument, selection: &PageSelection) -> Result<Regenerated> {
        let mut store = self.load_store(doc)?;
        if store.page_count() != doc.page_count() {
            return Err(Error::FragmentStore(format!(
                "Fragment store has {} pages, document has {}",
                store.page_count(),
                doc.page_count()
            )));
        }

        let ambiguous = store.classify_with(&Classifier::new(&self.config.classifier));
        let selected = store.restrict_to(selection);

        let assembler = Assembler::from_config(ReflowEngine::new(self.config.reflow), &self.config.render);
        let assembled = assembler.assemble(&selected, &self.cache, &self.fonts, selection);
        check_glyph_coverage(&assembled, &self.fonts, self.config.render.allow_missing_glyphs)?;

        log_cache_stats(&self.cache);

        let pdf_bytes = PdfStamper::new(&self.fonts).render(doc.bytes(), &assembled)?;

        let mut report = RunReport {
            pages: selection.len(),
            fragments: selected.len(),
            prose: selected.prose().count(),
            formulas: selected.iter().filter(|f| f.is_formula).count(),
            stamped: assembled.replaced(),
            marked: assembled.marked(),
            ..RunReport::default()
        };
        for id in ambiguous.into_iter().filter(|id| selection.contains(id.page)) {
            report.warn(id, WarningKind::ClassificationAmbiguous);
        }
        report.warnings.extend(assembled.warnings);
        report_image_only_pages(doc, &selected, selection, &mut report);
        report.sort_warnings();

        info!(
            "Stamped {} fragments ({} marked untranslated, {} overflowing) on {} pages",
            report.stamped,
            report.marked,
            report.overflows(),
            report.pages
        );

        Ok(Regenerated { pdf_bytes, report })
    }
}

fn log_cache_stats(cache: &TranslationCache) {
    let stats = cache.stats();
    debug!(
        "Cache {}: {} hits, {} misses, {} entries",
        cache.path().display(),
        stats.hits,
        stats.misses,
        stats.entries
    );
}

/// Flag selected pages that hold images but no text; they stay as they are
fn report_image_only_pages(doc: &PdfDocument, store: &FragmentStore, selection: &PageSelection, report: &mut RunReport) {
    match TextExtractor::new(doc).image_only_pages(store, selection) {
        Ok(pages) => {
            for page in pages {
                report.warn(FragmentId::new(page, 0), WarningKind::ImageOnlyPage);
            }
        }
        Err(e) => debug!("Skipping image-only page check: {e}"),
    }
}

/// Refuse to write text the faces cannot draw unless explicitly allowed
fn check_glyph_coverage(assembled: &AssembledDocument, fonts: &FontSet, allow: bool) -> Result<()> {
    let mut missing: Vec<char> = Vec::new();
    for warning in &assembled.warnings {
        if let WarningKind::MissingGlyphs(chars) = &warning.kind {
            for c in chars.chars() {
                if !missing.contains(&c) {
                    missing.push(c);
                }
            }
        }
    }
    if missing.is_empty() {
        return Ok(());
    }

    let font = fonts.default_face().family().to_string();
    let sample: String = missing.iter().take(10).collect();
    if allow {
        warn!(
            "{} distinct characters cannot be drawn with {font} (e.g. \"{sample}\")",
            missing.len()
        );
        return Ok(());
    }
    Err(Error::FontCoverage {
        font,
        count: missing.len(),
        sample,
    })
}
