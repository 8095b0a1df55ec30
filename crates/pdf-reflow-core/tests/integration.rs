//! Integration tests for pdf-reflow-core
//!
//! These tests run both phases end to end:
//! - text extraction from generated PDFs
//! - translation into the cache with mock backends
//! - regeneration from the cache and the fragment sidecar

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, Stream};
use pdf_reflow_core::{
    AppConfig, CacheKey, Error, FontSet, Lang, PageSelection, PdfDocument, ReflowTranslator, Regenerator,
    Result, TranslationCache, Translator, WarningKind,
    translator::TranslatorInfo,
};

// =============================================================================
// Mock Translators
// =============================================================================

/// Counts requests per text and answers with a fixed prefix
#[derive(Default)]
struct CountingTranslator {
    calls: Mutex<HashMap<String, usize>>,
    /// Texts containing this fail with a non-retryable error
    fail_containing: Option<&'static str>,
}

impl CountingTranslator {
    fn failing_on(needle: &'static str) -> Self {
        Self {
            fail_containing: Some(needle),
            ..Self::default()
        }
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    fn calls(&self) -> HashMap<String, usize> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Translator for CountingTranslator {
    fn info(&self) -> TranslatorInfo {
        TranslatorInfo {
            name: "counting",
            requires_api_key: false,
            supports_auto_detect: false,
        }
    }

    async fn translate(&self, text: &str, _source: &Lang, _target: &Lang) -> Result<String> {
        *self.calls.lock().unwrap().entry(text.to_string()).or_default() += 1;
        if self.fail_containing.is_some_and(|needle| text.contains(needle)) {
            return Err(Error::TranslationInvalidResponse("mock refusal".to_string()));
        }
        Ok(format!("Tr {text}"))
    }
}

/// Always fails with a transient error
struct FailingTranslator;

#[async_trait]
impl Translator for FailingTranslator {
    fn info(&self) -> TranslatorInfo {
        TranslatorInfo {
            name: "failing",
            requires_api_key: false,
            supports_auto_detect: false,
        }
    }

    async fn translate(&self, _text: &str, _source: &Lang, _target: &Lang) -> Result<String> {
        Err(Error::TranslationService {
            status: 503,
            body: "unavailable".to_string(),
        })
    }
}

/// Answers every request in Russian
struct CyrillicTranslator;

#[async_trait]
impl Translator for CyrillicTranslator {
    fn info(&self) -> TranslatorInfo {
        TranslatorInfo {
            name: "cyrillic",
            requires_api_key: false,
            supports_auto_detect: false,
        }
    }

    async fn translate(&self, _text: &str, _source: &Lang, _target: &Lang) -> Result<String> {
        Ok("Рисунок 1".to_string())
    }
}

/// Never answers within the configured deadline
struct SlowTranslator;

#[async_trait]
impl Translator for SlowTranslator {
    fn info(&self) -> TranslatorInfo {
        TranslatorInfo {
            name: "slow",
            requires_api_key: false,
            supports_auto_detect: false,
        }
    }

    async fn translate(&self, text: &str, _source: &Lang, _target: &Lang) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(text.to_string())
    }
}

// =============================================================================
// Test Fixtures
// =============================================================================

/// A letter-sized PDF with one Helvetica text run per `(x, y, size, text)`
fn create_pdf(pages: &[&[(i64, i64, i64, &str)]]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let page_tree_id = doc.new_object_id();

    let font_id = doc.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Font".to_vec())),
        ("Subtype", Object::Name(b"Type1".to_vec())),
        ("BaseFont", Object::Name(b"Helvetica".to_vec())),
        ("Encoding", Object::Name(b"WinAnsiEncoding".to_vec())),
    ]));

    let mut kids = Vec::new();
    for runs in pages {
        let mut operations = Vec::new();
        for &(x, y, size, text) in *runs {
            operations.extend([
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), size.into()]),
                Operation::new("Td", vec![x.into(), y.into()]),
                Operation::new("Tj", vec![Object::string_literal(text)]),
                Operation::new("ET", vec![]),
            ]);
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));

        let page_id = doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(page_tree_id)),
            ("Contents", Object::Reference(content_id)),
            (
                "Resources",
                Object::Dictionary(Dictionary::from_iter([(
                    "Font",
                    Object::Dictionary(Dictionary::from_iter([("F1", Object::Reference(font_id))])),
                )])),
            ),
            (
                "MediaBox",
                Object::Array(vec![0.into(), 0.into(), 612.into(), 792.into()]),
            ),
        ]));
        kids.push(Object::Reference(page_id));
    }

    let count = i64::try_from(kids.len()).unwrap();
    doc.objects.insert(
        page_tree_id,
        Object::Dictionary(Dictionary::from_iter([
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Kids", Object::Array(kids)),
            ("Count", Object::Integer(count)),
        ])),
    );

    let catalog_id = doc.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(page_tree_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut output = Vec::new();
    doc.save_to(&mut output).unwrap();
    output
}

/// Two pages, both with a "Figure 1" caption
fn figure_pdf() -> PdfDocument {
    let bytes = create_pdf(&[
        &[
            (72, 700, 14, "Figure 1"),
            (72, 400, 11, "The results are shown below"),
        ],
        &[(72, 700, 14, "Figure 1")],
    ]);
    PdfDocument::from_bytes(bytes).expect("Failed to load generated PDF")
}

/// One page of text followed by a page that only draws a grey image
fn scanned_pdf() -> Vec<u8> {
    let bytes = create_pdf(&[&[(72, 700, 12, "A sentence on the first page")], &[]]);
    let mut doc = Document::load_mem(&bytes).unwrap();
    let page_id = doc.get_pages()[&2];

    let image_id = doc.add_object(Stream::new(
        Dictionary::from_iter([
            ("Type", Object::Name(b"XObject".to_vec())),
            ("Subtype", Object::Name(b"Image".to_vec())),
            ("Width", Object::Integer(1)),
            ("Height", Object::Integer(1)),
            ("ColorSpace", Object::Name(b"DeviceGray".to_vec())),
            ("BitsPerComponent", Object::Integer(8)),
        ]),
        vec![0x80],
    ));
    let content_id = doc.add_object(Stream::new(
        Dictionary::new(),
        b"q 200 0 0 200 72 400 cm /Im0 Do Q".to_vec(),
    ));

    let page = doc.get_object_mut(page_id).unwrap().as_dict_mut().unwrap();
    page.set("Contents", Object::Reference(content_id));
    page.get_mut(b"Resources")
        .unwrap()
        .as_dict_mut()
        .unwrap()
        .set("XObject", Object::Dictionary(Dictionary::from_iter([("Im0", Object::Reference(image_id))])));

    let mut output = Vec::new();
    doc.save_to(&mut output).unwrap();
    output
}

/// Config with every file inside `dir` and fast retries
fn test_config(dir: &tempfile::TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.cache.path = Some(dir.path().join("translations.json"));
    config.cache.fragments_dir = Some(dir.path().join("fragments"));
    config.translator.retry_count = 2;
    config.translator.retry_delay_ms = 1;
    config.translator.retry_max_delay_ms = 2;
    config.translator.timeout_secs = 1;
    config
}

fn open_cache(config: &AppConfig) -> Arc<TranslationCache> {
    Arc::new(TranslationCache::from_config(config))
}

fn page_content(bytes: &[u8], page: u32) -> Vec<u8> {
    let doc = Document::load_mem(bytes).unwrap();
    let page_id = doc.get_pages()[&page];
    doc.get_page_content(page_id).unwrap()
}

// =============================================================================
// Extraction
// =============================================================================

#[test]
fn test_extracts_fragments_per_page() {
    let doc = figure_pdf();
    assert_eq!(doc.page_count(), 2);

    let store = pdf_reflow_core::TextExtractor::new(&doc).extract_store().unwrap();
    assert_eq!(store.page_count(), 2);
    assert_eq!(store.document_digest(), doc.digest());

    let texts: Vec<&str> = store.iter().map(|f| f.raw_text.as_str()).collect();
    assert!(texts.iter().any(|t| t.contains("Figure")));
    assert!(texts.iter().any(|t| t.contains("results")));

    for fragment in store.iter() {
        assert!(fragment.bbox.width() > 0.0);
        assert!(fragment.bbox.height() > 0.0);
        assert!(fragment.font_size > 0.0);
    }
}

#[test]
fn test_invalid_pdf_bytes() {
    assert!(matches!(
        PdfDocument::from_bytes(b"not a pdf".to_vec()),
        Err(Error::PdfOpen(_))
    ));
    assert!(PdfDocument::from_bytes(Vec::new()).is_err());
}

// =============================================================================
// Phase 1
// =============================================================================

#[tokio::test]
async fn test_repeated_text_is_translated_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let doc = figure_pdf();
    let translator = Arc::new(CountingTranslator::default());
    let cache = open_cache(&config);

    let phase1 = ReflowTranslator::with_translator(
        Arc::clone(&translator) as Arc<dyn Translator>,
        Arc::clone(&cache),
        config,
    );
    let report = phase1
        .translate(&doc, &PageSelection::all(doc.page_count()), None)
        .await
        .unwrap();

    assert_eq!(report.unique_texts, 2);
    assert_eq!(report.translated, 2);
    assert_eq!(translator.total_calls(), 2);
    assert!(translator.calls().values().all(|&n| n == 1));
    assert_eq!(cache.len(), 2);
    assert!(report.warnings.is_empty());
}

#[tokio::test]
async fn test_second_run_makes_no_requests() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let doc = figure_pdf();
    let selection = PageSelection::all(doc.page_count());

    let first = Arc::new(CountingTranslator::default());
    ReflowTranslator::with_translator(first.clone(), open_cache(&config), config.clone())
        .translate(&doc, &selection, None)
        .await
        .unwrap();
    let cache_file = config.cache.path.clone().unwrap();
    let after_first = std::fs::read(&cache_file).unwrap();

    // fresh cache instance, loaded from disk
    let second = Arc::new(CountingTranslator::default());
    let report = ReflowTranslator::with_translator(second.clone(), open_cache(&config), config)
        .translate(&doc, &selection, None)
        .await
        .unwrap();

    assert_eq!(second.total_calls(), 0);
    assert_eq!(report.cache_hits, 2);
    assert_eq!(report.translated, 0);
    assert_eq!(std::fs::read(&cache_file).unwrap(), after_first);
}

#[tokio::test]
async fn test_ignore_cache_translates_again() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    let doc = figure_pdf();
    let selection = PageSelection::all(doc.page_count());

    ReflowTranslator::with_translator(Arc::new(CountingTranslator::default()), open_cache(&config), config.clone())
        .translate(&doc, &selection, None)
        .await
        .unwrap();

    config.cache.ignore_cache = true;
    let translator = Arc::new(CountingTranslator::default());
    let report = ReflowTranslator::with_translator(translator.clone(), open_cache(&config), config)
        .translate(&doc, &selection, None)
        .await
        .unwrap();

    assert_eq!(translator.total_calls(), 2);
    assert_eq!(report.cache_hits, 0);
}

#[tokio::test]
async fn test_failures_are_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let doc = figure_pdf();
    let cache = open_cache(&config);

    let progress_calls = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&progress_calls);
    let progress: &(dyn Fn(usize, usize) + Send + Sync) = &move |done, total| {
        recorded.lock().unwrap().push((done, total));
    };

    let report = ReflowTranslator::with_translator(Arc::new(FailingTranslator), Arc::clone(&cache), config)
        .translate(&doc, &PageSelection::all(doc.page_count()), Some(progress))
        .await
        .unwrap();

    // both "Figure 1" fragments and the sentence
    assert_eq!(report.failed_translations(), 3);
    assert_eq!(report.translated, 0);
    assert!(cache.is_empty());
    assert_eq!(progress_calls.lock().unwrap().last(), Some(&(2, 2)));
}

#[tokio::test]
async fn test_slow_translator_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.translator.retry_count = 1;
    let doc = PdfDocument::from_bytes(create_pdf(&[&[(72, 700, 12, "A slow sentence to translate")]])).unwrap();

    let report = ReflowTranslator::with_translator(Arc::new(SlowTranslator), open_cache(&config), config)
        .translate(&doc, &PageSelection::all(1), None)
        .await
        .unwrap();

    assert_eq!(report.failed_translations(), 1);
    let reason = report
        .warnings
        .iter()
        .find_map(|w| match &w.kind {
            WarningKind::TranslationFailed(reason) => Some(reason.clone()),
            _ => None,
        })
        .unwrap();
    assert!(reason.contains("timed out"), "unexpected reason: {reason}");
}

#[tokio::test]
async fn test_only_selected_pages_are_translated() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let bytes = create_pdf(&[
        &[(72, 700, 12, "First page sentence")],
        &[(72, 700, 12, "Second page sentence")],
    ]);
    let doc = PdfDocument::from_bytes(bytes).unwrap();
    let translator = Arc::new(CountingTranslator::default());

    let report = ReflowTranslator::with_translator(translator.clone(), open_cache(&config), config)
        .translate(&doc, &PageSelection::parse("2", 2).unwrap(), None)
        .await
        .unwrap();

    assert_eq!(report.pages, 1);
    assert_eq!(translator.total_calls(), 1);
    assert!(translator.calls().keys().all(|t| t.contains("Second")));
}

#[tokio::test]
async fn test_formulas_are_never_sent() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let bytes = create_pdf(&[&[
        (72, 700, 12, "The model is defined as follows"),
        (72, 500, 12, "x = y + z"),
    ]]);
    let doc = PdfDocument::from_bytes(bytes).unwrap();
    let translator = Arc::new(CountingTranslator::default());
    let cache = open_cache(&config);

    let report = ReflowTranslator::with_translator(translator.clone(), Arc::clone(&cache), config)
        .translate(&doc, &PageSelection::all(1), None)
        .await
        .unwrap();

    assert_eq!(report.formulas, 1);
    assert!(translator.calls().keys().all(|t| !t.contains('=')));
    assert!(!cache.contains(&CacheKey::from_text("x = y + z")));
}

// =============================================================================
// Phase 2
// =============================================================================

#[tokio::test]
async fn test_regenerate_stamps_cached_translations() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let doc = figure_pdf();
    let selection = PageSelection::all(doc.page_count());

    ReflowTranslator::with_translator(Arc::new(CountingTranslator::default()), open_cache(&config), config.clone())
        .translate(&doc, &selection, None)
        .await
        .unwrap();

    let sidecar = dir.path().join("fragments").join(format!("{}.json", doc.digest()));
    assert!(sidecar.exists());

    let output = Regenerator::new(config)
        .with_fonts(FontSet::default())
        .regenerate(&doc, &selection)
        .unwrap();
    assert_eq!(output.report.stamped, 3);
    assert_eq!(output.report.marked, 0);

    let out = Document::load_mem(&output.pdf_bytes).unwrap();
    assert_eq!(out.get_pages().len(), 2);

    let content = String::from_utf8_lossy(&page_content(&output.pdf_bytes, 1)).into_owned();
    assert!(content.contains("re f"));
    // "Tr" prefix of the mock translation in WinAnsi hex
    assert!(content.contains("<5472"));
}

#[tokio::test]
async fn test_missing_entry_gets_visible_marker() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let doc = figure_pdf();
    let selection = PageSelection::all(doc.page_count());

    let phase1 = ReflowTranslator::with_translator(
        Arc::new(CountingTranslator::failing_on("results")),
        open_cache(&config),
        config.clone(),
    );
    let report = phase1.translate(&doc, &selection, None).await.unwrap();
    assert_eq!(report.failed_translations(), 1);

    let output = Regenerator::new(config)
        .with_fonts(FontSet::default())
        .regenerate(&doc, &selection)
        .unwrap();
    assert_eq!(output.report.marked, 1);
    assert_eq!(output.report.missing_entries(), 1);
    assert_eq!(output.report.stamped, 2);

    let content = String::from_utf8_lossy(&page_content(&output.pdf_bytes, 1)).into_owned();
    // "[untranslated]" in WinAnsi hex
    assert!(content.contains("5B756E7472616E736C617465645D"));
}

#[test]
fn test_regenerate_without_sidecar_re_extracts() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let doc = figure_pdf();

    // empty cache, no sidecar: everything is marked, nothing crashes
    let output = Regenerator::new(config)
        .regenerate(&doc, &PageSelection::all(doc.page_count()))
        .unwrap();
    assert_eq!(output.report.marked, 3);
    assert_eq!(output.report.stamped, 0);
}

#[test]
fn test_pages_outside_range_are_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let bytes = create_pdf(&[
        &[(72, 700, 12, "First page sentence")],
        &[(72, 700, 12, "Second page sentence")],
    ]);
    let doc = PdfDocument::from_bytes(bytes.clone()).unwrap();

    let output = Regenerator::new(config)
        .regenerate(&doc, &PageSelection::parse("1", 2).unwrap())
        .unwrap();

    assert_eq!(output.report.pages, 1);
    assert_eq!(page_content(&output.pdf_bytes, 2), page_content(&bytes, 2));
    assert_ne!(page_content(&output.pdf_bytes, 1), page_content(&bytes, 1));
}

async fn translate_to_cyrillic(config: &AppConfig, doc: &PdfDocument) {
    ReflowTranslator::with_translator(Arc::new(CyrillicTranslator), open_cache(config), config.clone())
        .translate(doc, &PageSelection::all(doc.page_count()), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_uncoverable_text_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let doc = figure_pdf();
    translate_to_cyrillic(&config, &doc).await;

    let err = Regenerator::new(config)
        .with_fonts(FontSet::default())
        .regenerate(&doc, &PageSelection::all(doc.page_count()))
        .unwrap_err();

    match err {
        Error::FontCoverage { font, count, sample } => {
            assert_eq!(font, "Helvetica");
            assert_eq!(count, 7);
            assert_eq!(sample, "Рисунок");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_allowed_missing_glyphs_are_reported_per_fragment() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.render.allow_missing_glyphs = true;
    let doc = figure_pdf();
    translate_to_cyrillic(&config, &doc).await;

    let output = Regenerator::new(config)
        .with_fonts(FontSet::default())
        .regenerate(&doc, &PageSelection::all(doc.page_count()))
        .unwrap();

    assert_eq!(output.report.stamped, 3);
    assert_eq!(output.report.missing_glyphs(), 3);
    assert!(output.report.warnings.iter().any(|w| w.kind == WarningKind::MissingGlyphs("Рисунок".into())));
}

#[tokio::test]
async fn test_system_fonts_never_stamp_question_marks() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let doc = figure_pdf();
    translate_to_cyrillic(&config, &doc).await;

    // without a Cyrillic system font this must fail rather than degrade
    match Regenerator::new(config).regenerate(&doc, &PageSelection::all(doc.page_count())) {
        Ok(output) => {
            assert_eq!(output.report.missing_glyphs(), 0);
            for page in 1..=2 {
                let content = String::from_utf8_lossy(&page_content(&output.pdf_bytes, page)).into_owned();
                // "Рисунок" as WinAnsi substitutes
                assert!(!content.contains("3F3F3F3F3F3F3F"), "page {page}: {content}");
            }
        }
        Err(err) => assert!(matches!(err, Error::FontCoverage { .. }), "unexpected error: {err}"),
    }
}

// =============================================================================
// Image-only pages
// =============================================================================

#[tokio::test]
async fn test_image_only_page_is_reported_by_both_phases() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let bytes = scanned_pdf();
    let doc = PdfDocument::from_bytes(bytes.clone()).unwrap();
    let selection = PageSelection::all(doc.page_count());

    let report = ReflowTranslator::with_translator(
        Arc::new(CountingTranslator::default()),
        open_cache(&config),
        config.clone(),
    )
    .translate(&doc, &selection, None)
    .await
    .unwrap();
    assert_eq!(report.image_only_pages(), 1);
    assert_eq!(report.translated, 1);

    let output = Regenerator::new(config)
        .with_fonts(FontSet::default())
        .regenerate(&doc, &selection)
        .unwrap();
    assert_eq!(output.report.image_only_pages(), 1);
    let warning = output
        .report
        .warnings
        .iter()
        .find(|w| w.kind == WarningKind::ImageOnlyPage)
        .unwrap();
    assert_eq!(warning.fragment_id.page, 1);

    assert_eq!(page_content(&output.pdf_bytes, 2), page_content(&bytes, 2));
}

#[test]
fn test_unselected_image_page_is_not_reported() {
    let dir = tempfile::tempdir().unwrap();
    let doc = PdfDocument::from_bytes(scanned_pdf()).unwrap();

    let output = Regenerator::new(test_config(&dir))
        .with_fonts(FontSet::default())
        .regenerate(&doc, &PageSelection::parse("1", 2).unwrap())
        .unwrap();
    assert_eq!(output.report.image_only_pages(), 0);
}
