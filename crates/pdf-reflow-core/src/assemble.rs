//! Planning what to draw over each page of the translated document.
//!
//! Planning is pure: it reads the fragment store and the translation cache
//! and produces per-page stamp lists. Turning plans into PDF bytes is the
//! job of [`crate::pdf::PdfStamper`].

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::TranslationCache;
use crate::config::{RenderConfig, TextColor};
use crate::fragment::{BoundingBox, Fragment, FragmentId, FragmentStore, PageSelection};
use crate::reflow::{FontSet, ReflowEngine, ReflowResult};
use crate::report::{FragmentWarning, WarningKind};

/// Padding around the original box when painting it out
pub const ERASE_PADDING: f32 = 1.0;

/// Prefix stamped in place of prose that has no cached translation
pub const UNTRANSLATED_MARKER: &str = "[untranslated]";

/// One positioned line of text, baseline in top-left page coordinates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextLine {
    pub text: String,
    pub x: f32,
    pub baseline: f32,
}

/// Text drawn over an erased region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextStamp {
    pub fragment_id: FragmentId,
    pub erase: BoundingBox,
    /// Index into the `FontSet`
    pub face: usize,
    pub font_size: f32,
    pub lines: Vec<TextLine>,
    pub color: TextColor,
    pub fits: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Stamp {
    /// Left exactly as in the source
    Preserve(FragmentId),
    /// Translated text
    Replace(TextStamp),
    /// Original text behind an untranslated marker
    Marker(TextStamp),
}

impl Stamp {
    pub const fn fragment_id(&self) -> FragmentId {
        match self {
            Self::Preserve(id) => *id,
            Self::Replace(s) | Self::Marker(s) => s.fragment_id,
        }
    }

    /// The drawing part, if anything is drawn
    pub const fn text(&self) -> Option<&TextStamp> {
        match self {
            Self::Preserve(_) => None,
            Self::Replace(s) | Self::Marker(s) => Some(s),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PagePlan {
    pub page: usize,
    pub stamps: Vec<Stamp>,
}

impl PagePlan {
    /// Whether anything is drawn on this page
    pub fn has_text(&self) -> bool {
        self.stamps.iter().any(|s| s.text().is_some())
    }
}

/// Plans for the selected pages, in page order
#[derive(Debug, Clone, Serialize)]
pub struct AssembledDocument {
    pub page_count: usize,
    pub pages: Vec<PagePlan>,
    pub warnings: Vec<FragmentWarning>,
}

impl AssembledDocument {
    pub fn plan_for(&self, page: usize) -> Option<&PagePlan> {
        self.pages.iter().find(|p| p.page == page)
    }

    pub fn stamps(&self) -> impl Iterator<Item = &Stamp> {
        self.pages.iter().flat_map(|p| p.stamps.iter())
    }

    pub fn replaced(&self) -> usize {
        self.stamps().filter(|s| matches!(s, Stamp::Replace(_))).count()
    }

    pub fn marked(&self) -> usize {
        self.stamps().filter(|s| matches!(s, Stamp::Marker(_))).count()
    }

    pub fn preserved(&self) -> usize {
        self.stamps().filter(|s| matches!(s, Stamp::Preserve(_))).count()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Assembler {
    engine: ReflowEngine,
    text_color: TextColor,
    marker_color: TextColor,
}

impl Assembler {
    pub const fn new(engine: ReflowEngine, text_color: TextColor, marker_color: TextColor) -> Self {
        Self {
            engine,
            text_color,
            marker_color,
        }
    }

    pub fn from_config(engine: ReflowEngine, render: &RenderConfig) -> Self {
        Self::new(engine, render.text_color(), render.marker_color())
    }

    /// Plan every selected page. Reads the cache only; never translates.
    pub fn assemble(
        &self,
        store: &FragmentStore,
        cache: &TranslationCache,
        fonts: &FontSet,
        selection: &PageSelection,
    ) -> AssembledDocument {
        let planned: Vec<(PagePlan, Vec<FragmentWarning>)> = selection
            .as_slice()
            .par_iter()
            .filter(|&&page| page < store.page_count())
            .map(|&page| self.plan_page(page, store.fragments_on(page), cache, fonts))
            .collect();

        let mut pages = Vec::with_capacity(planned.len());
        let mut warnings = Vec::new();
        for (plan, page_warnings) in planned {
            pages.push(plan);
            warnings.extend(page_warnings);
        }

        AssembledDocument {
            page_count: store.page_count(),
            pages,
            warnings,
        }
    }

    fn plan_page(
        &self,
        page: usize,
        fragments: &[Fragment],
        cache: &TranslationCache,
        fonts: &FontSet,
    ) -> (PagePlan, Vec<FragmentWarning>) {
        let formulas: Vec<BoundingBox> = fragments
            .iter()
            .filter(|f| f.is_formula)
            .map(|f| f.bbox)
            .collect();

        let mut stamps = Vec::with_capacity(fragments.len());
        let mut warnings = Vec::new();
        let mut warn_on = |fragment: &Fragment, kind: WarningKind| {
            warnings.push(FragmentWarning {
                fragment_id: fragment.id,
                kind,
            });
        };

        for fragment in fragments {
            if fragment.is_formula {
                stamps.push(Stamp::Preserve(fragment.id));
                continue;
            }

            let Some(erase) = clear_of_formulas(fragment.bbox.outset(ERASE_PADDING), &formulas) else {
                warn!("{} lies inside a formula region, keeping it verbatim", fragment.id);
                warn_on(fragment, WarningKind::CoveredByFormula);
                stamps.push(Stamp::Preserve(fragment.id));
                continue;
            };

            let stamp = if let Some(translated) = cache.lookup(&fragment.cache_key()) {
                let result = self.engine.fit(fragment, &translated, fonts);
                if !result.fits {
                    warn!("{} overflows its box at minimum size", fragment.id);
                    warn_on(fragment, WarningKind::ReflowOverflow);
                }
                Stamp::Replace(self.layout(fragment, erase, &result, self.text_color))
            } else {
                warn!("{}: no cached translation, stamping marker", fragment.id);
                warn_on(fragment, WarningKind::MissingCacheEntry);
                let text = format!("{UNTRANSLATED_MARKER} {}", fragment.raw_text);
                let result = self.engine.fit(fragment, &text, fonts);
                Stamp::Marker(self.layout(fragment, erase, &result, self.marker_color))
            };

            if let Some(text) = stamp.text() {
                let face = fonts.face(text.face);
                let missing: String = text
                    .lines
                    .iter()
                    .flat_map(|l| face.missing_chars(&l.text))
                    .fold(String::new(), |mut acc, c| {
                        if !acc.contains(c) {
                            acc.push(c);
                        }
                        acc
                    });
                if !missing.is_empty() {
                    debug!("{}: {} has no glyphs for \"{missing}\"", fragment.id, face.family());
                    warn_on(fragment, WarningKind::MissingGlyphs(missing));
                }
            }
            stamps.push(stamp);
        }

        debug!("Planned page {} with {} stamps", page, stamps.len());
        (PagePlan { page, stamps }, warnings)
    }

    /// Position the wrapped lines inside the fragment's box
    fn layout(
        &self,
        fragment: &Fragment,
        erase: BoundingBox,
        result: &ReflowResult,
        color: TextColor,
    ) -> TextStamp {
        let config = self.engine.config();
        let size = result.chosen_font_size;
        let pitch = size * config.line_height_factor;
        let x = fragment.bbox.x0 + config.inset;
        let first = fragment.bbox.y0 + config.inset + size;

        let lines = result
            .wrapped_lines
            .iter()
            .enumerate()
            .map(|(i, text)| {
                #[allow(clippy::cast_precision_loss)]
                let baseline = pitch.mul_add(i as f32, first);
                TextLine {
                    text: text.clone(),
                    x,
                    baseline,
                }
            })
            .collect();

        TextStamp {
            fragment_id: fragment.id,
            erase,
            face: result.face,
            font_size: size,
            lines,
            color,
            fits: result.fits,
        }
    }
}

/// Shrink `erase` until it no longer overlaps any formula box.
///
/// Each overlapping formula is cut away along whichever side keeps the
/// largest area. `None` when nothing of the box is left.
fn clear_of_formulas(mut erase: BoundingBox, formulas: &[BoundingBox]) -> Option<BoundingBox> {
    for formula in formulas {
        if !erase.intersects(formula) {
            continue;
        }

        let candidates = [
            BoundingBox { y1: formula.y0, ..erase },
            BoundingBox { y0: formula.y1, ..erase },
            BoundingBox { x1: formula.x0, ..erase },
            BoundingBox { x0: formula.x1, ..erase },
        ];
        erase = candidates
            .into_iter()
            .filter(|c| c.width() > 0.0 && c.height() > 0.0)
            .max_by(|a, b| a.area().total_cmp(&b.area()))?;
    }
    Some(erase)
}

impl Default for Assembler {
    fn default() -> Self {
        Self::from_config(ReflowEngine::default(), &RenderConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::classify::Classifier;
    use crate::config::Lang;
    use crate::reflow::{Face, StandardFont};

    fn cache(dir: &tempfile::TempDir) -> TranslationCache {
        TranslationCache::open(
            dir.path().join("cache.json"),
            Lang::new("en"),
            Lang::new("ru"),
            false,
        )
    }

    fn store() -> FragmentStore {
        let mut store = FragmentStore::from_pages(
            "digest",
            vec![
                vec![
                    Fragment::new(
                        FragmentId::new(0, 0),
                        BoundingBox::new(50.0, 100.0, 250.0, 130.0),
                        12.0,
                        "Helvetica",
                        "Hello world",
                    ),
                    Fragment::new(
                        FragmentId::new(0, 1),
                        BoundingBox::new(50.0, 150.0, 150.0, 165.0),
                        10.0,
                        "CMMI10",
                        "x = α + β",
                    ),
                ],
                vec![Fragment::new(
                    FragmentId::new(1, 0),
                    BoundingBox::new(72.0, 72.0, 300.0, 100.0),
                    11.0,
                    "Helvetica",
                    "Nobody translated this",
                )],
            ],
        );
        store.classify_with(&Classifier::default());
        store
    }

    #[test]
    fn test_formula_is_preserved_and_prose_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        let store = store();
        cache.put(store.fragments_on(0)[0].cache_key(), "Hello world", "Privet mir");
        cache.put(store.fragments_on(1)[0].cache_key(), "Nobody translated this", "Nikto");

        let doc = Assembler::default().assemble(&store, &cache, &FontSet::default(), &PageSelection::all(2));
        assert_eq!(doc.page_count, 2);
        assert_eq!(doc.replaced(), 2);
        assert_eq!(doc.preserved(), 1);
        assert_eq!(doc.marked(), 0);
        assert!(doc.warnings.is_empty());

        let page0 = doc.plan_for(0).unwrap();
        assert_eq!(page0.stamps[1], Stamp::Preserve(FragmentId::new(0, 1)));
    }

    #[test]
    fn test_baselines() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        let store = store();
        let fragment = &store.fragments_on(0)[0];
        cache.put(fragment.cache_key(), "Hello world", "one two three four five six seven eight nine ten eleven twelve");

        let assembler = Assembler::new(ReflowEngine::default(), TextColor::black(), TextColor::dark_red());
        let doc = assembler.assemble(&store, &cache, &FontSet::default(), &PageSelection::all(2));
        let Stamp::Replace(stamp) = &doc.plan_for(0).unwrap().stamps[0] else {
            panic!("expected a replacement");
        };

        assert!(stamp.lines.len() > 1);
        assert_eq!(stamp.erase, fragment.bbox.outset(ERASE_PADDING));
        let size = stamp.font_size;
        assert!((stamp.lines[0].x - 50.0).abs() < f32::EPSILON);
        assert!((stamp.lines[0].baseline - (100.0 + size)).abs() < 1e-4);
        let pitch = stamp.lines[1].baseline - stamp.lines[0].baseline;
        assert!((pitch - size * 1.2).abs() < 1e-4);
        assert_eq!(stamp.color, TextColor::black());
    }

    #[test]
    fn test_missing_entry_gets_marker() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        let store = store();

        let doc = Assembler::default().assemble(&store, &cache, &FontSet::default(), &PageSelection::all(2));
        assert_eq!(doc.marked(), 2);
        assert_eq!(
            doc.warnings
                .iter()
                .filter(|w| w.kind == WarningKind::MissingCacheEntry)
                .count(),
            2
        );

        let Stamp::Marker(stamp) = &doc.plan_for(1).unwrap().stamps[0] else {
            panic!("expected a marker");
        };
        let drawn: Vec<&str> = stamp.lines.iter().map(|l| l.text.as_str()).collect();
        assert!(drawn.join(" ").starts_with(UNTRANSLATED_MARKER));
        assert_eq!(stamp.color, TextColor::dark_red());
    }

    #[test]
    fn test_only_selected_pages_are_planned() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        let store = store();
        let selection = PageSelection::parse("2", 2).unwrap();

        let doc = Assembler::default().assemble(&store, &cache, &FontSet::default(), &selection);
        assert_eq!(doc.pages.len(), 1);
        assert!(doc.plan_for(0).is_none());
        assert!(doc.plan_for(1).unwrap().has_text());
    }

    #[test]
    fn test_overflow_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        let store = FragmentStore::from_pages(
            "digest",
            vec![vec![Fragment::new(
                FragmentId::new(0, 0),
                BoundingBox::new(0.0, 0.0, 40.0, 8.0),
                10.0,
                "Helvetica",
                "Tiny box here",
            )]],
        );
        cache.put(
            store.fragments_on(0)[0].cache_key(),
            "Tiny box here",
            "A translation that cannot possibly fit into such a tiny box",
        );

        let doc = Assembler::default().assemble(&store, &cache, &FontSet::default(), &PageSelection::all(1));
        assert_eq!(doc.warnings.len(), 1);
        assert_eq!(doc.warnings[0].kind, WarningKind::ReflowOverflow);
        assert!(!doc.stamps().next().unwrap().text().unwrap().fits);
    }

    fn prose_over_formula() -> FragmentStore {
        let mut store = FragmentStore::from_pages(
            "digest",
            vec![vec![
                Fragment::new(
                    FragmentId::new(0, 0),
                    BoundingBox::new(72.0, 100.0, 300.0, 112.0),
                    10.0,
                    "",
                    "The loss is defined as follows",
                ),
                Fragment::new(
                    FragmentId::new(0, 1),
                    BoundingBox::new(72.0, 112.5, 300.0, 124.0),
                    10.0,
                    "",
                    "L = x + y",
                ),
            ]],
        );
        store.classify_with(&Classifier::default());
        store
    }

    #[test]
    fn test_erase_stops_at_neighbouring_formula() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        let store = prose_over_formula();
        assert!(store.fragments_on(0)[1].is_formula);
        cache.put(
            store.fragments_on(0)[0].cache_key(),
            "The loss is defined as follows",
            "Die Verlustfunktion ist wie folgt definiert, mit einer sehr langen Erklaerung dazu",
        );

        let doc = Assembler::default().assemble(&store, &cache, &FontSet::default(), &PageSelection::all(1));
        let formula = store.fragments_on(0)[1].bbox;
        let stamp = doc.stamps().find_map(Stamp::text).unwrap();

        assert!(!stamp.erase.intersects(&formula));
        assert!((stamp.erase.y1 - formula.y0).abs() < f32::EPSILON);
        assert!((stamp.erase.y0 - 99.0).abs() < f32::EPSILON);
        assert_eq!(doc.preserved(), 1);
    }

    #[test]
    fn test_prose_inside_formula_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        let mut store = FragmentStore::from_pages(
            "digest",
            vec![vec![
                Fragment::new(
                    FragmentId::new(0, 0),
                    BoundingBox::new(50.0, 50.0, 400.0, 200.0),
                    10.0,
                    "",
                    "∑ α_i β_i = γ",
                ),
                Fragment::new(
                    FragmentId::new(0, 1),
                    BoundingBox::new(100.0, 100.0, 200.0, 110.0),
                    10.0,
                    "",
                    "where the sum runs over samples",
                ),
            ]],
        );
        store.classify_with(&Classifier::default());
        cache.put(store.fragments_on(0)[1].cache_key(), "where the sum runs over samples", "wo");

        let doc = Assembler::default().assemble(&store, &cache, &FontSet::default(), &PageSelection::all(1));
        assert_eq!(doc.preserved(), 2);
        assert!(!doc.plan_for(0).unwrap().has_text());
        assert_eq!(doc.warnings[0].kind, WarningKind::CoveredByFormula);
    }

    #[test]
    fn test_missing_glyphs_are_reported_per_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        let store = store();
        cache.put(store.fragments_on(0)[0].cache_key(), "Hello world", "Привет мир");
        cache.put(store.fragments_on(1)[0].cache_key(), "Nobody translated this", "Nikto");

        let doc = Assembler::default().assemble(&store, &cache, &FontSet::default(), &PageSelection::all(2));
        assert_eq!(doc.warnings.len(), 1);
        assert_eq!(doc.warnings[0].fragment_id, FragmentId::new(0, 0));
        assert_eq!(doc.warnings[0].kind, WarningKind::MissingGlyphs("Приветм".into()));
    }

    #[test]
    fn test_cyrillic_uses_a_face_that_covers_it() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        let store = store();
        cache.put(store.fragments_on(0)[0].cache_key(), "Hello world", "Привет мир");

        let chars = ['П', 'р', 'и', 'в', 'е', 'т', 'м', ' '];
        let font = crate::pdf::TrueTypeFont::from_bytes(crate::pdf::synthetic_font(&chars)).unwrap();
        let mut fonts = FontSet::new(Face::TrueType(std::sync::Arc::new(font)));
        fonts.push(Face::Standard(StandardFont::Helvetica));

        let doc = Assembler::default().assemble(&store, &cache, &fonts, &PageSelection::all(2));
        assert!(doc.warnings.iter().all(|w| !matches!(w.kind, WarningKind::MissingGlyphs(_))));

        let Stamp::Replace(text) = &doc.pages[0].stamps[0] else {
            panic!("expected a replacement");
        };
        assert_eq!(text.face, 0);
    }
}
