//! Stamping planned text over the original pages.
//!
//! # Coordinate System
//!
//! PDF uses a **bottom-left origin** coordinate system where:
//! - (0, 0) is at the bottom-left corner of the page
//! - Y increases upward
//!
//! Fragments carry MuPDF's **top-left origin** coordinates, so every
//! position is converted when written:
//! ```text
//! pdf_x = media_box.x0 + x
//! pdf_y = media_box.y1 - y
//! ```
//!
//! # Overlay Strategy
//!
//! Existing content streams are never edited. Each page with something to
//! draw gets its original content wrapped in `q`/`Q` (so stray graphics
//! state cannot leak into the overlay) followed by one new stream that:
//! 1. paints white rectangles over every replaced region
//! 2. draws the reflowed lines on top, each stamp clipped to its rectangle
//!
//! Erase rectangles never reach into formula regions (see
//! [`crate::assemble`]), so with the clip nothing is drawn over a formula.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

use crate::assemble::{AssembledDocument, PagePlan, TextStamp};
use crate::error::{Error, Result};
use crate::reflow::{Face, FontSet, StandardFont};
use super::page_index::PageIndex;
use super::resources::{MAX_INHERITANCE_DEPTH, inherited_attribute, resolve_dict_object, resolve_resources};

/// Fallback when a page has no usable MediaBox (US Letter)
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Resource name of face `index` on stamped pages
fn font_resource_name(index: usize) -> String {
    format!("FReflow{index}")
}

/// Renders an [`AssembledDocument`] over the source PDF with lopdf.
pub struct PdfStamper<'a> {
    fonts: &'a FontSet,
}

impl<'a> PdfStamper<'a> {
    pub const fn new(fonts: &'a FontSet) -> Self {
        Self { fonts }
    }

    /// Produce the output document. The source bytes are not modified; pages
    /// without a plan (or with nothing to draw) are carried over unchanged.
    pub fn render(&self, source: &[u8], assembled: &AssembledDocument) -> Result<Vec<u8>> {
        let mut doc = Document::load_mem(source)
            .map_err(|e| Error::Lopdf(format!("Failed to load PDF: {e}")))?;

        let pages = doc.get_pages();
        let mut embedded: BTreeMap<usize, ObjectId> = BTreeMap::new();

        for plan in assembled.pages.iter().filter(|p| p.has_text()) {
            let page_index = PageIndex::try_from_page_num(plan.page, pages.len())?;
            let page_id = *pages
                .get(&page_index.as_lopdf_page_number())
                .ok_or(Error::PdfInvalidPage {
                    page: plan.page,
                    total: pages.len(),
                })?;

            let faces: BTreeSet<usize> = plan
                .stamps
                .iter()
                .filter_map(|s| s.text())
                .map(|s| self.face_index(s.face))
                .collect();

            for &face in &faces {
                let font_id = match embedded.get(&face) {
                    Some(&id) => id,
                    None => {
                        let id = self.embed_face(&mut doc, face);
                        embedded.insert(face, id);
                        id
                    }
                };
                add_font_to_page(&mut doc, page_id, &font_resource_name(face), font_id)
                    .map_err(|e| stamp_error(plan.page, &e))?;
            }

            let media_box = get_media_box(&doc, page_id, MAX_INHERITANCE_DEPTH);
            let content = self.overlay_content(plan, &media_box);
            append_content_to_page(&mut doc, page_id, &content)
                .map_err(|e| stamp_error(plan.page, &e))?;

            debug!("Stamped page {} ({} bytes of content)", plan.page, content.len());
        }

        let mut output = Vec::new();
        doc.save_to(&mut output)
            .map_err(|e| Error::PdfSave(format!("Failed to save PDF: {e}")))?;

        Ok(output)
    }

    fn face_index(&self, face: usize) -> usize {
        if face < self.fonts.len() { face } else { 0 }
    }

    fn embed_face(&self, doc: &mut Document, face: usize) -> ObjectId {
        match self.fonts.face(face) {
            Face::Standard(font) => doc.add_object(Dictionary::from_iter([
                ("Type", Object::Name(b"Font".to_vec())),
                ("Subtype", Object::Name(b"Type1".to_vec())),
                ("BaseFont", Object::Name(font.base_font().as_bytes().to_vec())),
                ("Encoding", Object::Name(b"WinAnsiEncoding".to_vec())),
            ])),
            Face::TrueType(font) => font.embed(doc),
        }
    }

    /// Hex string operand for `text` in the encoding of `face`
    fn encode(&self, face: usize, text: &str) -> String {
        match self.fonts.face(face) {
            Face::Standard(_) => text.chars().fold(String::with_capacity(text.len() * 2), |mut acc, c| {
                let _ = write!(acc, "{:02X}", StandardFont::encode(c).unwrap_or(b'?'));
                acc
            }),
            Face::TrueType(font) => font.encode_hex(text),
        }
    }

    fn overlay_content(&self, plan: &PagePlan, media_box: &[f32; 4]) -> String {
        let stamps: Vec<&TextStamp> = plan.stamps.iter().filter_map(|s| s.text()).collect();
        let left = media_box[0];
        let top = media_box[3];

        let mut content = String::from("q\n");

        // PHASE 1: cover every replaced region
        content.push_str("1 1 1 rg\n");
        for stamp in &stamps {
            let erase = stamp.erase;
            let _ = writeln!(
                content,
                "{:.2} {:.2} {:.2} {:.2} re f",
                left + erase.x0,
                top - erase.y1,
                erase.width(),
                erase.height()
            );
        }

        // PHASE 2: text, clipped to its own erased region, filled (OCR
        // layers leave invisible mode 3 behind)
        for stamp in &stamps {
            let face = self.face_index(stamp.face);
            let erase = stamp.erase;
            content.push_str("q\n");
            let _ = writeln!(
                content,
                "{:.2} {:.2} {:.2} {:.2} re W n",
                left + erase.x0,
                top - erase.y1,
                erase.width(),
                erase.height()
            );
            content.push_str("0 Tr\n");
            let _ = writeln!(content, "{}", stamp.color.fill_operator());
            for line in &stamp.lines {
                content.push_str("BT\n");
                let _ = writeln!(content, "/{} {:.2} Tf", font_resource_name(face), stamp.font_size);
                let _ = writeln!(content, "{:.2} {:.2} Td", left + line.x, top - line.baseline);
                let _ = writeln!(content, "<{}> Tj", self.encode(face, &line.text));
                content.push_str("ET\n");
            }
            content.push_str("Q\n");
        }

        content.push_str("Q\n");
        content
    }
}

fn stamp_error(page: usize, error: &Error) -> Error {
    Error::PdfStamp {
        page,
        reason: error.to_string(),
    }
}

/// Wrap the page's existing content in `q`/`Q` and append `content` after it.
fn append_content_to_page(doc: &mut Document, page_id: ObjectId, content: &str) -> Result<()> {
    let save_id = doc.add_object(Object::Stream(Stream::new(Dictionary::new(), b"q\n".to_vec())));
    let restore_id = doc.add_object(Object::Stream(Stream::new(Dictionary::new(), b"Q\n".to_vec())));
    let overlay_id = doc.add_object(Object::Stream(Stream::new(
        Dictionary::new(),
        content.as_bytes().to_vec(),
    )));

    let page = doc
        .get_object_mut(page_id)
        .map_err(|e| Error::Lopdf(format!("Failed to get page: {e}")))?;

    let Object::Dictionary(dict) = page else {
        return Err(Error::Lopdf("Page is not a dictionary".to_string()));
    };

    let existing: Vec<Object> = match dict.get(b"Contents").ok().cloned() {
        Some(Object::Reference(id)) => vec![Object::Reference(id)],
        Some(Object::Array(arr)) => arr,
        _ => Vec::new(),
    };

    let mut contents = Vec::with_capacity(existing.len() + 3);
    contents.push(Object::Reference(save_id));
    contents.extend(existing);
    contents.push(Object::Reference(restore_id));
    contents.push(Object::Reference(overlay_id));
    dict.set("Contents", Object::Array(contents));

    Ok(())
}

/// Register `font_id` under `name` in the page's own Font resources.
///
/// Inherited or referenced Resources are copied inline onto the page so the
/// change cannot leak to other pages sharing them.
fn add_font_to_page(doc: &mut Document, page_id: ObjectId, name: &str, font_id: ObjectId) -> Result<()> {
    let mut resources = resolve_resources(doc, page_id)?;

    let mut fonts = resources
        .get(b"Font")
        .ok()
        .and_then(|obj| resolve_dict_object(doc, obj))
        .unwrap_or_else(Dictionary::new);

    fonts.set(name, Object::Reference(font_id));
    resources.set("Font", Object::Dictionary(fonts));

    let page = doc
        .get_object_mut(page_id)
        .map_err(|e| Error::Lopdf(format!("Failed to get page: {e}")))?;

    if let Object::Dictionary(page_dict) = page {
        page_dict.set("Resources", Object::Dictionary(resources));
    }

    Ok(())
}

fn get_media_box(doc: &Document, page_id: ObjectId, depth: usize) -> [f32; 4] {
    let media_box = doc
        .get_dictionary(page_id)
        .ok()
        .and_then(|dict| inherited_attribute(doc, dict, b"MediaBox", depth))
        .and_then(|obj| match obj {
            Object::Reference(id) => doc.get_object(id).ok().cloned(),
            other => Some(other),
        });

    if let Some(Object::Array(arr)) = media_box {
        let values: Vec<f32> = arr
            .iter()
            .filter_map(|o| match o {
                #[allow(clippy::cast_precision_loss)]
                Object::Integer(i) => Some(*i as f32),
                Object::Real(r) => Some(*r),
                _ => None,
            })
            .collect();

        if let [x0, y0, x1, y1] = values[..] {
            return [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)];
        }
    }

    DEFAULT_MEDIA_BOX
}
