use mupdf::TextPageOptions;
use tracing::debug;

use crate::error::{Error, Result};
use crate::fragment::{BoundingBox, Fragment, FragmentId, FragmentStore, PageSelection};
use super::document::PdfDocument;
use super::page_index::PageIndex;
use super::resources::page_has_images;

/// Estimated font sizes are clamped to this range
const MIN_ESTIMATED_SIZE: f32 = 4.0;
const MAX_ESTIMATED_SIZE: f32 = 72.0;

/// MuPDF line boxes run slightly smaller than the nominal font size
const LINE_HEIGHT_TO_SIZE: f32 = 1.18;

/// A paragraph block before it gets an id
#[derive(Debug, Clone)]
struct RawBlock {
    text: String,
    bbox: BoundingBox,
    font_size: f32,
}

fn bbox_from_quad(quad: &mupdf::Quad) -> BoundingBox {
    let x0 = quad.ul.x.min(quad.ur.x).min(quad.ll.x).min(quad.lr.x);
    let y0 = quad.ul.y.min(quad.ur.y).min(quad.ll.y).min(quad.lr.y);
    let x1 = quad.ul.x.max(quad.ur.x).max(quad.ll.x).max(quad.lr.x);
    let y1 = quad.ul.y.max(quad.ur.y).max(quad.ll.y).max(quad.lr.y);
    BoundingBox::new(x0, y0, x1, y1)
}

fn grow(current: Option<BoundingBox>, next: BoundingBox) -> Option<BoundingBox> {
    Some(current.map_or(next, |bbox| bbox.union(next)))
}

/// Paragraph-level text extraction with MuPDF.
pub struct TextExtractor<'a> {
    doc: &'a PdfDocument,
}

impl<'a> TextExtractor<'a> {
    pub const fn new(doc: &'a PdfDocument) -> Self {
        Self { doc }
    }

    /// Extract every page into an unclassified store
    pub fn extract_store(&self) -> Result<FragmentStore> {
        self.extract_fragments(&PageSelection::all(self.doc.page_count()))
    }

    /// Extract the selected pages. Other pages are present but empty.
    pub fn extract_fragments(&self, selection: &PageSelection) -> Result<FragmentStore> {
        let mut pages = Vec::with_capacity(self.doc.page_count());
        for page_num in 0..self.doc.page_count() {
            if selection.contains(page_num) {
                pages.push(self.extract_page(page_num)?);
            } else {
                pages.push(Vec::new());
            }
        }

        let store = FragmentStore::from_pages(self.doc.digest(), pages);
        debug!(
            "Extracted {} fragments from {} pages",
            store.len(),
            selection.len()
        );
        Ok(store)
    }

    /// Selected pages with no extractable text that draw a raster image.
    ///
    /// These are usually scans: nothing on them can be translated, so they
    /// pass through unchanged.
    pub fn image_only_pages(&self, store: &FragmentStore, selection: &PageSelection) -> Result<Vec<usize>> {
        let empty: Vec<usize> = selection
            .iter()
            .filter(|&page| store.fragments_on(page).is_empty())
            .collect();
        if empty.is_empty() {
            return Ok(empty);
        }

        let doc = lopdf::Document::load_mem(self.doc.bytes())
            .map_err(|e| Error::Lopdf(format!("Failed to load PDF: {e}")))?;
        let page_ids = doc.get_pages();

        let mut pages = Vec::new();
        for page in empty {
            let number = PageIndex::try_from_page_num(page, self.doc.page_count())?.as_lopdf_page_number();
            let Some(&page_id) = page_ids.get(&number) else {
                continue;
            };
            if page_has_images(&doc, page_id)? {
                debug!("Page {page} has images but no text");
                pages.push(page);
            }
        }
        Ok(pages)
    }

    /// Fragments of one page in top-to-bottom order.
    ///
    /// Each MuPDF block is one paragraph: its lines are joined with spaces,
    /// and a line ending in a hyphen is joined to the next without one.
    pub fn extract_page(&self, page_num: usize) -> Result<Vec<Fragment>> {
        let page_index = PageIndex::try_from_page_num(page_num, self.doc.page_count())?;

        let doc = self.doc.open_document()?;
        let page = doc.load_page(page_index.into()).map_err(|e| {
            Error::PdfTextExtraction {
                page: page_num,
                reason: format!("Failed to load page: {e}"),
            }
        })?;

        let text_page = page.to_text_page(TextPageOptions::empty()).map_err(|e| {
            Error::PdfTextExtraction {
                page: page_num,
                reason: format!("Failed to get text page: {e}"),
            }
        })?;

        let mut blocks = Vec::new();

        for block in text_page.blocks() {
            let mut block_text = String::new();
            let mut block_bbox: Option<BoundingBox> = None;
            let mut line_heights: Vec<f32> = Vec::new();

            for line in block.lines() {
                let mut line_text = String::new();
                let mut line_bbox: Option<BoundingBox> = None;

                for text_char in line.chars() {
                    if let Some(c) = text_char.char() {
                        line_text.push(c);
                    }
                    let char_bbox = bbox_from_quad(&text_char.quad());
                    line_bbox = grow(line_bbox, char_bbox);
                    block_bbox = grow(block_bbox, char_bbox);
                }

                let line_trimmed = line_text.trim();
                if line_trimmed.is_empty() {
                    continue;
                }

                if let Some(lb) = line_bbox {
                    line_heights.push(lb.height());
                }

                if block_text.ends_with('-') {
                    block_text.pop();
                } else if !block_text.is_empty() {
                    block_text.push(' ');
                }
                block_text.push_str(line_trimmed);
            }

            let text = block_text.trim();
            if text.is_empty() {
                continue;
            }

            if let Some(bbox) = block_bbox {
                blocks.push(RawBlock {
                    text: text.to_string(),
                    bbox,
                    font_size: estimate_font_size(&line_heights, bbox),
                });
            }
        }

        let fragments = merge_hyphenated_blocks(blocks)
            .into_iter()
            .enumerate()
            .map(|(index, block)| {
                Fragment::new(
                    FragmentId::new(page_num, index),
                    block.bbox,
                    block.font_size,
                    String::new(),
                    block.text,
                )
            })
            .collect();

        Ok(fragments)
    }
}

/// Font size from the average line height of a block
#[allow(clippy::cast_precision_loss)]
fn estimate_font_size(line_heights: &[f32], bbox: BoundingBox) -> f32 {
    let avg = if line_heights.is_empty() {
        bbox.height()
    } else {
        line_heights.iter().sum::<f32>() / line_heights.len() as f32
    };
    (avg * LINE_HEIGHT_TO_SIZE).clamp(MIN_ESTIMATED_SIZE, MAX_ESTIMATED_SIZE)
}

/// Merge blocks that MuPDF split in the middle of a hyphenated word.
///
/// Blocks are sorted top to bottom first. A block ending in `-` absorbs the
/// next one when that starts lowercase (or is a single short word) and
/// the two are vertically close.
fn merge_hyphenated_blocks(mut blocks: Vec<RawBlock>) -> Vec<RawBlock> {
    blocks.sort_by(|a, b| a.bbox.y0.total_cmp(&b.bbox.y0));

    let mut merged: Vec<RawBlock> = Vec::with_capacity(blocks.len());
    let mut iter = blocks.into_iter().peekable();

    while let Some(mut current) = iter.next() {
        while let Some(next) = iter.peek() {
            let current_ends_hyphen = current.text.trim_end().ends_with('-');

            let next_trimmed = next.text.trim_start();
            let next_starts_lower = next_trimmed.chars().next().is_some_and(char::is_lowercase);
            let next_is_fragment = next_trimmed.chars().count() < 20 && !next_trimmed.contains(' ');

            let vertical_gap = (next.bbox.y0 - current.bbox.y1).abs();
            let avg_height = (current.bbox.height() + next.bbox.height()) / 2.0;
            let close_vertically = vertical_gap < avg_height * 3.0;

            if !(current_ends_hyphen && (next_starts_lower || next_is_fragment) && close_vertically) {
                break;
            }

            let trimmed = current.text.trim_end();
            let without_hyphen = trimmed.strip_suffix('-').unwrap_or(trimmed);
            current.text = format!("{}{}", without_hyphen, next.text.trim_start());
            current.bbox = current.bbox.union(next.bbox);
            current.font_size = current.font_size.min(next.font_size);
            iter.next();
        }

        merged.push(current);
    }

    merged
}
