//! Extracted text fragments, decoupled from the PDF libraries.
//!
//! A fragment is one paragraph-level block of text with its position on the
//! page. Fragments are produced by the extractor, classified once, and then
//! read by both phases of the pipeline without being modified.

mod selection;
mod store;

pub use selection::PageSelection;
pub use store::FragmentStore;

use serde::{Deserialize, Serialize};

use crate::cache::CacheKey;

/// Bounding box in top-left-origin page coordinates (points)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub const fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    /// Smallest box containing both
    pub const fn union(self, other: Self) -> Self {
        Self {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    /// Grow the box by `pad` on every side
    pub fn outset(self, pad: f32) -> Self {
        Self {
            x0: self.x0 - pad,
            y0: self.y0 - pad,
            x1: self.x1 + pad,
            y1: self.y1 + pad,
        }
    }

    /// Whether the interiors overlap; touching edges do not count
    pub fn intersects(&self, other: &Self) -> bool {
        self.x0 < other.x1 && other.x0 < self.x1 && self.y0 < other.y1 && other.y0 < self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Convert to array format [x0, y0, x1, y1]
    pub const fn as_array(self) -> [f32; 4] {
        [self.x0, self.y0, self.x1, self.y1]
    }
}

/// Stable identifier of a fragment: zero-based page and position on that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FragmentId {
    pub page: usize,
    pub index: usize,
}

impl FragmentId {
    pub const fn new(page: usize, index: usize) -> Self {
        Self { page, index }
    }
}

impl std::fmt::Display for FragmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "p{}#{}", self.page, self.index)
    }
}

/// A block of text extracted from one page.
///
/// Equality compares the fragment's identity: page, bounding box and raw
/// text. Size, family, id and classification are derived data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub id: FragmentId,
    pub page_index: usize,
    pub bbox: BoundingBox,
    pub font_size: f32,
    pub font_family: String,
    pub raw_text: String,
    #[serde(default)]
    pub is_formula: bool,
}

impl Fragment {
    /// Create an unclassified fragment
    pub fn new(
        id: FragmentId,
        bbox: BoundingBox,
        font_size: f32,
        font_family: impl Into<String>,
        raw_text: impl Into<String>,
    ) -> Self {
        Self {
            id,
            page_index: id.page,
            bbox,
            font_size,
            font_family: font_family.into(),
            raw_text: raw_text.into(),
            is_formula: false,
        }
    }

    /// Key of this fragment's text in the translation cache
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::from_text(&self.raw_text)
    }
}

impl PartialEq for Fragment {
    fn eq(&self, other: &Self) -> bool {
        self.page_index == other.page_index
            && self.bbox == other.bbox
            && self.raw_text == other.raw_text
    }
}
