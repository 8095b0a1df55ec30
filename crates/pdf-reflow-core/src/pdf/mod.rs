//! PDF input and output.
//!
//! MuPDF reads text with its positions; lopdf writes the stamped copy.

mod document;
mod font;
mod overlay;
mod page_index;
mod resources;
mod text;

pub use document::PdfDocument;
pub use font::TrueTypeFont;
#[cfg(test)]
pub(crate) use font::synthetic_font;
pub use overlay::PdfStamper;
pub use page_index::PageIndex;
pub use text::TextExtractor;
