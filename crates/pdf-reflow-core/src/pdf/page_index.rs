//! Zero-based page numbers checked against a document's page count.
//!
//! MuPDF addresses pages with `i32` from zero, lopdf with `u32` from one.
//! A `PageIndex` can only be built from an in-range page, so both
//! conversions are infallible.

use std::fmt;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageIndex(i32);

impl PageIndex {
    /// Validate `page_num` against `total_pages`
    pub fn try_from_page_num(page_num: usize, total_pages: usize) -> Result<Self, Error> {
        let invalid = || Error::PdfInvalidPage {
            page: page_num,
            total: total_pages,
        };

        if page_num >= total_pages {
            return Err(invalid());
        }

        i32::try_from(page_num).map(Self).map_err(|_| invalid())
    }

    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Key into `lopdf::Document::get_pages`
    pub const fn as_lopdf_page_number(self) -> u32 {
        (self.0 + 1).cast_unsigned()
    }
}

impl From<PageIndex> for i32 {
    fn from(index: PageIndex) -> Self {
        index.0
    }
}

impl fmt::Display for PageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0 + 1)
    }
}
