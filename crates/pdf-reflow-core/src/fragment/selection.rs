use crate::error::{Error, Result};

/// Set of pages to process, stored as sorted zero-based indices.
///
/// Parsed from one-based, inclusive ranges such as `1-5,8` or `3-`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSelection {
    pages: Vec<usize>,
}

impl PageSelection {
    /// Every page of a document
    pub fn all(page_count: usize) -> Self {
        Self {
            pages: (0..page_count).collect(),
        }
    }

    /// Parse a one-based range list, clamped to `page_count`.
    ///
    /// Ranges past the end of the document are dropped; a selection that
    /// ends up empty is an error.
    pub fn parse(input: &str, page_count: usize) -> Result<Self> {
        let bad = || Error::PageSelection(input.to_string());
        let mut pages = Vec::new();

        for part in input.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(bad());
            }

            let (start, end) = match part.split_once('-') {
                Some((a, b)) => {
                    let start = parse_page(a).ok_or_else(bad)?;
                    let end = if b.trim().is_empty() {
                        page_count
                    } else {
                        parse_page(b).ok_or_else(bad)?
                    };
                    (start, end)
                }
                None => {
                    let page = parse_page(part).ok_or_else(bad)?;
                    (page, page)
                }
            };

            if start > end {
                return Err(bad());
            }

            let end = end.min(page_count);
            // one-based inclusive -> zero-based
            pages.extend((start..=end).map(|p| p - 1));
        }

        pages.sort_unstable();
        pages.dedup();

        if pages.is_empty() {
            return Err(bad());
        }
        Ok(Self { pages })
    }

    pub fn contains(&self, page: usize) -> bool {
        self.pages.binary_search(&page).is_ok()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.pages
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.pages.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

fn parse_page(s: &str) -> Option<usize> {
    s.trim().parse::<usize>().ok().filter(|&p| p >= 1)
}
