/// Read-side queries for the presentation layer
///
/// `QueryLayer` holds no state of its own. Infinite scroll keeps its position
/// in a [`PageCursor`] owned by the caller.
use std::path::PathBuf;

use super::library::Library;
use super::options::{Options, DEFAULT_PAGE_SIZE};
use crate::error::Result;

/// Position of an infinite-scroll view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCursor {
    offset: u64,
    exhausted: bool,
}

impl PageCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows already handed out
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The last page came back short; there is nothing more to load
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Start over, e.g. after a new discovery run
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueryLayer<'a> {
    library: &'a Library,
    page_size: u32,
    newest_first: bool,
}

impl<'a> QueryLayer<'a> {
    pub fn new(library: &'a Library) -> Self {
        Self {
            library,
            page_size: DEFAULT_PAGE_SIZE,
            newest_first: true,
        }
    }

    /// Page size and sort order taken from the user's options
    pub fn from_options(library: &'a Library, options: &Options) -> Self {
        Self::new(library)
            .with_page_size(options.page_size)
            .newest_first(options.sort_desc)
    }

    /// A page size of zero is treated as one
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn newest_first(mut self, newest_first: bool) -> Self {
        self.newest_first = newest_first;
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// One page starting at row `offset`
    pub fn page(&self, offset: u64) -> Result<Vec<PathBuf>> {
        self.library
            .query_page(offset, self.page_size, self.newest_first)
    }

    /// The page after `cursor`, advancing it. Returns an empty page once the
    /// end has been reached.
    pub fn next_page(&self, cursor: &mut PageCursor) -> Result<Vec<PathBuf>> {
        if cursor.exhausted {
            return Ok(Vec::new());
        }

        let page = self.page(cursor.offset)?;
        cursor.offset += page.len() as u64;
        cursor.exhausted = page.len() < self.page_size as usize;
        Ok(page)
    }

    /// Files with a tag whose name contains `keyword`. The keyword may use
    /// SQL LIKE wildcards. An empty keyword returns the first page.
    pub fn search(&self, keyword: &str) -> Result<Vec<PathBuf>> {
        self.search_pattern(&format!("%{}%", keyword.trim()))
    }

    /// Files with a tag matching the raw LIKE `pattern`
    pub fn search_pattern(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        self.library.query_by_tag_substring(pattern)
    }
}
