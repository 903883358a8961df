//! Paginated query results as held by a cache entry.

use serde::{Deserialize, Serialize};

/// Page boundary metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    #[serde(default)]
    pub start_cursor: Option<String>,
    #[serde(default)]
    pub end_cursor: Option<String>,
}

/// One fetched page of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<R> {
    pub items: Vec<R>,
    pub page_info: PageInfo,
}

impl<R> Page<R> {
    pub fn new(items: Vec<R>, page_info: PageInfo) -> Self {
        Self { items, page_info }
    }

    /// A complete, single-page result.
    pub fn single(items: Vec<R>) -> Self {
        Self::new(items, PageInfo::default())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Ordered pages of one cache entry.
pub type Pages<R> = Vec<Page<R>>;
