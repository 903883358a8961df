//! Query parameters, cache identity and invalidation tags.

use crate::identity::{EntityId, ProjectName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Prefix of the wildcard tag id attached to every entry of a kind within a
/// project (`LIST:<project>`).
pub const LIST_TAG_ID: &str = "LIST";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    /// Reverse-chronological feeds.
    #[default]
    Descending,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ascending => "asc",
            Self::Descending => "desc",
        }
    }
}

/// Parameters that produced a cached query.
///
/// `None` for `entity_ids` or `types` means "no restriction".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    pub project: ProjectName,
    #[serde(default)]
    pub entity_ids: Option<BTreeSet<EntityId>>,
    #[serde(default)]
    pub types: Option<BTreeSet<String>>,
    #[serde(default)]
    pub sort: SortDirection,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub page_size: Option<u32>,
}

impl QueryParams {
    pub fn new(project: impl Into<ProjectName>) -> Self {
        Self {
            project: project.into(),
            entity_ids: None,
            types: None,
            sort: SortDirection::default(),
            cursor: None,
            page_size: None,
        }
    }

    pub fn with_entity_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<EntityId>,
    {
        self.entity_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_sort(mut self, sort: SortDirection) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Scoping ids, empty when unscoped.
    pub fn scope_ids(&self) -> impl Iterator<Item = &EntityId> {
        self.entity_ids.iter().flatten()
    }

    /// Cache identity for these params under a cache kind. Pagination
    /// (cursor, page size) does not take part.
    pub fn cache_key(&self, kind: &str) -> CacheKey {
        CacheKey {
            kind: kind.to_string(),
            project: self.project.clone(),
            entity_ids: self.entity_ids.clone(),
            types: self.types.clone(),
            sort: self.sort,
        }
    }

    /// Tags an entry created from these params carries.
    pub fn tags(&self, tag_type: &str) -> Vec<CacheTag> {
        let mut tags = vec![CacheTag::list(tag_type, &self.project)];
        tags.extend(self.scope_ids().map(|id| CacheTag::new(tag_type, id.clone())));
        tags
    }
}

/// Identity of one cache entry.
///
/// Compared field by field, so no id or type value can collide with another
/// set or with the unrestricted case. The `Display` form is for logs only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    kind: String,
    project: ProjectName,
    entity_ids: Option<BTreeSet<EntityId>>,
    types: Option<BTreeSet<String>>,
    sort: SortDirection,
}

impl CacheKey {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn project(&self) -> &ProjectName {
        &self.project
    }
}

fn write_set(f: &mut fmt::Formatter<'_>, set: &Option<BTreeSet<String>>) -> fmt::Result {
    match set {
        Some(values) => write!(f, "{values:?}"),
        None => f.write_str("*"),
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:ids=", self.kind, self.project)?;
        write_set(f, &self.entity_ids)?;
        f.write_str(":types=")?;
        write_set(f, &self.types)?;
        write!(f, ":sort={}", self.sort.as_str())
    }
}

/// Coarse invalidation tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheTag {
    #[serde(rename = "type")]
    pub tag_type: String,
    pub id: String,
}

impl CacheTag {
    pub fn new(tag_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            tag_type: tag_type.into(),
            id: id.into(),
        }
    }

    /// Wildcard tag covering every entry of `tag_type` in `project`.
    pub fn list(tag_type: impl Into<String>, project: &str) -> Self {
        Self::new(tag_type, format!("{LIST_TAG_ID}:{project}"))
    }

    pub fn is_list(&self) -> bool {
        self.id
            .strip_prefix(LIST_TAG_ID)
            .is_some_and(|rest| rest.starts_with(':'))
    }
}

impl fmt::Display for CacheTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tag_type, self.id)
    }
}
