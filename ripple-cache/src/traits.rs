//! Query cache and fetcher contracts.
//!
//! The synchronizer never owns cached data. It reads and mutates entries only
//! through [`QueryCache`], and obtains authoritative records only through
//! [`QueryFetcher`].

use async_trait::async_trait;
use ripple_core::{
    CacheKey, CacheTag, EntityId, FetchError, Pages, ProjectName, RippleResult, SyncRecord,
};

/// Targeted fetch of a minimal set of records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub project: ProjectName,
    /// Records to fetch; normally a single id.
    pub ids: Vec<EntityId>,
    /// Scoping ids the records are expected under.
    pub scope_ids: Vec<EntityId>,
}

impl FetchRequest {
    pub fn single(
        project: impl Into<ProjectName>,
        id: impl Into<EntityId>,
        scope_ids: Vec<EntityId>,
    ) -> Self {
        Self {
            project: project.into(),
            ids: vec![id.into()],
            scope_ids,
        }
    }
}

/// Source of authoritative records (force-refetch semantics: never served
/// from the cache being patched).
#[async_trait]
pub trait QueryFetcher<R: SyncRecord>: Send + Sync {
    /// Fetch the requested records. Ids the server no longer knows are
    /// simply absent from the result.
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<R>, FetchError>;
}

/// Contract of the external query cache.
///
/// All operations are synchronous: a patch is applied within one call and is
/// never observable half-done.
///
/// # Implementation Requirements
///
/// - `update_cached_data` must not call `recipe` for an entry that is absent
///   or has no data yet
/// - `invalidate_tags` marks every entry carrying any of the tags stale and
///   returns their keys
pub trait QueryCache<R: SyncRecord>: Send + Sync {
    /// Mutate an entry's pages in place. Returns `None` when there was no
    /// data to mutate.
    fn update_cached_data<O, F>(&self, key: &CacheKey, recipe: F) -> RippleResult<Option<O>>
    where
        F: FnOnce(&mut Pages<R>) -> O;

    /// Snapshot of an entry's current pages.
    fn get_cache_entry(&self, key: &CacheKey) -> RippleResult<Option<Pages<R>>>;

    /// Coarse invalidation. Returns the keys marked stale.
    fn invalidate_tags(&self, tags: &[CacheTag]) -> RippleResult<Vec<CacheKey>>;

    fn stats(&self) -> RippleResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads that found loaded data.
    pub hits: u64,
    /// Reads of absent or not yet loaded entries.
    pub misses: u64,
    /// Entries currently registered.
    pub entry_count: u64,
    /// Entries currently marked stale.
    pub stale_count: u64,
    /// In-place updates applied.
    pub updates: u64,
    /// Entries marked stale by tag invalidation, cumulative.
    pub invalidations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_fetch_request_single() {
        let request = FetchRequest::single("demo", "c", vec!["scope1".to_string()]);
        assert_eq!(request.ids, vec!["c"]);
        assert_eq!(request.scope_ids, vec!["scope1"]);
    }
}
