//! Fallback invalidator.
//!
//! When no correct incremental patch is possible the entry, and any sibling
//! entry sharing its scope, is marked stale through tag invalidation so its
//! consumers re-fetch.

use ripple_cache::QueryCache;
use ripple_core::{CacheKey, CacheTag, EntityId, QueryParams, RippleResult, SyncRecord};
use tracing::warn;

/// Tags to invalidate for an entry built from `params`, given the scope of
/// the message that could not be applied.
///
/// Scoped entries invalidate the scope ids the message touched, or all of
/// their scope ids when the message named none of them. Unscoped entries
/// invalidate the kind's `LIST` tag for their project.
pub fn select_tags(tag_type: &str, params: &QueryParams, message_scope: &[EntityId]) -> Vec<CacheTag> {
    let Some(scope) = &params.entity_ids else {
        return vec![CacheTag::list(tag_type, &params.project)];
    };
    let touched: Vec<CacheTag> = scope
        .iter()
        .filter(|id| message_scope.contains(id))
        .map(|id| CacheTag::new(tag_type, id.clone()))
        .collect();
    if touched.is_empty() {
        scope
            .iter()
            .map(|id| CacheTag::new(tag_type, id.clone()))
            .collect()
    } else {
        touched
    }
}

/// Invalidate `tags` and report the stale keys.
pub fn invalidate<R, C>(cache: &C, tags: &[CacheTag], reason: &str) -> RippleResult<Vec<CacheKey>>
where
    R: SyncRecord,
    C: QueryCache<R>,
{
    let keys = cache.invalidate_tags(tags)?;
    warn!(
        reason = reason,
        tags = ?tags,
        invalidated = keys.len(),
        "Fallback invalidation"
    );
    Ok(keys)
}
