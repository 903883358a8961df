//! In-memory query cache.
//!
//! Reference implementation of [`QueryCache`]: entries are keyed by
//! [`CacheKey`], ref-counted per consumer, tagged for coarse invalidation and
//! evicted when the last consumer releases them. Stale keys are published on
//! a broadcast channel so consumers can re-fetch on their own schedule.

use crate::lifecycle::{EntryLifecycle, EntrySignals, LoadState};
use crate::traits::{CacheStats, QueryCache};
use ripple_core::{CacheError, CacheKey, CacheTag, Pages, RippleResult, SyncRecord};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info};

const STALE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
struct CacheSlot<R> {
    pages: Option<Pages<R>>,
    tags: Vec<CacheTag>,
    consumers: usize,
    stale: bool,
    signals: EntrySignals,
}

impl<R> CacheSlot<R> {
    fn new(tags: Vec<CacheTag>) -> Self {
        Self {
            pages: None,
            tags,
            consumers: 0,
            stale: false,
            signals: EntrySignals::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    updates: AtomicU64,
    invalidations: AtomicU64,
}

/// Memory-resident query cache.
pub struct InMemoryQueryCache<R> {
    entries: RwLock<HashMap<CacheKey, CacheSlot<R>>>,
    stale_tx: broadcast::Sender<CacheKey>,
    counters: Counters,
}

impl<R: SyncRecord> Default for InMemoryQueryCache<R> {
    fn default() -> Self {
        let (stale_tx, _) = broadcast::channel(STALE_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            stale_tx,
            counters: Counters::default(),
        }
    }
}

impl<R: SyncRecord> InMemoryQueryCache<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer of `key`, creating the entry on first use.
    ///
    /// `tags` are recorded only when the entry is created.
    pub fn register(&self, key: &CacheKey, tags: Vec<CacheTag>) -> RippleResult<EntryLifecycle> {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        let slot = entries.entry(key.clone()).or_insert_with(|| {
            debug!(key = %key, "Cache entry created");
            CacheSlot::new(tags)
        });
        slot.consumers += 1;
        Ok(slot.signals.subscribe())
    }

    /// Store the result of the (re-)fetch of `key` and mark it fresh.
    pub fn resolve(&self, key: &CacheKey, pages: Pages<R>) -> RippleResult<()> {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        let slot = entries
            .get_mut(key)
            .ok_or_else(|| CacheError::EntryNotFound {
                key: key.to_string(),
            })?;
        slot.pages = Some(pages);
        slot.stale = false;
        if slot.signals.load_state() != LoadState::Loaded {
            slot.signals.mark_loaded();
        }
        Ok(())
    }

    /// Record a failed initial fetch. Data already loaded is kept.
    pub fn reject(&self, key: &CacheKey, reason: impl Into<String>) -> RippleResult<()> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        let slot = entries.get(key).ok_or_else(|| CacheError::EntryNotFound {
            key: key.to_string(),
        })?;
        if slot.pages.is_none() {
            slot.signals.mark_failed(reason);
        }
        Ok(())
    }

    /// Release one consumer. Evicts the entry when none remain and returns
    /// whether it was evicted.
    pub fn release(&self, key: &CacheKey) -> RippleResult<bool> {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        let Some(slot) = entries.get_mut(key) else {
            return Ok(false);
        };
        slot.consumers = slot.consumers.saturating_sub(1);
        if slot.consumers > 0 {
            return Ok(false);
        }
        if let Some(slot) = entries.remove(key) {
            slot.signals.mark_removed();
            info!(key = %key, "Cache entry evicted");
        }
        Ok(true)
    }

    pub fn consumers(&self, key: &CacheKey) -> RippleResult<usize> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(entries.get(key).map(|slot| slot.consumers).unwrap_or(0))
    }

    pub fn is_stale(&self, key: &CacheKey) -> RippleResult<bool> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(entries.get(key).map(|slot| slot.stale).unwrap_or(false))
    }

    pub fn tags(&self, key: &CacheKey) -> RippleResult<Vec<CacheTag>> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(entries
            .get(key)
            .map(|slot| slot.tags.clone())
            .unwrap_or_default())
    }

    /// Stream of keys marked stale by tag invalidation.
    pub fn subscribe_stale(&self) -> broadcast::Receiver<CacheKey> {
        self.stale_tx.subscribe()
    }
}

impl<R: SyncRecord> QueryCache<R> for InMemoryQueryCache<R> {
    fn update_cached_data<O, F>(&self, key: &CacheKey, recipe: F) -> RippleResult<Option<O>>
    where
        F: FnOnce(&mut Pages<R>) -> O,
    {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        let Some(pages) = entries.get_mut(key).and_then(|slot| slot.pages.as_mut()) else {
            return Ok(None);
        };
        let output = recipe(pages);
        self.counters.updates.fetch_add(1, Ordering::Relaxed);
        Ok(Some(output))
    }

    fn get_cache_entry(&self, key: &CacheKey) -> RippleResult<Option<Pages<R>>> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        let pages = entries.get(key).and_then(|slot| slot.pages.clone());
        let counter = if pages.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(pages)
    }

    fn invalidate_tags(&self, tags: &[CacheTag]) -> RippleResult<Vec<CacheKey>> {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        let mut invalidated = Vec::new();
        for (key, slot) in entries.iter_mut() {
            if slot.tags.iter().any(|tag| tags.contains(tag)) {
                slot.stale = true;
                invalidated.push(key.clone());
            }
        }
        drop(entries);

        invalidated.sort();
        for key in &invalidated {
            // No receivers is fine.
            let _ = self.stale_tx.send(key.clone());
        }
        self.counters
            .invalidations
            .fetch_add(invalidated.len() as u64, Ordering::Relaxed);
        debug!(tags = ?tags, invalidated = invalidated.len(), "Tags invalidated");
        Ok(invalidated)
    }

    fn stats(&self) -> RippleResult<CacheStats> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            entry_count: entries.len() as u64,
            stale_count: entries.values().filter(|slot| slot.stale).count() as u64,
            updates: self.counters.updates.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
        })
    }
}
