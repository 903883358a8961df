//! Ripple Cache - query cache contract and patch engine
//!
//! The patch engine applies normalized changes to an entry's cached pages.
//! The contracts describe the external query cache the synchronizer drives,
//! and [`InMemoryQueryCache`] implements them for tests and tools.

pub mod in_memory;
pub mod lifecycle;
pub mod patch;
pub mod traits;

pub use in_memory::InMemoryQueryCache;
pub use lifecycle::{EntryLifecycle, EntrySignals, LoadSignal, LoadState, RemovalSignal};
pub use patch::{
    apply_change, apply_delete, apply_insert_front, apply_insert_or_update, apply_insert_sorted,
    apply_record_patch, apply_update, contains_record, find_record, PatchOutcome,
};
pub use traits::{CacheStats, FetchRequest, QueryCache, QueryFetcher};
