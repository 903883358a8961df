//! Ripple Sync - real-time cache synchronizer
//!
//! Listens to topic-routed messages and keeps cached query results
//! consistent with server state: relevant messages become direct patches or
//! targeted fetches merged into the cache, and anything that cannot be
//! patched correctly falls back to tag invalidation.
//!
//! Each cache entry is driven by a [`SyncMachine`], run by [`SyncManager`].

pub mod coordinator;
pub mod fallback;
pub mod kinds;
pub mod machine;
pub mod manager;
pub mod relevance;
pub mod stats;
pub mod telemetry;
pub mod transport;
pub mod ws;

pub use coordinator::{matches_types, merge, MergeStep};
pub use fallback::select_tags;
pub use kinds::{ActivityFeed, MessagePlan, ReviewableProcessing, SyncKind, TaskFolder};
pub use machine::{Discard, Effect, EntryState, Input, SyncMachine};
pub use manager::SyncManager;
pub use relevance::{evaluate, Verdict};
pub use stats::{SyncStats, SyncStatsSnapshot};
pub use telemetry::{init_tracing, TelemetryError};
pub use transport::{MessageSink, PubSub, SubscriptionToken, Transport};
pub use ws::spawn_ws_transport;
