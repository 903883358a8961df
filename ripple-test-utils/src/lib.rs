//! Ripple Test Utilities
//!
//! Centralized test infrastructure for the ripple workspace:
//! - Proptest generators for records, messages and query params
//! - Fixtures for records and message frames
//! - Scripted collaborators (fetcher, transport, cache) and a harness wiring
//!   them to a [`SyncManager`]
//! - Custom assertions over cached pages

pub use ripple_cache::{
    CacheStats, EntryLifecycle, FetchRequest, InMemoryQueryCache, QueryCache, QueryFetcher,
};
pub use ripple_core::{
    Activity, CacheKey, CacheTag, ChangeDescriptor, EntityId, FetchError, InsertPosition, Page,
    Pages, ProcessingState, QueryParams, RawMessage, RawReference, RawSummary, Reviewable,
    RippleResult, SortDirection, SyncMessage, SyncRecord, Task, Timestamp, TopicSet,
    TransportError,
};
pub use ripple_sync::{
    EntryState, MessageSink, PubSub, SubscriptionToken, SyncKind, SyncManager, SyncStatsSnapshot,
    Transport,
};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// How long async helpers wait before giving up.
pub const WAIT: Duration = Duration::from_secs(2);

// ============================================================================
// SCRIPTED COLLABORATORS
// ============================================================================

/// Fetcher answering from a programmable table of records.
///
/// Requests for ids missing from the table return no record, the same as a
/// server that no longer has it. [`ScriptedFetcher::hold`] parks every fetch
/// until [`ScriptedFetcher::release`].
pub struct ScriptedFetcher<R> {
    records: Mutex<HashMap<EntityId, R>>,
    failure: Mutex<Option<String>>,
    gate: watch::Sender<bool>,
    calls: Mutex<Vec<FetchRequest>>,
}

impl<R: SyncRecord> Default for ScriptedFetcher<R> {
    fn default() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            records: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
            gate,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl<R: SyncRecord> ScriptedFetcher<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = R>) -> Self {
        let fetcher = Self::new();
        for record in records {
            fetcher.insert(record);
        }
        fetcher
    }

    pub fn insert(&self, record: R) {
        self.records
            .lock()
            .expect("fetcher records lock")
            .insert(record.id().clone(), record);
    }

    pub fn remove(&self, id: &str) {
        self.records.lock().expect("fetcher records lock").remove(id);
    }

    /// Fail every following fetch with `reason`.
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.lock().expect("fetcher failure lock") = Some(reason.into());
    }

    pub fn succeed(&self) {
        *self.failure.lock().expect("fetcher failure lock") = None;
    }

    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn calls(&self) -> Vec<FetchRequest> {
        self.calls.lock().expect("fetcher calls lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("fetcher calls lock").len()
    }
}

#[async_trait]
impl<R: SyncRecord> QueryFetcher<R> for ScriptedFetcher<R> {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<R>, FetchError> {
        self.calls
            .lock()
            .expect("fetcher calls lock")
            .push(request.clone());

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        if let Some(reason) = self.failure.lock().expect("fetcher failure lock").clone() {
            return Err(FetchError::Failed {
                ids: request.ids.clone(),
                reason,
            });
        }
        let records = self.records.lock().expect("fetcher records lock");
        Ok(request
            .ids
            .iter()
            .filter_map(|id| records.get(id).cloned())
            .collect())
    }
}

/// In-process transport counting subscribe and unsubscribe calls.
#[derive(Default)]
pub struct RecordingTransport {
    pubsub: PubSub,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
    refuse: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every following subscribe.
    pub fn refuse_subscribes(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub fn publish(&self, message: SyncMessage) -> usize {
        self.pubsub.publish(message).expect("publish")
    }

    /// Decode and publish one text frame.
    pub fn publish_json(&self, frame: &str) -> usize {
        self.publish(SyncMessage::from_json(frame).expect("valid frame"))
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    /// Subscriptions currently live.
    pub fn active(&self) -> usize {
        self.pubsub.subscription_count().expect("subscription count")
    }
}

impl Transport for RecordingTransport {
    fn subscribe(
        &self,
        topics: &TopicSet,
        sink: MessageSink,
    ) -> Result<SubscriptionToken, TransportError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        self.pubsub.subscribe(topics, sink)
    }

    fn unsubscribe(&self, token: SubscriptionToken) -> Result<(), TransportError> {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.pubsub.unsubscribe(token)
    }
}

/// In-memory cache recording writes and invalidation calls.
pub struct RecordingCache<R> {
    inner: InMemoryQueryCache<R>,
    updates: AtomicUsize,
    invalidations: Mutex<Vec<Vec<CacheTag>>>,
}

impl<R: SyncRecord> Default for RecordingCache<R> {
    fn default() -> Self {
        Self {
            inner: InMemoryQueryCache::new(),
            updates: AtomicUsize::new(0),
            invalidations: Mutex::new(Vec::new()),
        }
    }
}

impl<R: SyncRecord> RecordingCache<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache being recorded, for registration and loading.
    pub fn inner(&self) -> &InMemoryQueryCache<R> {
        &self.inner
    }

    /// `update_cached_data` calls so far.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Tag sets passed to `invalidate_tags`, in call order.
    pub fn invalidations(&self) -> Vec<Vec<CacheTag>> {
        self.invalidations
            .lock()
            .expect("invalidations lock")
            .clone()
    }
}

impl<R: SyncRecord> QueryCache<R> for RecordingCache<R> {
    fn update_cached_data<O, F>(&self, key: &CacheKey, recipe: F) -> RippleResult<Option<O>>
    where
        F: FnOnce(&mut Pages<R>) -> O,
    {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update_cached_data(key, recipe)
    }

    fn get_cache_entry(&self, key: &CacheKey) -> RippleResult<Option<Pages<R>>> {
        self.inner.get_cache_entry(key)
    }

    fn invalidate_tags(&self, tags: &[CacheTag]) -> RippleResult<Vec<CacheKey>> {
        self.invalidations
            .lock()
            .expect("invalidations lock")
            .push(tags.to_vec());
        self.inner.invalidate_tags(tags)
    }

    fn stats(&self) -> RippleResult<CacheStats> {
        self.inner.stats()
    }
}

// ============================================================================
// HARNESS
// ============================================================================

pub type HarnessManager<K> = SyncManager<
    K,
    RecordingCache<<K as SyncKind>::Record>,
    RecordingTransport,
    ScriptedFetcher<<K as SyncKind>::Record>,
>;

/// A [`SyncManager`] wired to scripted collaborators.
pub struct SyncHarness<K: SyncKind> {
    pub cache: Arc<RecordingCache<K::Record>>,
    pub transport: Arc<RecordingTransport>,
    pub fetcher: Arc<ScriptedFetcher<K::Record>>,
    pub manager: HarnessManager<K>,
}

impl<K: SyncKind> SyncHarness<K> {
    pub fn new(kind: K) -> Self {
        let cache = Arc::new(RecordingCache::new());
        let transport = Arc::new(RecordingTransport::new());
        let fetcher = Arc::new(ScriptedFetcher::new());
        let manager = SyncManager::new(
            kind,
            Arc::clone(&cache),
            Arc::clone(&transport),
            Arc::clone(&fetcher),
        );
        Self {
            cache,
            transport,
            fetcher,
            manager,
        }
    }

    /// Register a consumer of the entry for `params` and hand it to the
    /// manager, as a query cache does on entry creation.
    pub fn open(&self, params: &QueryParams) -> CacheKey {
        let key = self.manager.cache_key(params);
        let lifecycle = self
            .cache
            .inner()
            .register(&key, self.manager.tags(params))
            .expect("register entry");
        self.manager
            .on_cache_entry_created(key.clone(), params.clone(), lifecycle)
            .expect("entry created");
        key
    }

    /// Resolve the entry's initial fetch with a single page.
    pub fn load(&self, key: &CacheKey, items: Vec<K::Record>) {
        self.cache
            .inner()
            .resolve(key, vec![Page::single(items)])
            .expect("resolve entry");
    }

    /// Drop one consumer. Returns true when the entry was evicted.
    pub fn close(&self, key: &CacheKey) -> bool {
        self.cache.inner().release(key).expect("release entry")
    }

    pub fn publish(&self, frame: &str) -> usize {
        self.transport.publish_json(frame)
    }

    /// Ids of the entry's records across pages, in order.
    pub fn ids(&self, key: &CacheKey) -> Vec<EntityId> {
        self.cache
            .get_cache_entry(key)
            .expect("read entry")
            .map(|pages| {
                pages
                    .iter()
                    .flat_map(|page| page.items.iter().map(|item| item.id().clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn stats(&self) -> SyncStatsSnapshot {
        self.manager.stats()
    }

    /// Wait until the entry reaches `state`. A closed entry may already be
    /// gone from the registry.
    pub async fn wait_for_state(&self, key: &CacheKey, state: EntryState) -> bool {
        eventually(|| match self.manager.entry_state(key).expect("entry state") {
            Some(current) => current == state,
            None => state == EntryState::Closed,
        })
        .await
    }

    /// Wait until `count` messages have been fully handled.
    pub async fn wait_processed(&self, count: u64) -> bool {
        eventually(|| self.stats().messages_processed >= count).await
    }
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Give spawned tasks a chance to run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for ripple types.

    use super::*;
    use proptest::prelude::*;

    /// Scope ids drawn from a small pool so generated messages and params
    /// actually overlap.
    pub const SCOPE_POOL: &[&str] = &["scope1", "scope2", "scope3", "scope4"];

    pub const TYPE_POOL: &[&str] = &["comment", "checklist", "status", "assignee", "version.publish"];

    const PROJECT_POOL: &[&str] = &["demo", "other"];

    const STATUS_POOL: &[&str] = &["queued", "finished"];

    const ACTIVITY_TYPE_POOL: &[&str] = &["comment", "status", "assignee"];

    pub const TOPIC_POOL: &[&str] = &[
        "activity.created",
        "activity.updated",
        "activity.deleted",
        "inbox.message",
        "reviewable.process",
        "entity.task.created",
        "entity.task.deleted",
        "entity.folder.changed",
    ];

    pub fn arb_entity_id() -> impl Strategy<Value = EntityId> {
        "[a-z][a-z0-9]{0,7}"
    }

    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(chrono::Utc::now)
        })
    }

    fn arb_pool_subset(pool: &'static [&'static str]) -> impl Strategy<Value = Vec<String>> {
        proptest::sample::subsequence(pool, 0..=pool.len())
            .prop_map(|picked| picked.into_iter().map(str::to_string).collect())
    }

    pub fn arb_query_params() -> impl Strategy<Value = QueryParams> {
        (
            proptest::option::of(arb_pool_subset(SCOPE_POOL)),
            proptest::option::of(arb_pool_subset(TYPE_POOL)),
        )
            .prop_map(|(scope, types)| {
                let mut params = QueryParams::new("demo");
                if let Some(scope) = scope.filter(|ids| !ids.is_empty()) {
                    params = params.with_entity_ids(scope);
                }
                if let Some(types) = types.filter(|types| !types.is_empty()) {
                    params = params.with_types(types);
                }
                params
            })
    }

    /// Wire messages with any field possibly missing.
    pub fn arb_raw_message() -> impl Strategy<Value = RawMessage> {
        (
            proptest::sample::select(TOPIC_POOL),
            proptest::option::of(proptest::sample::select(PROJECT_POOL)),
            proptest::option::of(arb_entity_id()),
            proptest::option::of(proptest::sample::select(TYPE_POOL)),
            arb_pool_subset(SCOPE_POOL),
            proptest::option::of(proptest::sample::select(STATUS_POOL)),
        )
            .prop_map(|(topic, project, primary, entity_type, origins, status)| RawMessage {
                topic: topic.to_string(),
                project: project.map(str::to_string),
                entity_ids: None,
                timestamp: None,
                status: status.map(str::to_string),
                summary: Some(RawSummary {
                    primary_entity_id: primary,
                    entity_type: entity_type.map(str::to_string),
                    references: origins
                        .into_iter()
                        .map(|id| RawReference {
                            entity_id: Some(id),
                            entity_type: None,
                            reference_type: Some("origin".to_string()),
                        })
                        .collect(),
                }),
            })
    }

    pub fn arb_activity() -> impl Strategy<Value = Activity> {
        (
            arb_entity_id(),
            proptest::sample::select(SCOPE_POOL),
            proptest::sample::select(ACTIVITY_TYPE_POOL),
            arb_timestamp(),
        )
            .prop_map(|(id, scope, activity_type, created_at)| Activity {
                activity_id: id,
                activity_type: activity_type.to_string(),
                entity_id: scope.to_string(),
                entity_type: "version".to_string(),
                body: String::new(),
                author: None,
                created_at,
                updated_at: None,
                data: None,
            })
    }

    /// Activities with distinct ids.
    pub fn arb_activity_feed(max: usize) -> impl Strategy<Value = Vec<Activity>> {
        proptest::collection::vec(arb_activity(), 0..=max).prop_map(|mut activities| {
            let mut seen = std::collections::HashSet::new();
            activities.retain(|activity| seen.insert(activity.activity_id.clone()));
            activities
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built records and message frames.

    use super::*;
    use chrono::{TimeZone, Utc};

    pub const PROJECT: &str = "demo";

    /// 2024-05-01 10:`minute`:00 UTC.
    pub fn at_minute(minute: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0)
            .single()
            .expect("valid fixture timestamp")
    }

    pub fn activity(id: &str, scope: &str, activity_type: &str, minute: u32) -> Activity {
        Activity {
            activity_id: id.to_string(),
            activity_type: activity_type.to_string(),
            entity_id: scope.to_string(),
            entity_type: "version".to_string(),
            body: String::new(),
            author: Some("ana".to_string()),
            created_at: at_minute(minute),
            updated_at: None,
            data: None,
        }
    }

    pub fn comment(id: &str, scope: &str, minute: u32) -> Activity {
        Activity {
            body: format!("comment {id}"),
            ..activity(id, scope, "comment", minute)
        }
    }

    /// A comment whose body holds checklist items.
    pub fn checklist_comment(id: &str, scope: &str, minute: u32) -> Activity {
        Activity {
            body: "- [ ] fix the roto\n- [x] grade".to_string(),
            ..activity(id, scope, "comment", minute)
        }
    }

    pub fn task(id: &str, folder: &str, label: &str) -> Task {
        Task {
            task_id: id.to_string(),
            folder_id: folder.to_string(),
            name: id.to_string(),
            label: Some(label.to_string()),
            task_type: "compositing".to_string(),
            status: "not_started".to_string(),
            assignees: vec![],
            updated_at: None,
        }
    }

    pub fn reviewable(file: &str, version: &str, minute: u32, status: Option<&str>) -> Reviewable {
        Reviewable {
            file_id: file.to_string(),
            version_id: version.to_string(),
            filename: format!("{file}.mov"),
            label: None,
            media_type: Some("video".to_string()),
            processing: status.map(|status| ProcessingState {
                status: status.to_string(),
                description: None,
                progress: None,
            }),
            created_at: at_minute(minute),
        }
    }

    /// Builder for JSON text frames as the server publishes them.
    #[derive(Debug, Clone)]
    pub struct Frame {
        raw: RawMessage,
    }

    impl Frame {
        pub fn new(topic: &str) -> Self {
            Self {
                raw: RawMessage {
                    topic: topic.to_string(),
                    project: Some(PROJECT.to_string()),
                    entity_ids: None,
                    timestamp: None,
                    status: None,
                    summary: Some(RawSummary::default()),
                },
            }
        }

        fn summary(&mut self) -> &mut RawSummary {
            self.raw.summary.get_or_insert_with(RawSummary::default)
        }

        pub fn project(mut self, project: &str) -> Self {
            self.raw.project = Some(project.to_string());
            self
        }

        pub fn primary(mut self, id: &str) -> Self {
            self.summary().primary_entity_id = Some(id.to_string());
            self
        }

        pub fn entity_type(mut self, entity_type: &str) -> Self {
            self.summary().entity_type = Some(entity_type.to_string());
            self
        }

        pub fn origin(mut self, id: &str) -> Self {
            self.summary().references.push(RawReference {
                entity_id: Some(id.to_string()),
                entity_type: None,
                reference_type: Some("origin".to_string()),
            });
            self
        }

        pub fn entity_ids(mut self, ids: &[&str]) -> Self {
            self.raw.entity_ids = Some(ids.iter().map(|id| id.to_string()).collect());
            self
        }

        pub fn status(mut self, status: &str) -> Self {
            self.raw.status = Some(status.to_string());
            self
        }

        pub fn json(&self) -> String {
            serde_json::to_string(&self.raw).expect("frame serializes")
        }

        pub fn message(&self) -> SyncMessage {
            SyncMessage::from_json(&self.json()).expect("frame decodes")
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over cached pages.

    use super::*;

    pub fn ids<R: SyncRecord>(pages: &Pages<R>) -> Vec<EntityId> {
        pages
            .iter()
            .flat_map(|page| page.items.iter().map(|item| item.id().clone()))
            .collect()
    }

    /// Assert the entry holds exactly `expected`, in order.
    pub fn assert_ids<R: SyncRecord>(pages: &Pages<R>, expected: &[&str]) {
        let actual = ids(pages);
        assert_eq!(actual, expected, "cached ids differ");
    }

    /// Assert no id appears twice across all pages.
    pub fn assert_unique_ids<R: SyncRecord>(pages: &Pages<R>) {
        let all = ids(pages);
        let unique: std::collections::HashSet<&EntityId> = all.iter().collect();
        assert_eq!(unique.len(), all.len(), "duplicate ids in entry: {all:?}");
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_frame_builds_decodable_message() {
        let message = Frame::new("activity.created")
            .primary("c")
            .entity_type("comment")
            .origin("scope1")
            .message();
        assert_eq!(message.project, PROJECT);
        assert_eq!(message.primary_entity_id().unwrap(), "c");
        assert_eq!(message.scope_ids(), vec!["scope1"]);
    }

    #[test]
    fn test_checklist_fixture_derives_checklist() {
        let record = checklist_comment("c", "scope1", 0);
        assert!(record.record_types().contains(&"checklist".to_string()));
        assert!(!comment("d", "scope1", 0)
            .record_types()
            .contains(&"checklist".to_string()));
    }

    #[tokio::test]
    async fn test_scripted_fetcher_answers_and_fails() {
        let fetcher = ScriptedFetcher::with_records([comment("c", "scope1", 3)]);
        let request = FetchRequest::single(PROJECT, "c", vec![]);

        let found = fetcher.fetch(&request).await.unwrap();
        assert_eq!(found.len(), 1);

        fetcher.remove("c");
        assert!(fetcher.fetch(&request).await.unwrap().is_empty());

        fetcher.fail_with("503");
        assert!(fetcher.fetch(&request).await.is_err());
        assert_eq!(fetcher.call_count(), 3);
    }

    #[tokio::test]
    async fn test_held_fetch_waits_for_release() {
        let fetcher = Arc::new(ScriptedFetcher::with_records([comment("c", "scope1", 3)]));
        fetcher.hold();
        let pending = {
            let fetcher = Arc::clone(&fetcher);
            tokio::spawn(async move {
                fetcher
                    .fetch(&FetchRequest::single(PROJECT, "c", vec![]))
                    .await
            })
        };
        settle().await;
        assert!(!pending.is_finished());

        fetcher.release();
        let found = pending.await.unwrap().unwrap();
        assert_eq!(found.len(), 1);
    }
}
