//! Subscription lifecycle manager.
//!
//! [`SyncManager`] is the thin runner around [`SyncMachine`]. Every cache
//! entry gets one driver task that owns its machine and consumes inputs from
//! a single channel, so an entry's inputs are handled one at a time and in
//! arrival order. Inputs come from:
//!
//! - a lifecycle watcher racing `loaded` against `removed`
//! - a pump forwarding transport messages for the entry's subscription
//! - targeted fetch tasks reporting their result
//!
//! A fetch that outlives its entry finds the channel closed and its result is
//! dropped. Each registration gets a generation number so a closing driver
//! never unregisters a newer entry under the same key. A generation created
//! while its predecessor is still shutting down holds its inputs until the
//! predecessor reports `Closed`, so two subscriptions for one key never
//! coexist.

use crate::fallback;
use crate::kinds::SyncKind;
use crate::machine::{Discard, Effect, EntryState, Input, SyncMachine};
use crate::stats::{SyncStats, SyncStatsSnapshot};
use crate::transport::Transport;
use ripple_cache::{
    apply_change, EntryLifecycle, FetchRequest, PatchOutcome, QueryCache, QueryFetcher,
    RemovalSignal,
};
use ripple_core::{
    CacheError, CacheKey, CacheTag, ChangeDescriptor, EntityId, PatchError, QueryParams,
    RippleResult, SyncMessage,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

struct EntryHandle<R> {
    generation: u64,
    inputs: mpsc::UnboundedSender<Input<R>>,
    state: watch::Receiver<EntryState>,
    removed: RemovalSignal,
    removing: bool,
}

impl<R> EntryHandle<R> {
    /// Whether a new consumer may share this entry.
    ///
    /// The published state lags queued inputs, so a pending removal counts
    /// as shutting down even while the state still reads `Active`.
    fn reusable(&self) -> bool {
        let state = *self.state.borrow();
        matches!(state, EntryState::Pending | EntryState::Active)
            && !self.removing
            && !self.removed.is_removed()
    }
}

struct Shared<K: SyncKind, C, T, F> {
    kind: Arc<K>,
    cache: Arc<C>,
    transport: Arc<T>,
    fetcher: Arc<F>,
    stats: Arc<SyncStats>,
    registry: Mutex<HashMap<CacheKey, EntryHandle<K::Record>>>,
    next_generation: AtomicU64,
}

impl<K: SyncKind, C, T, F> Shared<K, C, T, F> {
    fn forget(&self, key: &CacheKey, generation: u64) {
        match self.registry.lock() {
            Ok(mut registry) => {
                if registry.get(key).map(|handle| handle.generation) == Some(generation) {
                    registry.remove(key);
                }
            }
            Err(_) => error!(key = %key, "Sync registry lock poisoned"),
        }
    }
}

/// Keeps cache entries of one kind in sync with the transport.
pub struct SyncManager<K: SyncKind, C, T, F> {
    shared: Arc<Shared<K, C, T, F>>,
}

impl<K: SyncKind, C, T, F> Clone for SyncManager<K, C, T, F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, C, T, F> SyncManager<K, C, T, F>
where
    K: SyncKind,
    C: QueryCache<K::Record> + 'static,
    T: Transport + 'static,
    F: QueryFetcher<K::Record> + 'static,
{
    pub fn new(kind: K, cache: Arc<C>, transport: Arc<T>, fetcher: Arc<F>) -> Self {
        Self {
            shared: Arc::new(Shared {
                kind: Arc::new(kind),
                cache,
                transport,
                fetcher,
                stats: Arc::new(SyncStats::new()),
                registry: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn kind(&self) -> &K {
        &self.shared.kind
    }

    /// Cache key of an entry of this kind built from `params`.
    pub fn cache_key(&self, params: &QueryParams) -> CacheKey {
        params.cache_key(self.shared.kind.name())
    }

    /// Tags an entry of this kind built from `params` must carry.
    pub fn tags(&self, params: &QueryParams) -> Vec<CacheTag> {
        params.tags(self.shared.kind.tag_type())
    }

    pub fn stats(&self) -> SyncStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Start synchronizing a newly created cache entry.
    ///
    /// A key already pending or active is reused: no second machine and no
    /// second subscription is created. A key whose entry is being removed
    /// gets a new generation that starts once the old one has closed.
    pub fn on_cache_entry_created(
        &self,
        key: CacheKey,
        params: QueryParams,
        lifecycle: EntryLifecycle,
    ) -> RippleResult<()> {
        let mut registry = self
            .shared
            .registry
            .lock()
            .map_err(|_| CacheError::LockPoisoned)?;
        let predecessor = match registry.get(&key) {
            Some(handle) if handle.reusable() => {
                let state = *handle.state.borrow();
                debug!(key = %key, state = %state, "Entry already synchronized");
                return Ok(());
            }
            Some(handle) => Some(handle.state.clone()),
            None => None,
        };

        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed);
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(EntryState::Pending);
        registry.insert(
            key.clone(),
            EntryHandle {
                generation,
                inputs: inputs_tx.clone(),
                state: state_rx,
                removed: lifecycle.removed.clone(),
                removing: false,
            },
        );
        drop(registry);

        info!(key = %key, generation = generation, kind = self.shared.kind.name(), "Entry created");
        let driver = EntryDriver {
            shared: Arc::clone(&self.shared),
            machine: SyncMachine::new(Arc::clone(&self.shared.kind), params),
            key,
            generation,
            inputs: inputs_tx.clone(),
            state: state_tx,
        };
        tokio::spawn(watch_lifecycle(lifecycle, inputs_tx));
        tokio::spawn(driver.run(predecessor, inputs_rx));
        Ok(())
    }

    /// Signal eviction of `key`. Safe to call at any time and repeatedly.
    pub fn on_cache_entry_removed(&self, key: &CacheKey) -> RippleResult<()> {
        let mut registry = self
            .shared
            .registry
            .lock()
            .map_err(|_| CacheError::LockPoisoned)?;
        if let Some(handle) = registry.get_mut(key) {
            handle.removing = true;
            // A closed channel means the driver is already gone.
            let _ = handle.inputs.send(Input::Removed);
        }
        Ok(())
    }

    pub fn entry_state(&self, key: &CacheKey) -> RippleResult<Option<EntryState>> {
        let registry = self
            .shared
            .registry
            .lock()
            .map_err(|_| CacheError::LockPoisoned)?;
        Ok(registry.get(key).map(|handle| *handle.state.borrow()))
    }

    /// Observe state transitions of the current entry under `key`.
    pub fn watch_state(&self, key: &CacheKey) -> RippleResult<Option<watch::Receiver<EntryState>>> {
        let registry = self
            .shared
            .registry
            .lock()
            .map_err(|_| CacheError::LockPoisoned)?;
        Ok(registry.get(key).map(|handle| handle.state.clone()))
    }

    /// Entries not yet closed.
    pub fn entry_count(&self) -> RippleResult<usize> {
        let registry = self
            .shared
            .registry
            .lock()
            .map_err(|_| CacheError::LockPoisoned)?;
        Ok(registry.len())
    }
}

/// Race initial data against removal, then wait for removal.
async fn watch_lifecycle<R>(lifecycle: EntryLifecycle, inputs: mpsc::UnboundedSender<Input<R>>) {
    let EntryLifecycle {
        mut loaded,
        mut removed,
    } = lifecycle;

    tokio::select! {
        biased;
        _ = removed.wait() => {
            let _ = inputs.send(Input::Removed);
            return;
        }
        outcome = loaded.wait() => {
            let input = match outcome {
                Ok(()) => Input::DataLoaded,
                Err(reason) => Input::LoadFailed { reason },
            };
            if inputs.send(input).is_err() {
                return;
            }
        }
    }

    removed.wait().await;
    let _ = inputs.send(Input::Removed);
}

/// Forward transport messages for one subscription, in delivery order.
async fn pump<R>(
    mut messages: mpsc::UnboundedReceiver<SyncMessage>,
    inputs: mpsc::UnboundedSender<Input<R>>,
    stats: Arc<SyncStats>,
) {
    while let Some(message) = messages.recv().await {
        stats.record_received();
        if inputs.send(Input::Message(message)).is_err() {
            break;
        }
    }
}

async fn fetch_task<R, F>(
    fetcher: Arc<F>,
    stats: Arc<SyncStats>,
    inputs: mpsc::UnboundedSender<Input<R>>,
    request: FetchRequest,
    scope: Vec<EntityId>,
) where
    R: ripple_core::SyncRecord,
    F: QueryFetcher<R>,
{
    let result = fetcher.fetch(&request).await;
    let ids = request.ids.clone();
    if inputs
        .send(Input::FetchResolved {
            request,
            scope,
            result,
        })
        .is_err()
    {
        stats.record_inactive();
        debug!(ids = ?ids, "Fetch result for closed entry discarded");
    }
}

struct EntryDriver<K: SyncKind, C, T, F> {
    shared: Arc<Shared<K, C, T, F>>,
    machine: SyncMachine<K>,
    key: CacheKey,
    generation: u64,
    inputs: mpsc::UnboundedSender<Input<K::Record>>,
    state: watch::Sender<EntryState>,
}

impl<K, C, T, F> EntryDriver<K, C, T, F>
where
    K: SyncKind,
    C: QueryCache<K::Record> + 'static,
    T: Transport + 'static,
    F: QueryFetcher<K::Record> + 'static,
{
    async fn run(
        mut self,
        predecessor: Option<watch::Receiver<EntryState>>,
        mut inputs: mpsc::UnboundedReceiver<Input<K::Record>>,
    ) {
        if let Some(mut previous) = predecessor {
            debug!(key = %self.key, generation = self.generation, "Waiting for previous entry to close");
            // A dropped sender means the previous driver already exited.
            let _ = previous.wait_for(|state| *state == EntryState::Closed).await;
        }

        while let Some(input) = inputs.recv().await {
            let is_message = matches!(input, Input::Message(_));
            self.process(input);
            if is_message {
                self.shared.stats.record_processed();
            }

            let state = self.machine.state();
            self.state.send_replace(state);
            if state == EntryState::Closed {
                break;
            }
        }
        self.shared.forget(&self.key, self.generation);
        info!(key = %self.key, generation = self.generation, "Entry closed");
    }

    /// Step the machine and run effects until no follow-up input remains.
    fn process(&mut self, input: Input<K::Record>) {
        let mut queue = VecDeque::from([input]);
        while let Some(input) = queue.pop_front() {
            if let Input::FetchResolved { result, .. } = &input {
                self.shared.stats.record_fetch_resolved();
                if result.is_err() {
                    self.shared.stats.record_fetch_failure();
                }
            }

            let before = self.machine.state();
            let name = input.name();
            let effects = self.machine.step(input);
            let after = self.machine.state();
            if before != after {
                info!(
                    key = %self.key,
                    from = %before,
                    to = %after,
                    input = name,
                    "Entry state changed"
                );
            }

            for effect in effects {
                if let Some(next) = self.execute(effect) {
                    queue.push_back(next);
                }
            }
        }
    }

    fn execute(&self, effect: Effect<K::Record>) -> Option<Input<K::Record>> {
        match effect {
            Effect::Subscribe(topics) => {
                let (sink, messages) = mpsc::unbounded_channel();
                match self.shared.transport.subscribe(&topics, sink) {
                    Ok(token) => {
                        debug!(key = %self.key, token = %token, topics = %topics, "Subscribed");
                        tokio::spawn(pump(
                            messages,
                            self.inputs.clone(),
                            Arc::clone(&self.shared.stats),
                        ));
                        Some(Input::Subscribed(token))
                    }
                    Err(err) => Some(Input::SubscribeFailed {
                        reason: err.to_string(),
                    }),
                }
            }
            Effect::Unsubscribe(token) => {
                if let Err(err) = self.shared.transport.unsubscribe(token) {
                    warn!(key = %self.key, token = %token, error = %err, "Unsubscribe failed");
                }
                Some(Input::Unsubscribed)
            }
            Effect::Fetch { request, scope } => {
                self.shared.stats.record_fetch_issued();
                debug!(key = %self.key, ids = ?request.ids, "Targeted fetch issued");
                tokio::spawn(fetch_task(
                    Arc::clone(&self.shared.fetcher),
                    Arc::clone(&self.shared.stats),
                    self.inputs.clone(),
                    request,
                    scope,
                ));
                None
            }
            Effect::Patch { change, scope } => self.apply_patch(change, scope),
            Effect::Invalidate { tags, reason } => {
                match fallback::invalidate::<K::Record, C>(self.shared.cache.as_ref(), &tags, &reason) {
                    Ok(_) => self.shared.stats.record_invalidation(),
                    Err(err) => error!(key = %self.key, error = %err, "Fallback invalidation failed"),
                }
                None
            }
            Effect::Discard(discard) => {
                self.record_discard(discard);
                None
            }
        }
    }

    fn apply_patch(
        &self,
        change: ChangeDescriptor<K::Record>,
        scope: Vec<EntityId>,
    ) -> Option<Input<K::Record>> {
        let change_kind = change.kind_name();
        let target = change.target_id().cloned().unwrap_or_default();

        match self
            .shared
            .cache
            .update_cached_data(&self.key, |pages| apply_change(pages, change))
        {
            Ok(Some(PatchOutcome::NeedsInvalidation(error))) => {
                warn!(
                    key = %self.key,
                    change = change_kind,
                    id = %target,
                    error = %error,
                    "Patch not applicable"
                );
                Some(Input::PatchRejected { error, scope })
            }
            Ok(Some(outcome)) => {
                if outcome.mutated() {
                    self.shared.stats.record_patch();
                }
                debug!(
                    key = %self.key,
                    change = change_kind,
                    id = %target,
                    outcome = ?outcome,
                    "Patch applied"
                );
                None
            }
            Ok(None) => {
                debug!(key = %self.key, change = change_kind, "Entry has no data, patch skipped");
                None
            }
            Err(err) => Some(Input::PatchRejected {
                error: PatchError::InvalidationRequested {
                    reason: err.to_string(),
                },
                scope,
            }),
        }
    }

    fn record_discard(&self, discard: Discard) {
        let stats = &self.shared.stats;
        match discard {
            Discard::Irrelevant(check) => {
                stats.record_irrelevant();
                debug!(key = %self.key, check = check, "Irrelevant message dropped");
            }
            Discard::TypeMismatch { id } => {
                stats.record_irrelevant();
                debug!(key = %self.key, id = %id, "Fetched record outside type filter dropped");
            }
            Discard::Malformed(err) => {
                stats.record_malformed();
                warn!(key = %self.key, error = %err, "Malformed message dropped");
            }
            Discard::Inactive { state, input } => {
                stats.record_inactive();
                debug!(key = %self.key, state = %state, input = input, "Input for inactive entry discarded");
            }
            Discard::SubscribeFailed(reason) => {
                error!(key = %self.key, reason = %reason, "Subscribe failed, entry not synchronized");
            }
        }
    }
}
