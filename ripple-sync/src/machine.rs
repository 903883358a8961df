//! Per-entry synchronization state machine.
//!
//! [`SyncMachine::step`] is a pure reducer: it takes one [`Input`], updates
//! the entry state and returns the [`Effect`]s a runner must carry out. It
//! performs no I/O, so every lifecycle race can be driven deterministically.
//!
//! ```text
//! Pending --DataLoaded--> Active --Removed--> Draining --Unsubscribed--> Closed
//!    |                                                                    ^
//!    +----------------------- LoadFailed / Removed -----------------------+
//! ```

use crate::coordinator::{merge, MergeStep};
use crate::fallback::select_tags;
use crate::kinds::{MessagePlan, SyncKind};
use crate::relevance::{evaluate, Verdict};
use crate::transport::SubscriptionToken;
use ripple_cache::FetchRequest;
use ripple_core::{
    CacheTag, ChangeDescriptor, EntityId, FetchError, MessageError, PatchError, QueryParams,
    SyncMessage, TopicSet,
};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryState {
    /// Initial fetch in flight.
    Pending,
    /// Subscribed and routing messages.
    Active,
    /// Eviction requested, unsubscribe in progress.
    Draining,
    Closed,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum Input<R> {
    DataLoaded,
    LoadFailed {
        reason: String,
    },
    Subscribed(SubscriptionToken),
    SubscribeFailed {
        reason: String,
    },
    Message(SyncMessage),
    FetchResolved {
        request: FetchRequest,
        /// Scope of the message that triggered the fetch.
        scope: Vec<EntityId>,
        result: Result<Vec<R>, FetchError>,
    },
    /// The patch engine could not apply a change.
    PatchRejected {
        error: PatchError,
        scope: Vec<EntityId>,
    },
    Removed,
    Unsubscribed,
}

impl<R> Input<R> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DataLoaded => "data_loaded",
            Self::LoadFailed { .. } => "load_failed",
            Self::Subscribed(_) => "subscribed",
            Self::SubscribeFailed { .. } => "subscribe_failed",
            Self::Message(_) => "message",
            Self::FetchResolved { .. } => "fetch_resolved",
            Self::PatchRejected { .. } => "patch_rejected",
            Self::Removed => "removed",
            Self::Unsubscribed => "unsubscribed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect<R> {
    Subscribe(TopicSet),
    Unsubscribe(SubscriptionToken),
    Fetch {
        request: FetchRequest,
        scope: Vec<EntityId>,
    },
    Patch {
        change: ChangeDescriptor<R>,
        scope: Vec<EntityId>,
    },
    Invalidate {
        tags: Vec<CacheTag>,
        reason: String,
    },
    /// Diagnostic only; nothing to execute.
    Discard(Discard),
}

/// Why an input produced no cache work.
#[derive(Debug, Clone, PartialEq)]
pub enum Discard {
    Irrelevant(&'static str),
    Malformed(MessageError),
    /// Arrived while the entry was not active.
    Inactive {
        state: EntryState,
        input: &'static str,
    },
    /// Fetched record fell outside the type filter.
    TypeMismatch {
        id: EntityId,
    },
    SubscribeFailed(String),
}

/// State of one cache entry.
pub struct SyncMachine<K: SyncKind> {
    kind: Arc<K>,
    params: QueryParams,
    topics: TopicSet,
    state: EntryState,
    token: Option<SubscriptionToken>,
}

impl<K: SyncKind> SyncMachine<K> {
    pub fn new(kind: Arc<K>, params: QueryParams) -> Self {
        let topics = kind.topics(&params);
        Self {
            kind,
            params,
            topics,
            state: EntryState::Pending,
            token: None,
        }
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    pub fn token(&self) -> Option<SubscriptionToken> {
        self.token
    }

    pub fn params(&self) -> &QueryParams {
        &self.params
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub fn step(&mut self, input: Input<K::Record>) -> Vec<Effect<K::Record>> {
        use EntryState::*;

        match (self.state, input) {
            (Pending, Input::DataLoaded) => {
                self.state = Active;
                vec![Effect::Subscribe(self.topics.clone())]
            }
            (Pending, Input::LoadFailed { .. }) | (Pending, Input::Removed) => {
                self.state = Closed;
                vec![]
            }

            (Active, Input::Subscribed(token)) if self.token.is_none() => {
                self.token = Some(token);
                vec![]
            }
            // A token that arrives after removal, or a second one, is released
            // right away.
            (_, Input::Subscribed(token)) => vec![Effect::Unsubscribe(token)],

            (Active, Input::SubscribeFailed { reason }) => {
                self.state = Closed;
                vec![Effect::Discard(Discard::SubscribeFailed(reason))]
            }
            (Draining, Input::SubscribeFailed { .. }) => {
                self.state = Closed;
                vec![]
            }

            (Active, Input::Message(message)) => self.on_message(message),
            (Active, Input::FetchResolved {
                request,
                scope,
                result,
            }) => self.on_fetch_resolved(&request, &scope, result),
            (Active, Input::PatchRejected { error, scope }) => {
                vec![self.invalidate(&scope, error.to_string())]
            }

            (Active, Input::Removed) => {
                self.state = Draining;
                // Without a token the subscribe call has not returned yet;
                // its token is released when it does.
                self.token.take().map(Effect::Unsubscribe).into_iter().collect()
            }
            (Draining, Input::Unsubscribed) => {
                self.state = Closed;
                vec![]
            }

            (state, input @ (Input::Message(_)
            | Input::FetchResolved { .. }
            | Input::PatchRejected { .. })) => vec![Effect::Discard(Discard::Inactive {
                state,
                input: input.name(),
            })],

            // Repeated removal, late load signals, stray unsubscribe acks.
            _ => vec![],
        }
    }

    fn on_message(&self, message: SyncMessage) -> Vec<Effect<K::Record>> {
        match evaluate(&message, &self.params, &self.topics) {
            Verdict::Relevant => {}
            Verdict::Irrelevant(check) => return vec![Effect::Discard(Discard::Irrelevant(check))],
            Verdict::Malformed(err) => return vec![Effect::Discard(Discard::Malformed(err))],
        }

        let scope: Vec<EntityId> = message.scope_ids().into_iter().cloned().collect();
        match self.kind.plan(&message, &self.params) {
            Ok(MessagePlan::Apply(ChangeDescriptor::InvalidateAll { reason })) => {
                vec![self.invalidate(&scope, reason)]
            }
            Ok(MessagePlan::Apply(change)) => vec![Effect::Patch { change, scope }],
            Ok(MessagePlan::Fetch(request)) => vec![Effect::Fetch { request, scope }],
            Err(err) => vec![Effect::Discard(Discard::Malformed(err))],
        }
    }

    fn on_fetch_resolved(
        &self,
        request: &FetchRequest,
        scope: &[EntityId],
        result: Result<Vec<K::Record>, FetchError>,
    ) -> Vec<Effect<K::Record>> {
        merge(self.kind.as_ref(), &self.params, request, result)
            .into_iter()
            .map(|step| match step {
                MergeStep::Change(ChangeDescriptor::InvalidateAll { reason }) => {
                    self.invalidate(scope, reason)
                }
                MergeStep::Change(change) => Effect::Patch {
                    change,
                    scope: scope.to_vec(),
                },
                MergeStep::Dropped { id } => Effect::Discard(Discard::TypeMismatch { id }),
            })
            .collect()
    }

    fn invalidate(&self, scope: &[EntityId], reason: String) -> Effect<K::Record> {
        Effect::Invalidate {
            tags: select_tags(self.kind.tag_type(), &self.params, scope),
            reason,
        }
    }
}
