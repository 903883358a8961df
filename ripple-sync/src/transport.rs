//! Publish/subscribe transport contract.
//!
//! A subscription pairs a [`TopicSet`] with one unbounded sink. Messages are
//! pushed into the sink in delivery order, so a single consumer draining it
//! observes FIFO order per subscription.

use ripple_core::{new_local_id, SyncMessage, TopicSet, TransportError};
use std::fmt;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Sink a transport pushes matching messages into.
pub type MessageSink = mpsc::UnboundedSender<SyncMessage>;

/// Opaque handle identifying one live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(Uuid);

impl SubscriptionToken {
    pub fn new() -> Self {
        Self(new_local_id())
    }
}

impl Default for SubscriptionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Injected pub/sub collaborator.
pub trait Transport: Send + Sync {
    /// Register `sink` for every message whose topic falls within `topics`.
    fn subscribe(
        &self,
        topics: &TopicSet,
        sink: MessageSink,
    ) -> Result<SubscriptionToken, TransportError>;

    /// Drop a subscription. Unknown tokens are ignored.
    fn unsubscribe(&self, token: SubscriptionToken) -> Result<(), TransportError>;
}

struct Subscription {
    token: SubscriptionToken,
    topics: TopicSet,
    sink: MessageSink,
}

/// In-process pub/sub.
///
/// `publish` walks subscriptions under one lock, so two messages published
/// in sequence reach every sink in that sequence.
#[derive(Default)]
pub struct PubSub {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `message` to every matching subscription. Returns how many
    /// sinks received it. Subscriptions whose receiver is gone are pruned.
    pub fn publish(&self, message: SyncMessage) -> Result<usize, TransportError> {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .map_err(|_| TransportError::LockPoisoned)?;
        let mut delivered = 0;
        subscriptions.retain(|subscription| {
            if !subscription.topics.matches(&message.topic) {
                return true;
            }
            match subscription.sink.send(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    debug!(token = %subscription.token, "Pruned closed subscription");
                    false
                }
            }
        });
        Ok(delivered)
    }

    pub fn subscription_count(&self) -> Result<usize, TransportError> {
        let subscriptions = self
            .subscriptions
            .lock()
            .map_err(|_| TransportError::LockPoisoned)?;
        Ok(subscriptions.len())
    }
}

impl Transport for PubSub {
    fn subscribe(
        &self,
        topics: &TopicSet,
        sink: MessageSink,
    ) -> Result<SubscriptionToken, TransportError> {
        if topics.is_empty() {
            return Err(TransportError::NoTopics);
        }
        let token = SubscriptionToken::new();
        let mut subscriptions = self
            .subscriptions
            .lock()
            .map_err(|_| TransportError::LockPoisoned)?;
        subscriptions.push(Subscription {
            token,
            topics: topics.clone(),
            sink,
        });
        debug!(token = %token, topics = %topics, "Subscribed");
        Ok(token)
    }

    fn unsubscribe(&self, token: SubscriptionToken) -> Result<(), TransportError> {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .map_err(|_| TransportError::LockPoisoned)?;
        subscriptions.retain(|subscription| subscription.token != token);
        debug!(token = %token, "Unsubscribed");
        Ok(())
    }
}
