//! Tail the realtime feed and report how each message would affect the
//! configured watch.

use ripple_core::{ConfigError, QueryParams, RippleConfig, TransportError, WatchKind};
use ripple_sync::{
    evaluate, spawn_ws_transport, telemetry, ActivityFeed, MessagePlan, PubSub,
    ReviewableProcessing, SyncKind, TaskFolder, TelemetryError, Transport, Verdict,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
enum TailError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Signal handler failed: {0}")]
    Signal(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), TailError> {
    let config = RippleConfig::load()?;
    telemetry::init_tracing(&config.log)?;

    let pubsub = Arc::new(PubSub::new());
    let feed = spawn_ws_transport(
        config.ws_endpoint.clone(),
        config.reconnect.clone(),
        Arc::clone(&pubsub),
    );
    let params = config.watch.params(&config.project);

    let result = match config.watch.kind {
        WatchKind::ActivityFeed => tail(ActivityFeed, &params, pubsub.as_ref()).await,
        WatchKind::ReviewableProcessing => {
            tail(ReviewableProcessing, &params, pubsub.as_ref()).await
        }
        WatchKind::TaskFolder => tail(TaskFolder, &params, pubsub.as_ref()).await,
    };
    feed.abort();
    result
}

async fn tail<K: SyncKind>(kind: K, params: &QueryParams, pubsub: &PubSub) -> Result<(), TailError> {
    let topics = kind.topics(params);
    let (sink, mut messages) = mpsc::unbounded_channel();
    let token = pubsub.subscribe(&topics, sink)?;
    info!(kind = kind.name(), key = %params.cache_key(kind.name()), topics = %topics, "Tailing");

    let mut seen = 0u64;
    let mut relevant = 0u64;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            message = messages.recv() => {
                let Some(message) = message else { break };
                seen += 1;
                match evaluate(&message, params, &topics) {
                    Verdict::Relevant => {
                        relevant += 1;
                        match kind.plan(&message, params) {
                            Ok(MessagePlan::Apply(change)) => info!(
                                topic = %message.topic,
                                change = change.kind_name(),
                                "Relevant, patch directly"
                            ),
                            Ok(MessagePlan::Fetch(request)) => info!(
                                topic = %message.topic,
                                ids = ?request.ids,
                                "Relevant, targeted fetch"
                            ),
                            Err(err) => warn!(topic = %message.topic, error = %err, "Relevant but unplannable"),
                        }
                    }
                    Verdict::Irrelevant(check) => {
                        debug!(topic = %message.topic, check = check, "Irrelevant");
                    }
                    Verdict::Malformed(err) => {
                        warn!(topic = %message.topic, error = %err, "Malformed");
                    }
                }
            }
        }
    }

    pubsub.unsubscribe(token)?;
    info!(seen = seen, relevant = relevant, "Tail finished");
    Ok(())
}
