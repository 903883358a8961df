//! WebSocket feed with reconnect backoff.
//!
//! Text frames are decoded into [`SyncMessage`]s and published on a
//! [`PubSub`], which routes them to entry subscriptions by topic.

use crate::transport::PubSub;
use futures_util::StreamExt;
use ripple_core::{ReconnectConfig, SyncMessage};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Keep a connection to `endpoint` open and publish everything it sends.
///
/// The task runs until aborted or until the pubsub's lock is poisoned.
pub fn spawn_ws_transport(
    endpoint: String,
    reconnect: ReconnectConfig,
    pubsub: Arc<PubSub>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = reconnect.initial_ms;
        loop {
            match tokio_tungstenite::connect_async(endpoint.as_str()).await {
                Ok((mut stream, _)) => {
                    info!(endpoint = %endpoint, "Realtime feed connected");
                    backoff = reconnect.initial_ms;

                    while let Some(frame) = stream.next().await {
                        match frame {
                            Ok(Message::Text(text)) => match SyncMessage::from_json(&text) {
                                Ok(message) => {
                                    let topic = message.topic.clone();
                                    match pubsub.publish(message) {
                                        Ok(delivered) => {
                                            debug!(topic = %topic, delivered = delivered, "Message published")
                                        }
                                        Err(err) => {
                                            warn!(error = %err, "Realtime feed stopped");
                                            return;
                                        }
                                    }
                                }
                                Err(err) => warn!(error = %err, "Undecodable frame dropped"),
                            },
                            Ok(Message::Close(_)) => break,
                            Ok(_) => {}
                            Err(err) => {
                                warn!(endpoint = %endpoint, error = %err, "Realtime feed error");
                                break;
                            }
                        }
                    }
                    info!(endpoint = %endpoint, "Realtime feed disconnected");
                }
                Err(err) => {
                    warn!(endpoint = %endpoint, error = %err, retry_ms = backoff, "Realtime feed connect failed");
                }
            }

            let delay = jittered_backoff(backoff, reconnect.jitter_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            backoff = next_backoff(backoff, &reconnect);
        }
    })
}

/// Backoff after a failed attempt at `current` milliseconds.
pub fn next_backoff(current: u64, reconnect: &ReconnectConfig) -> u64 {
    let next = (current as f64 * reconnect.multiplier) as u64;
    next.max(current).min(reconnect.max_ms)
}

fn jittered_backoff(base_ms: u64, jitter_ms: u64) -> u64 {
    if jitter_ms == 0 {
        return base_ms;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_nanos(0))
        .subsec_nanos() as u64;
    base_ms.saturating_add(nanos % jitter_ms)
}
