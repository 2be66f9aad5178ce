//! WebSocket stream of engine notifications.
//!
//! # WebSocket Protocol
//!
//! ## Connection
//!
//! ```text
//! ws://localhost:5000/api/ws
//! ```
//!
//! ## Message Format
//!
//! **Server → Client (notification):**
//! ```json
//! {"type": "spot_status_changed", "spot_id": "P1", "occupied": true, "timestamp": "..."}
//! {"type": "spot_reserved", "spot_id": "P1", "reservation_id": "660e8400-..."}
//! {"type": "spot_released", "spot_id": "P1"}
//! ```
//!
//! **Client → Server (narrow the stream to some spots):**
//! ```json
//! {"type": "subscribe_spot", "spot_id": "P1"}
//! {"type": "unsubscribe_spot", "spot_id": "P1"}
//! ```
//!
//! A client with no spot subscriptions receives every notification.
//!
//! ## Connection Limits
//!
//! - Max 1000 concurrent WebSocket connections per server instance
//! - Ping keep-alive every 30 seconds

use crate::server::state::AppState;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{Sink, SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use spotwatch_core::notifier::Notification;
use spotwatch_core::types::SpotId;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{Duration, interval};
use tracing::{debug, info, warn};

/// Active WebSocket connections
static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

/// Maximum concurrent WebSocket connections.
const MAX_CONNECTIONS: usize = 1000;

/// Ping interval for keep-alive (30 seconds).
const PING_INTERVAL_SECS: u64 = 30;

/// Control messages from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Sent once after the upgrade
    Connected {
        /// Greeting
        message: String,
    },
    /// Acknowledges a spot subscription
    Subscribed {
        /// Spot now followed
        spot_id: SpotId,
    },
    /// Acknowledges an unsubscription
    Unsubscribed {
        /// Spot no longer followed
        spot_id: SpotId,
    },
    /// Something went wrong; the connection stays open
    Error {
        /// Error description
        message: String,
    },
}

/// Messages from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Only forward notifications for this spot (cumulative)
    SubscribeSpot {
        /// Spot to follow
        spot_id: SpotId,
    },
    /// Stop following a spot
    UnsubscribeSpot {
        /// Spot to drop
        spot_id: SpotId,
    },
}

/// Spot filter for one connection
#[derive(Debug, Default)]
struct Subscriptions(HashSet<SpotId>);

impl Subscriptions {
    fn wants(&self, notification: &Notification) -> bool {
        self.0.is_empty() || self.0.contains(notification.spot_id())
    }

    fn apply(&mut self, message: ClientMessage) -> ControlMessage {
        match message {
            ClientMessage::SubscribeSpot { spot_id } => {
                self.0.insert(spot_id.clone());
                ControlMessage::Subscribed { spot_id }
            }
            ClientMessage::UnsubscribeSpot { spot_id } => {
                self.0.remove(&spot_id);
                ControlMessage::Unsubscribed { spot_id }
            }
        }
    }
}

/// Decrements the connection count when the socket task ends
struct ConnectionGuard;

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
    }
}

/// WebSocket endpoint for real-time spot updates.
///
/// Returns 503 Service Unavailable if max connections (1000) exceeded.
///
/// # Example
///
/// ```javascript
/// const ws = new WebSocket('ws://localhost:5000/api/ws');
/// ws.onopen = () => ws.send(JSON.stringify({type: 'subscribe_spot', spot_id: 'P1'}));
/// ws.onmessage = (event) => console.log(JSON.parse(event.data));
/// ```
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn notifications(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let current = ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
    if current >= MAX_CONNECTIONS {
        ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
        warn!(
            current_connections = current,
            "WebSocket connection limit exceeded"
        );
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "Too many WebSocket connections",
        )
            .into_response();
    }

    let guard = ConnectionGuard;
    let receiver = state.notifications.subscribe();
    ws.on_upgrade(move |socket| async move {
        let _guard = guard;
        handle_socket(socket, receiver).await;
    })
}

async fn handle_socket(socket: WebSocket, mut notifications: broadcast::Receiver<Notification>) {
    let (mut sender, mut receiver) = socket.split();
    info!(
        connections = ACTIVE_CONNECTIONS.load(Ordering::Relaxed),
        "WebSocket client connected"
    );

    let greeting = ControlMessage::Connected {
        message: "Connected to parking system".to_string(),
    };
    if send_json(&mut sender, &greeting).await.is_err() {
        return;
    }

    let mut subscriptions = Subscriptions::default();
    let mut ping = interval(Duration::from_secs(PING_INTERVAL_SECS));
    // The first tick completes immediately
    ping.tick().await;

    loop {
        tokio::select! {
            received = notifications.recv() => match received {
                Ok(notification) => {
                    if subscriptions.wants(&notification)
                        && send_json(&mut sender, &notification).await.is_err()
                    {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "WebSocket client lagging; notifications dropped");
                    let notice = ControlMessage::Error {
                        message: format!("{skipped} notifications were dropped"),
                    };
                    if send_json(&mut sender, &notice).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(message) => subscriptions.apply(message),
                        Err(err) => ControlMessage::Error {
                            message: format!("unrecognized message: {err}"),
                        },
                    };
                    if send_json(&mut sender, &reply).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(error = %err, "WebSocket receive failed");
                    break;
                }
            },
            _ = ping.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}

async fn send_json<S, T>(sender: &mut S, message: &T) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
    T: Serialize,
{
    let Ok(text) = serde_json::to_string(message) else {
        return Ok(());
    };
    sender.send(Message::Text(text)).await.map_err(|_| ())
}
