//! Realtime WebSocket endpoint.
//!
//! Bidirectional JSON frames over `GET /api/ws`:
//!
//! **Client → server:**
//! ```json
//! { "type": "join", "kind": "game", "id": "g-1" }
//! { "type": "leave", "kind": "game", "id": "g-1" }
//! { "type": "sync_all_game_events", "gid": "g-1" }
//! { "type": "sync_all_room_events", "rid": "r-1" }
//! { "type": "game_event", "gid": "g-1",
//!   "event": { "type": "cell_fill", "payload": { "row": 0, "col": 0, "value": "A" } },
//!   "user_id": "u-1" }
//! { "type": "room_event", "rid": "r-1", "event": { ... } }
//! { "type": "ping" }
//! ```
//!
//! **Server → client:** `joined`, `left`, `game_events`, `room_events`,
//! pushed `game_event` / `room_event` records, `error`, `pong`.
//!
//! Event-level failures (bad payload, append conflict) come back as
//! `error` frames and never close the connection; only subscriber
//! backpressure does, after which the client reconnects and resyncs.

use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{stream::StreamExt, SinkExt};
use gridcast_core::event::{EventDraft, EventRecord};
use gridcast_core::stream::{StreamId, StreamKind};
use gridcast_hub::Subscription;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Global WebSocket connection counter for the per-instance limit.
static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

/// Frames the client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Join {
        kind: StreamKind,
        id: String,
    },
    Leave {
        kind: StreamKind,
        id: String,
    },
    SyncAllGameEvents {
        gid: String,
    },
    SyncAllRoomEvents {
        rid: String,
    },
    GameEvent {
        gid: String,
        event: serde_json::Value,
        #[serde(default)]
        user_id: Option<String>,
    },
    RoomEvent {
        rid: String,
        event: serde_json::Value,
        #[serde(default)]
        user_id: Option<String>,
    },
    Ping,
}

/// Frames the server sends.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    Joined { kind: StreamKind, id: String },
    Left { kind: StreamKind, id: String },
    GameEvents { gid: String, events: Vec<EventRecord> },
    RoomEvents { rid: String, events: Vec<EventRecord> },
    GameEvent { event: EventRecord },
    RoomEvent { event: EventRecord },
    Error { message: String },
    Pong,
}

type SharedSender = Arc<Mutex<futures::stream::SplitSink<WebSocket, Message>>>;

/// WebSocket upgrade endpoint.
///
/// Returns 503 when the per-instance connection limit is reached.
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn realtime(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let current = ACTIVE_CONNECTIONS.load(Ordering::Relaxed);
    if current >= state.config.server.max_ws_connections {
        warn!(current_connections = current, "WebSocket connection limit exceeded");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "Too many concurrent connections. Please try again later.",
        )
            .into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Connection lifecycle: control frames inline, one pump task per joined
/// stream.
#[allow(clippy::cognitive_complexity)] // WebSocket event loops are naturally branchy
async fn handle_socket(socket: WebSocket, state: AppState) {
    let count = ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed) + 1;
    info!(total_connections = count, "WebSocket connection established");

    let (sender, mut receiver) = socket.split();
    let sender: SharedSender = Arc::new(Mutex::new(sender));

    // One pump task per joined stream; aborting the task drops its
    // subscription, which unregisters it from the hub.
    let mut pumps: HashMap<(StreamKind, String), tokio::task::JoinHandle<()>> = HashMap::new();

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => handle_frame(frame, &state, &sender, &mut pumps).await,
                Err(e) => {
                    debug!(error = %e, "Unparseable client frame");
                    send_frame(
                        &sender,
                        &ServerFrame::Error {
                            message: format!("unparseable frame: {e}"),
                        },
                    )
                    .await;
                }
            },
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => {
                debug!("Client requested close");
                break;
            }
            Message::Binary(_) => {
                send_frame(
                    &sender,
                    &ServerFrame::Error {
                        message: "binary frames are not supported".to_string(),
                    },
                )
                .await;
            }
        }
    }

    for (stream, pump) in pumps.drain() {
        debug!(stream = %stream.0.channel(&StreamId::new(stream.1)), "Dropping subscription");
        pump.abort();
    }

    let count = ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed) - 1;
    info!(total_connections = count, "WebSocket connection closed");
}

async fn handle_frame(
    frame: ClientFrame,
    state: &AppState,
    sender: &SharedSender,
    pumps: &mut HashMap<(StreamKind, String), tokio::task::JoinHandle<()>>,
) {
    match frame {
        ClientFrame::Join { kind, id } => {
            let key = (kind, id.clone());
            if !pumps.contains_key(&key) {
                match state.hub.subscribe(kind, StreamId::new(id.clone())) {
                    Ok(subscription) => {
                        let pump_sender = Arc::clone(sender);
                        pumps.insert(
                            key,
                            tokio::spawn(pump_subscription(subscription, kind, pump_sender)),
                        );
                    }
                    Err(e) => {
                        send_frame(
                            sender,
                            &ServerFrame::Error {
                                message: e.to_string(),
                            },
                        )
                        .await;
                        return;
                    }
                }
            }
            send_frame(sender, &ServerFrame::Joined { kind, id }).await;
        }
        ClientFrame::Leave { kind, id } => {
            if let Some(pump) = pumps.remove(&(kind, id.clone())) {
                pump.abort();
            }
            send_frame(sender, &ServerFrame::Left { kind, id }).await;
        }
        ClientFrame::SyncAllGameEvents { gid } => {
            match state
                .hub
                .sync(StreamKind::Game, StreamId::new(gid.clone()))
                .await
            {
                Ok(events) => {
                    send_frame(sender, &ServerFrame::GameEvents { gid, events }).await;
                }
                Err(e) => {
                    send_frame(
                        sender,
                        &ServerFrame::Error {
                            message: e.to_string(),
                        },
                    )
                    .await;
                }
            }
        }
        ClientFrame::SyncAllRoomEvents { rid } => {
            match state
                .hub
                .sync(StreamKind::Room, StreamId::new(rid.clone()))
                .await
            {
                Ok(events) => {
                    send_frame(sender, &ServerFrame::RoomEvents { rid, events }).await;
                }
                Err(e) => {
                    send_frame(
                        sender,
                        &ServerFrame::Error {
                            message: e.to_string(),
                        },
                    )
                    .await;
                }
            }
        }
        ClientFrame::GameEvent {
            gid,
            event,
            user_id,
        } => {
            publish_draft(state, sender, StreamKind::Game, gid, event, user_id).await;
        }
        ClientFrame::RoomEvent {
            rid,
            event,
            user_id,
        } => {
            publish_draft(state, sender, StreamKind::Room, rid, event, user_id).await;
        }
        ClientFrame::Ping => {
            send_frame(sender, &ServerFrame::Pong).await;
        }
    }
}

/// Publish a client draft through the hub; failures become `error` frames.
/// The publisher receives its own event back through its subscription like
/// every other subscriber.
async fn publish_draft(
    state: &AppState,
    sender: &SharedSender,
    kind: StreamKind,
    stream_id: String,
    event: serde_json::Value,
    user_id: Option<String>,
) {
    let draft = EventDraft {
        body: event,
        user_id,
    };
    if let Err(e) = state
        .hub
        .publish(kind, StreamId::new(stream_id), draft)
        .await
    {
        send_frame(
            sender,
            &ServerFrame::Error {
                message: e.to_string(),
            },
        )
        .await;
    }
}

/// Forward hub deliveries for one stream to the socket.
///
/// The subscription ending means the hub dropped this subscriber
/// (backpressure or shutdown); the connection is closed so the client
/// reconnects and resyncs.
async fn pump_subscription(mut subscription: Subscription, kind: StreamKind, sender: SharedSender) {
    while let Some(event) = subscription.recv().await {
        let frame = match kind {
            StreamKind::Game => ServerFrame::GameEvent { event },
            StreamKind::Room => ServerFrame::RoomEvent { event },
        };
        if !send_frame(&sender, &frame).await {
            return; // Socket gone
        }
    }

    warn!("Subscription dropped by hub; closing connection");
    send_frame(
        &sender,
        &ServerFrame::Error {
            message: "subscription dropped; reconnect and resync".to_string(),
        },
    )
    .await;
    let _ = sender.lock().await.send(Message::Close(None)).await;
}

/// Serialize and send one frame; returns `false` when the socket is gone.
async fn send_frame(sender: &SharedSender, frame: &ServerFrame) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => sender.lock().await.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Frame serialization failed");
            true
        }
    }
}

/// Current WebSocket connection count, for observability.
#[must_use]
pub fn active_connection_count() -> usize {
    ACTIVE_CONNECTIONS.load(Ordering::Relaxed)
}
