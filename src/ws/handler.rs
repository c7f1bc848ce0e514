//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{ConnectionId, Outbound, RoomEvent};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::codec::{self, CodecError};
use crate::ws::protocol::ClientMsg;

/// WebSocket upgrade handler for `/rooms/:room_id/ws`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let room = state.rooms.get_or_create(&room_id);
    info!(room_id = %room.id, "WebSocket upgrade");

    let event_tx = room.event_tx.clone();
    // Subscribe before the connect event so the init message is not missed
    let outbound_rx = room.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, room_id, event_tx, outbound_rx))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    room_id: String,
    event_tx: mpsc::Sender<RoomEvent>,
    outbound_rx: broadcast::Receiver<Outbound>,
) {
    let conn: ConnectionId = Uuid::new_v4();
    info!(room_id = %room_id, connection_id = %conn, "New WebSocket connection");

    if event_tx.send(RoomEvent::Connect { conn }).await.is_err() {
        warn!(room_id = %room_id, connection_id = %conn, "Room closed before connect");
        return;
    }

    let (ws_sink, ws_stream) = socket.split();
    run_session(conn, ws_sink, ws_stream, event_tx.clone(), outbound_rx).await;

    // Cleanup on disconnect
    let _ = event_tx.send(RoomEvent::Disconnect { conn }).await;
    info!(room_id = %room_id, connection_id = %conn, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    conn: ConnectionId,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    event_tx: mpsc::Sender<RoomEvent>,
    mut outbound_rx: broadcast::Receiver<Outbound>,
) {
    let rate_limiter = ConnectionRateLimiter::new();

    // Spawn writer task: room broadcasts -> WebSocket
    let writer_handle = tokio::spawn(async move {
        loop {
            match outbound_rx.recv().await {
                Ok(outbound) => {
                    if !outbound.to.includes(conn) {
                        continue;
                    }
                    if let Err(e) = send_msg(&mut ws_sink, &outbound).await {
                        debug!(connection_id = %conn, error = %e, "WebSocket send failed");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Later syncs supersede what was skipped
                    warn!(connection_id = %conn, lagged_count = n, "Client lagged, skipped {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(connection_id = %conn, "Room channel closed");
                    break;
                }
            }
        }
    });

    // Reader loop: WebSocket -> room
    while let Some(result) = ws_stream.next().await {
        let decoded: Result<ClientMsg, CodecError> = match result {
            Ok(Message::Binary(bytes)) => codec::decode(&bytes),
            Ok(Message::Text(text)) => codec::decode_text(&text),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                info!(connection_id = %conn, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(connection_id = %conn, error = %e, "WebSocket error");
                break;
            }
        };

        let msg = match decoded {
            Ok(msg) => msg,
            Err(e) => {
                warn!(connection_id = %conn, error = %e, "Failed to decode client message");
                continue;
            }
        };

        if !rate_limiter.check_input() {
            warn!(connection_id = %conn, kind = msg.kind(), "Rate limited message");
            continue;
        }
        if matches!(msg, ClientMsg::Chat { .. }) && !rate_limiter.check_chat() {
            debug!(connection_id = %conn, "Rate limited chat");
            continue;
        }

        if event_tx.send(RoomEvent::Message { conn, msg }).await.is_err() {
            debug!(connection_id = %conn, "Room channel closed");
            break;
        }
    }

    writer_handle.abort();
}

/// Encode and send one message as a binary frame
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, outbound: &Outbound) -> Result<(), String> {
    let bytes = codec::encode(outbound.msg.as_ref()).map_err(|e| e.to_string())?;
    sink.send(Message::Binary(bytes)).await.map_err(|e| e.to_string())
}
