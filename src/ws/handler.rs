//! WebSocket upgrade handler and per-connection session loop

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{InputFrame, MatchCmd, MatchHandle};
use crate::lobby::names::sanitize_name;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let player_id = Uuid::new_v4();
    info!(player_id = %player_id, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();

    // Everything bound for this client funnels through one outbox; the
    // writer task is the only owner of the sink
    let (outbox_tx, outbox_rx) = mpsc::channel::<ServerMsg>(128);
    let writer_handle = tokio::spawn(write_outbox(ws_sink, outbox_rx, player_id));

    let joined = run_session(player_id, ws_stream, outbox_tx, state).await;

    // Disconnect removes the player from their match synchronously, no
    // grace period
    if let Some(handle) = joined {
        let _ = handle.cmd_tx.send(MatchCmd::Leave { player_id }).await;
    }

    writer_handle.abort();
    info!(player_id = %player_id, "WebSocket connection closed");
}

/// Reader loop: parse client messages, route joins to the registry and
/// gameplay messages to the current match. Returns the joined match handle,
/// if any, for disconnect cleanup.
async fn run_session(
    player_id: Uuid,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    outbox_tx: mpsc::Sender<ServerMsg>,
    state: AppState,
) -> Option<MatchHandle> {
    let rate_limiter = ConnectionRateLimiter::new();
    let mut current: Option<MatchHandle> = None;

    while let Some(result) = ws_stream.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(_)) => {
                warn!(player_id = %player_id, "Received binary message, ignoring");
                continue;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                info!(player_id = %player_id, "Client initiated close");
                break;
            }
            Err(e) => {
                debug!(player_id = %player_id, error = %e, "WebSocket error");
                break;
            }
        };

        let msg = match serde_json::from_str::<ClientMsg>(&text) {
            Ok(msg) => msg,
            Err(e) => {
                // Malformed input is treated as no input, never as a fault
                // that could disturb the session
                warn!(player_id = %player_id, error = %e, "Failed to parse client message");
                continue;
            }
        };

        match msg {
            ClientMsg::Join { name } => {
                if !pre_join_checks(&current, &rate_limiter, &outbox_tx, player_id).await {
                    continue;
                }
                let name = sanitize_name(name.as_deref());
                let result = state
                    .registry
                    .quick_join(player_id, name, outbox_tx.clone())
                    .await;
                current = finish_join(result, &outbox_tx, player_id).await;
            }
            ClientMsg::JoinByCode { name, code } => {
                if !pre_join_checks(&current, &rate_limiter, &outbox_tx, player_id).await {
                    continue;
                }
                let name = sanitize_name(name.as_deref());
                let result = state
                    .registry
                    .join_by_code(&code, player_id, name, outbox_tx.clone())
                    .await;
                current = finish_join(result, &outbox_tx, player_id).await;
            }
            ClientMsg::Input {
                keys,
                mouse_dx,
                mouse_dy,
                shoot,
                reload,
            } => {
                if !rate_limiter.check_input() {
                    debug!(player_id = %player_id, "Rate limited input message");
                    continue;
                }
                match &current {
                    Some(handle) => {
                        let frame = InputFrame {
                            keys,
                            mouse_dx,
                            mouse_dy,
                            shoot,
                            reload,
                        };
                        if handle
                            .cmd_tx
                            .send(MatchCmd::Input { player_id, frame })
                            .await
                            .is_err()
                        {
                            debug!(player_id = %player_id, "Match command channel closed");
                            break;
                        }
                    }
                    None => debug!(player_id = %player_id, "Input before joining, ignoring"),
                }
            }
            ClientMsg::Respawn => {
                if let Some(handle) = &current {
                    let _ = handle.cmd_tx.send(MatchCmd::Respawn { player_id }).await;
                }
            }
        }
    }

    current
}

/// Rejects a join when the connection already sits in a match or is sending
/// join attempts too fast. Returns true when the join may proceed.
async fn pre_join_checks(
    current: &Option<MatchHandle>,
    rate_limiter: &ConnectionRateLimiter,
    outbox_tx: &mpsc::Sender<ServerMsg>,
    player_id: Uuid,
) -> bool {
    if current.is_some() {
        let _ = outbox_tx
            .send(ServerMsg::Error {
                code: "already_in_lobby".to_string(),
                message: "Already in a lobby".to_string(),
            })
            .await;
        return false;
    }
    if !rate_limiter.check_join() {
        warn!(player_id = %player_id, "Rate limited join attempt");
        // Still answered, so the client sees the attempt as terminal instead
        // of waiting on a reply that never comes
        let _ = outbox_tx
            .send(ServerMsg::JoinRejected {
                code: "rate_limited".to_string(),
                message: "Too many join attempts, slow down".to_string(),
            })
            .await;
        return false;
    }
    true
}

/// On success, start forwarding the match broadcast into this connection's
/// outbox; on failure, tell the client why. The registry subscribed the
/// receiver before the join command landed, so the broadcasts the join
/// itself triggers are already queued on it.
async fn finish_join(
    result: Result<(MatchHandle, broadcast::Receiver<ServerMsg>), crate::game::JoinError>,
    outbox_tx: &mpsc::Sender<ServerMsg>,
    player_id: Uuid,
) -> Option<MatchHandle> {
    match result {
        Ok((handle, events)) => {
            tokio::spawn(forward_events(events, outbox_tx.clone(), player_id));
            Some(handle)
        }
        Err(err) => {
            let _ = outbox_tx
                .send(ServerMsg::JoinRejected {
                    code: err.code().to_string(),
                    message: err.to_string(),
                })
                .await;
            None
        }
    }
}

/// Pipe the match's broadcast channel into one client's outbox. Lag skips
/// messages rather than disconnecting the client.
async fn forward_events(
    mut events: broadcast::Receiver<ServerMsg>,
    outbox: mpsc::Sender<ServerMsg>,
    player_id: Uuid,
) {
    loop {
        match events.recv().await {
            Ok(msg) => {
                if outbox.send(msg).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(player_id = %player_id, lagged = n, "Client lagged behind the match broadcast");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Writer task: drain the outbox into the socket until either side closes
async fn write_outbox(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut outbox_rx: mpsc::Receiver<ServerMsg>,
    player_id: Uuid,
) {
    while let Some(msg) = outbox_rx.recv().await {
        if let Err(e) = send_msg(&mut sink, &msg).await {
            debug!(player_id = %player_id, error = %e, "WebSocket send failed");
            break;
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
