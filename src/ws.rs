use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt, Stream};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::coordinator::MatchHandle;
use crate::error::MatchError;
use crate::protocol::{ClientMessage, ServerMessage, PROTOCOL_VERSION};
use crate::session::{run_receive_loop, Connection, Outbound, SessionError};
use crate::state::AppState;
use crate::types::{PlayerId, PlayerInfo};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Token from `POST /api/login`; without one the socket gets fresh
    /// credentials and must send `join`
    pub token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::info!(
        "WebSocket connection request (token: {})",
        params.token.is_some()
    );

    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, params: WsQuery, state: Arc<AppState>) {
    let (mut sender, receiver) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Writer: everything sent to this client goes through `outbound`, in order
    tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to serialize {:?}: {}", msg, e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
            if msg.is_final() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let handle = state.current_match().await;
    match handle.snapshot().await {
        Ok(match_state) => {
            let _ = outbound.send(ServerMessage::Welcome {
                protocol: PROTOCOL_VERSION.to_string(),
                match_state,
                server_now: chrono::Utc::now().to_rfc3339(),
            });
        }
        Err(e) => {
            tracing::error!("Failed to send welcome message: {}", e);
            let _ = outbound.send(ServerMessage::error(&e));
            return;
        }
    }

    let connection = Connection::new(outbound.clone());
    let errors = outbound.clone();
    let mut inbound = Box::pin(receiver.filter_map(move |msg| {
        futures::future::ready(decode(msg, &errors))
    }));

    let player_id = match params.token.as_deref() {
        Some(token) => {
            let Some(player_id) = state.identities.resolve(token) else {
                tracing::warn!("WebSocket presented an unknown token");
                let _ = outbound.send(ServerMessage::Error {
                    code: "UNKNOWN_IDENTITY".to_string(),
                    msg: "Unknown token".to_string(),
                });
                return;
            };

            match handle.attach_stream(player_id.clone(), connection.clone()).await {
                Ok(()) => player_id,
                // Logged in but not seated yet
                Err(MatchError::UnknownPlayer(_)) => {
                    if await_join(&player_id, &mut inbound, &handle, &connection)
                        .await
                        .is_none()
                    {
                        return;
                    }
                    player_id
                }
                Err(e) => {
                    let _ = outbound.send(ServerMessage::error(&e));
                    return;
                }
            }
        }
        None => {
            let creds = state.identities.issue();
            if await_join(&creds.player_id, &mut inbound, &handle, &connection)
                .await
                .is_none()
            {
                state.identities.revoke(&creds.token);
                return;
            }
            creds.player_id
        }
    };

    // The coordinator holds its own sender; ours only reports parse errors
    let Connection { id: connection_id, .. } = connection;
    drop(outbound);

    let cause = run_receive_loop(player_id.clone(), connection_id, inbound, handle).await;
    tracing::info!("WebSocket connection closed for {}: {}", player_id, cause);
}

/// Turn one socket frame into a wire message.
///
/// Malformed text is answered with a `PARSE_ERROR` and skipped; control
/// frames yield nothing.
fn decode(
    msg: Result<Message, axum::Error>,
    errors: &Outbound,
) -> Option<Result<ClientMessage, SessionError>> {
    match msg {
        Ok(Message::Text(text)) => {
            tracing::debug!("Received message: {}", text.as_str());
            match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(msg) => Some(Ok(msg)),
                Err(e) => {
                    tracing::warn!("Failed to parse client message: {}", e);
                    let _ = errors.send(ServerMessage::Error {
                        code: "PARSE_ERROR".to_string(),
                        msg: format!("Invalid message format: {}", e),
                    });
                    None
                }
            }
        }
        Ok(Message::Close(_)) => Some(Err(SessionError::Eof)),
        Ok(_) => None,
        Err(e) => Some(Err(SessionError::Transport(e.to_string()))),
    }
}

/// Wait for a `join` and seat the player with this socket's stream.
///
/// Rejections are reported to the client, which may try again. Returns
/// `None` if the socket goes away first.
async fn await_join<S>(
    player_id: &PlayerId,
    inbound: &mut S,
    handle: &MatchHandle,
    connection: &Connection,
) -> Option<PlayerInfo>
where
    S: Stream<Item = Result<ClientMessage, SessionError>> + Unpin,
{
    let outbound = &connection.outbound;
    loop {
        match inbound.next().await? {
            Ok(ClientMessage::Join { display_name }) => {
                match handle
                    .join(player_id.clone(), display_name, Some(connection.clone()))
                    .await
                {
                    Ok(player) => return Some(player),
                    Err(MatchError::MatchClosed) => {
                        let _ = outbound.send(ServerMessage::error(&MatchError::MatchClosed));
                        return None;
                    }
                    Err(e) => {
                        let _ = outbound.send(ServerMessage::error(&e));
                    }
                }
            }
            Ok(other) => {
                tracing::debug!("{:?} from {} before joining", other, player_id);
                let _ = outbound.send(ServerMessage::error(&MatchError::UnknownPlayer(
                    player_id.clone(),
                )));
            }
            Err(e) => {
                tracing::info!("Socket for {} closed before joining: {}", player_id, e);
                return None;
            }
        }
    }
}
