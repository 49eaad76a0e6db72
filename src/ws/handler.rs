//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{future, Sink, SinkExt, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::app::AppState;
use crate::server::{GameServer, ServerError};
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// How long the writer may take to flush queued messages before a close
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Close frame reasons are limited to 123 bytes
const MAX_CLOSE_REASON: usize = 123;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let server = state.server.clone();
    ws.on_upgrade(move |socket| {
        let connection_id = Uuid::new_v4();
        handle_socket(socket, server)
            .instrument(tracing::info_span!("connection", connection_id = %connection_id))
    })
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, server: Arc<GameServer>) {
    info!("New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(server.settings().outbound_buffer);

    // Writer task: outbound channel -> WebSocket
    let writer_handle = tokio::spawn(write_messages(ws_sink, outbound_rx).in_current_span());

    // Reader: WebSocket -> connection loop
    let requests = Box::pin(ws_stream.filter_map(|frame| future::ready(decode_frame(frame))));

    let result = server.serve_connection(outbound_tx, requests).await;
    if let Err(e) = &result {
        info!(error = %e, "Connection terminated");
    }

    close_connection(writer_handle, &result).await;
    info!("WebSocket connection closed");
}

/// Map a WebSocket frame to a request, `None` for frames to skip.
///
/// Text that does not decode as a request is skipped, including a `connect`
/// whose fields have the wrong JSON types.
fn decode_frame(frame: Result<Message, axum::Error>) -> Option<Result<ClientMsg, ServerError>> {
    match frame {
        Ok(Message::Text(text)) => match serde_json::from_str::<ClientMsg>(&text) {
            Ok(msg) => Some(Ok(msg)),
            Err(e) => {
                warn!(error = %e, "Failed to parse client message");
                None
            }
        },
        Ok(Message::Binary(_)) => {
            warn!("Received binary message, ignoring");
            None
        }
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
        Ok(Message::Close(_)) => {
            info!("Client initiated close");
            Some(Err(ServerError::Disconnected))
        }
        Err(e) => Some(Err(ServerError::Transport(e.to_string()))),
    }
}

/// Forward outbound messages until the channel closes or the socket fails.
///
/// Returning drops the receiver, so later deliveries to this client fail.
/// The sink is handed back once every sender is gone and the queue is flushed.
async fn write_messages<S>(mut sink: S, mut outbound: mpsc::Receiver<ServerMsg>) -> Option<S>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(msg) = outbound.recv().await {
        if let Err(e) = send_msg(&mut sink, &msg).await {
            debug!(error = %e, "WebSocket send failed");
            return None;
        }
    }
    Some(sink)
}

/// Send a message over WebSocket
async fn send_msg<S>(sink: &mut S, msg: &ServerMsg) -> Result<(), ServerError>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let json = serde_json::to_string(msg).map_err(|e| ServerError::Transport(e.to_string()))?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| ServerError::Transport(e.to_string()))
}

/// Wait for the writer to flush, then tell the peer why the connection ended
async fn close_connection<S>(mut writer: JoinHandle<Option<S>>, result: &Result<(), ServerError>)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let drained = tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await;
    let sink = match drained {
        Ok(Ok(sink)) => sink,
        Ok(Err(e)) => {
            debug!(error = %e, "Writer task failed");
            None
        }
        Err(_) => {
            debug!("Writer did not drain in time, dropping queued messages");
            writer.abort();
            None
        }
    };

    let (Some(mut sink), Err(e)) = (sink, result) else {
        return;
    };
    if let Some(frame) = close_frame(e) {
        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
            debug!(error = %e, "Failed to send close frame");
        }
    }
}

/// Close frame reporting a terminal error, `None` when the peer went away first
fn close_frame(err: &ServerError) -> Option<CloseFrame<'static>> {
    let code = match err {
        ServerError::InvalidId(_) | ServerError::InvalidName | ServerError::DuplicateId(_) => {
            close_code::POLICY
        }
        ServerError::SendFailed | ServerError::Transport(_) | ServerError::WorldClosed => {
            close_code::ERROR
        }
        ServerError::Cancelled => close_code::AWAY,
        ServerError::Disconnected => return None,
    };

    let reason: String = err
        .to_string()
        .char_indices()
        .take_while(|(i, c)| i + c.len_utf8() <= MAX_CLOSE_REASON)
        .map(|(_, c)| c)
        .collect();

    Some(CloseFrame {
        code,
        reason: reason.into(),
    })
}
