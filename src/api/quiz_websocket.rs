use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::quiz::connection::ConnectionRegistry;
use crate::quiz::{ClientMessage, QuizServer, ServerMessage};

pub async fn handle_quiz_websocket(
    websocket: WebSocket,
    server: Arc<QuizServer>,
    remote: Option<SocketAddr>,
) {
    let conn_id = ConnectionRegistry::generate_conn_id();
    let origin = remote
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    tracing::info!(conn_id = %conn_id, origin = %origin, "New quiz WebSocket connection");

    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // The capacity check runs before any room logic can touch this socket
    if let Err(e) = server.register_connection(&conn_id, origin, tx).await {
        tracing::warn!(conn_id = %conn_id, origin = %origin, error = %e, "Connection rejected");
        let rejection = ServerMessage::Error {
            message: e.to_string(),
        };
        if let Ok(payload) = serde_json::to_string(&rejection) {
            let _ = ws_sender.send(Message::text(payload)).await;
        }
        let _ = ws_sender.send(Message::close()).await;
        return;
    }

    // Spawn task to drain the outbound channel into the socket
    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_sender.send(message).await {
                tracing::error!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => handle_socket_message(&server, &conn_id, message).await,
            Err(e) => {
                tracing::error!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    server.handle_disconnect(&conn_id).await;
    sender_task.abort();
    tracing::info!(conn_id = %conn_id, "Quiz WebSocket connection closed");
}

/// Parse and dispatch one frame. A failure for one action degrades to an
/// `error` event (or a debug log for stale-client actions); nothing here
/// can take down the listener loop or other rooms.
async fn handle_socket_message(server: &Arc<QuizServer>, conn_id: &str, message: Message) {
    let text = match message.to_str() {
        Ok(text) => text,
        Err(_) => return, // binary/ping frames are transport noise
    };

    tracing::debug!(conn_id = %conn_id, "Received quiz message: {}", text);

    let client_message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::error!(
                conn_id = %conn_id,
                error = %e,
                raw_message = %text,
                "Failed to parse quiz message"
            );
            return;
        }
    };

    if let Err(e) = server.handle_message(conn_id, client_message).await {
        if e.is_reportable() {
            server.report_error(conn_id, &e).await;
        } else {
            tracing::debug!(conn_id = %conn_id, error = %e, "Ignoring stale client action");
        }
    }
}
