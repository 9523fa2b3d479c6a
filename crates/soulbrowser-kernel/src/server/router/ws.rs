use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::browser_task::{BackgroundController, PortMessage, PortResponse};
use crate::server::ServeState;

pub(crate) fn router() -> Router<ServeState> {
    Router::new().route("/ws", get(websocket_handler))
}

async fn websocket_handler(State(state): State<ServeState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let controller = state.background_controller();
    ws.on_upgrade(move |socket| async move {
        handle_socket(socket, controller).await;
    })
}

/// Carries one side-panel port's traffic: a `hello` frame binds the
/// connection to a tab, after which `PortMessage`s are dispatched against
/// the shared [`BackgroundController`] and its replies (plus any live
/// execution events for that tab) are written back as `PortResponse`
/// frames. A single writer task owns the socket's sink so replies and
/// forwarded events never race each other.
async fn handle_socket(socket: WebSocket, controller: Arc<BackgroundController>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<PortResponse>();
    let connection_id = Uuid::new_v4().to_string();

    let writer = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            match serde_json::to_string(&response) {
                Ok(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(?err, "failed to serialize port response"),
            }
        }
    });

    let _ = tx.send(PortResponse::Connected {
        session_id: connection_id.clone(),
        server_version: env!("CARGO_PKG_VERSION"),
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<PortMessage>(&text) {
                Ok(PortMessage::Hello { tab_id }) => {
                    controller.bind_port(connection_id.clone(), tab_id, tx.clone());
                    let _ = tx.send(PortResponse::HeartbeatAck);
                }
                Ok(message) => {
                    let response = controller.dispatch(message).await;
                    if tx.send(response).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(target: "ws", ?err, "failed to parse port message");
                    let _ = tx.send(PortResponse::Error {
                        message: format!("invalid port message: {err}"),
                    });
                }
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_)) => {}
            Ok(Message::Close(frame)) => {
                debug!(target: "ws", ?frame, "WebSocket closed by client");
                break;
            }
            Err(err) => {
                error!(?err, "WebSocket error");
                break;
            }
        }
    }

    controller.unbind_port(&connection_id);
    drop(tx);
    let _ = writer.await;
}
