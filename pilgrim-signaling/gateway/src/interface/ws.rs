//! WebSocket 长连接
//!
//! 每条连接一个写任务，读循环按到达顺序把事件交给协调器。

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{debug, warn};

use super::http::AppState;
use crate::application::SessionCoordinator;
use crate::domain::event::{InboundEvent, OutboundEvent};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let coordinator = state.coordinator.clone();
    ws.on_upgrade(move |socket| serve_connection(socket, coordinator))
}

pub async fn serve_connection(socket: WebSocket, coordinator: SessionCoordinator) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = unbounded_channel::<OutboundEvent>();
    let connection_id = coordinator.connect(tx).await;

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let frame = match event.to_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(connection_id = %connection_id, event = event.name(), error = %err, "failed to encode outbound event");
                    continue;
                }
            };
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                debug!(connection_id = %connection_id, error = %err, "websocket read failed");
                break;
            }
        };
        match message {
            Message::Text(text) => match InboundEvent::from_frame(text.as_str()) {
                Ok(event) => coordinator.handle(connection_id, event).await,
                Err(err) => coordinator.record_malformed(connection_id, &err.to_string()),
            },
            Message::Binary(_) => coordinator.record_malformed(connection_id, "binary frame"),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    coordinator.disconnect(connection_id).await;
    writer.abort();
}
