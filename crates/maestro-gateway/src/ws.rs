//! WebSocket transport for the subscriber protocol.
//!
//! The socket carries the duplex channel from the engine's point of view:
//! inbound `invoke` messages start runs, outbound events stream back as
//! JSON text frames. One run executes at a time per socket; a disconnect
//! mid-run cancels cooperatively inside the engine.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;

use maestro_core::{ChannelSink, InboundMessage, InvokeRequest};

use crate::AppState;

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut outbound, mut inbound) = socket.split();

    while let Some(Ok(message)) = inbound.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let request: InvokeRequest = match serde_json::from_str::<InboundMessage>(&text) {
            Ok(parsed) => parsed.into(),
            Err(err) => {
                tracing::debug!(error = %err, "rejecting malformed subscriber message");
                let payload = json!({
                    "type": "error",
                    "message": format!("malformed message: {err}"),
                    "kind": "invalid_input",
                });
                if outbound
                    .send(Message::Text(payload.to_string()))
                    .await
                    .is_err()
                {
                    break;
                }
                continue;
            }
        };

        let (sink, mut events) = ChannelSink::pair(256);
        let controller = state.controller.clone();
        let run = tokio::spawn(async move { controller.run(request, Arc::new(sink)).await });

        while let Some(event) = events.recv().await {
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::error!(error = %err, "failed to encode outbound event");
                    continue;
                }
            };
            if outbound.send(Message::Text(payload)).await.is_err() {
                // Receiver gone; dropping the event stream lets the engine
                // observe the disconnect and cancel cooperatively.
                break;
            }
        }
        drop(events);

        match run.await {
            Ok(Ok(outcome)) => {
                tracing::info!(thread = %outcome.thread_id, complete = outcome.is_complete, "run finished");
            }
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "run ended with kernel error");
            }
            Err(err) => {
                tracing::error!(error = %err, "run task panicked");
            }
        }
    }
}
