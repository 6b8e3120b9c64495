use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use biosync::streaming::broadcaster::{Broadcaster, ChannelSubscriber, Topic};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub broadcaster: Broadcaster,
    pub subscriber_capacity: usize,
}

/// Live datapoint stream
pub async fn handle_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state, Topic::Datapoints))
}

/// Periodic dashboard snapshots
pub async fn handle_dashboard(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state, Topic::Dashboard))
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

/// Register the connection as a subscriber and pump messages until either side
/// goes away
async fn handle_socket(socket: WebSocket, state: AppState, topic: Topic) {
    let (mut sender, mut receiver) = socket.split();
    let (subscriber, mut outbound) = ChannelSubscriber::new(topic, state.subscriber_capacity);
    let id = state.broadcaster.register(Arc::new(subscriber));
    // Pongs go through the writer, which owns the sink
    let (control_tx, mut control_rx) = mpsc::channel::<Message>(8);

    info!("WebSocket subscriber {} connected ({:?})", id, topic);

    let mut writer = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                Some(frame) = control_rx.recv() => frame,
                Some(message) = outbound.recv() => match serde_json::to_string(message.as_ref()) {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                },
                else => break,
            };

            if let Err(e) = sender.send(message).await {
                debug!("WebSocket send failed: {}", e);
                break;
            }
        }
    });

    let mut reader = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Ping(data)) => {
                    if control_tx.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("WebSocket connection closed by client");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    state.broadcaster.unregister(&id);
    info!("WebSocket subscriber {} disconnected", id);
}
