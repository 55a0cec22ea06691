use crate::bridge::{Bridge, OutboundMessage, PushMessage};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use uuid::Uuid;

struct ServerState {
    bridge: Arc<Bridge>,
    initial_state_delay: Duration,
}

pub async fn start(
    addr: SocketAddr,
    bridge: Arc<Bridge>,
    initial_state_delay: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(ServerState {
        bridge,
        initial_state_delay,
    });

    let app = Router::new()
        .route("/", get(ws_handler))
        .route("/health", get(health_check))
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening for remotes");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    Ok(())
}

async fn ws_handler(
    State(state): State<Arc<ServerState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<ServerState>) {
    let session_id = Uuid::new_v4();
    tracing::info!(%session_id, "remote connected");

    for message in Bridge::greeting() {
        if send(&mut socket, &message).await.is_err() {
            tracing::info!(%session_id, "remote disconnected during greeting");
            return;
        }
    }

    // replies and the initial state push go through one queue so the loop
    // below is the only writer
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let mut events = state.bridge.subscribe();

    let initial_push = {
        let bridge = Arc::clone(&state.bridge);
        let outbound_tx = outbound_tx.clone();
        let delay = state.initial_state_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(message) = bridge.player_state_push() {
                let _ = outbound_tx.send(message);
            }
        })
    };

    loop {
        tokio::select! {
            Some(message) = outbound_rx.recv() => {
                if send(&mut socket, &message).await.is_err() {
                    break;
                }
            }
            event = events.recv() => {
                match event {
                    Ok(changed) => {
                        tracing::debug!(%session_id, track_uri = %changed.snapshot.track_uri(), "pushing player state");
                        let message = match PushMessage::player_state(&changed.formatted) {
                            Ok(message) => OutboundMessage::from(message),
                            Err(err) => {
                                tracing::warn!(%session_id, error = %err, "failed to encode player state");
                                continue;
                            }
                        };
                        if send(&mut socket, &message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(%session_id, skipped, "player state events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let bridge = Arc::clone(&state.bridge);
                        let outbound_tx = outbound_tx.clone();
                        tokio::spawn(async move {
                            if let Some(reply) = bridge.handle_inbound_message(&text).await {
                                let _ = outbound_tx.send(reply);
                            }
                        });
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(%session_id, error = %err, "websocket receive failed");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    initial_push.abort();
    tracing::info!(%session_id, "remote disconnected");
}

async fn send(socket: &mut WebSocket, message: &OutboundMessage) -> Result<(), axum::Error> {
    let text = match message.to_text() {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(error = %err, "failed to encode outbound message");
            return Ok(());
        }
    };
    socket.send(Message::Text(text)).await
}

async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({ "status": "healthy" })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_reports_healthy() {
        let response = health_check().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "healthy" }));
    }
}
