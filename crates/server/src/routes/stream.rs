//! WebSocket progress stream.
//!
//! - `WS /ws` -- `status` on connect, then `update` / `terminal` as the job
//!   progresses, and `ping` after a period without inbound traffic.

use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket},
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};
use autofollow_core::ProgressMessage;
use tokio::time::Instant;

use crate::hub::{BroadcastHub, SubscriberId};
use crate::state::AppState;

/// Removes the subscriber when the socket task ends, however it ends.
struct SubscriptionGuard {
    id: SubscriberId,
    hub: Arc<BroadcastHub>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

async fn handle_stream(mut socket: WebSocket, state: Arc<AppState>) {
    let (id, mut rx) = state.hub.subscribe();
    let _guard = SubscriptionGuard {
        id,
        hub: Arc::clone(&state.hub),
    };
    let keepalive = state.keepalive;
    let idle = tokio::time::sleep(keepalive);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(message) = outbound else {
                    break;
                };
                if socket.send(Message::Text(message.to_json().into())).await.is_err() {
                    tracing::debug!(subscriber_id = id, "send failed, closing stream");
                    break;
                }
            }

            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(subscriber_id = id, "stream closed by client");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::debug!(subscriber_id = id, error = %e, "WebSocket receive error");
                        break;
                    }
                    Some(Ok(_)) => {
                        idle.as_mut().reset(Instant::now() + keepalive);
                    }
                }
            }

            _ = &mut idle => {
                if socket
                    .send(Message::Text(ProgressMessage::Keepalive.to_json().into()))
                    .await
                    .is_err()
                {
                    tracing::debug!(subscriber_id = id, "client gone during keepalive");
                    break;
                }
                idle.as_mut().reset(Instant::now() + keepalive);
            }
        }
    }
}
