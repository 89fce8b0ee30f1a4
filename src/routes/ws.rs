use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::requests::channel_name;
use crate::services::progress::ProgressHub;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Subscribe,
    Unsubscribe,
}

/// Frame sent by the client, e.g. `{"action":"subscribe","channel":"job:<id>"}`.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub action: Action,
    pub channel: String,
}

/// Job id named by a `job:<id>` channel.
pub fn parse_channel(channel: &str) -> Option<Uuid> {
    channel.strip_prefix("job:")?.parse().ok()
}

/// GET /ws: progress channel.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let hub = state.progress().clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Per-connection loop: the sink is fed from an mpsc channel, each job
/// subscription runs a forwarder task into that channel.
async fn handle_socket(socket: WebSocket, hub: Arc<ProgressHub>) {
    let conn_id = Uuid::new_v4();
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                tracing::debug!(conn_id = %conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    let mut subscriptions: HashMap<Uuid, (u64, JoinHandle<()>)> = HashMap::new();

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle_client_message(&hub, &tx, &mut subscriptions, text.as_str());
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    for (job_id, (sub_id, task)) in subscriptions.drain() {
        hub.unsubscribe(job_id, sub_id);
        task.abort();
    }
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}

fn handle_client_message(
    hub: &Arc<ProgressHub>,
    tx: &mpsc::UnboundedSender<String>,
    subscriptions: &mut HashMap<Uuid, (u64, JoinHandle<()>)>,
    text: &str,
) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            reply(tx, "error", json!({ "message": format!("invalid message: {e}") }));
            return;
        }
    };
    let Some(job_id) = parse_channel(&message.channel) else {
        reply(tx, "error", json!({ "message": "channel must be job:<uuid>" }));
        return;
    };

    match message.action {
        Action::Subscribe => {
            subscriptions.retain(|_, (_, task)| !task.is_finished());
            if !subscriptions.contains_key(&job_id) {
                let mut subscription = hub.subscribe(job_id);
                let sub_id = subscription.id;
                let forward = tx.clone();
                let task = tokio::spawn(async move {
                    while let Some(event) = subscription.recv().await {
                        let terminal = event.is_terminal();
                        match serde_json::to_string(&event) {
                            Ok(text) => {
                                if forward.send(text).is_err() {
                                    break;
                                }
                            }
                            Err(e) => tracing::error!(error = %e, "Failed to encode progress event"),
                        }
                        if terminal {
                            break;
                        }
                    }
                });
                subscriptions.insert(job_id, (sub_id, task));
            }
            reply(tx, "subscribed", json!({ "channel": channel_name(job_id) }));
        }
        Action::Unsubscribe => {
            if let Some((sub_id, task)) = subscriptions.remove(&job_id) {
                hub.unsubscribe(job_id, sub_id);
                task.abort();
            }
            reply(tx, "unsubscribed", json!({ "channel": channel_name(job_id) }));
        }
    }
}

fn reply(tx: &mpsc::UnboundedSender<String>, event: &str, data: serde_json::Value) {
    let _ = tx.send(json!({ "event": event, "data": data }).to_string());
}
