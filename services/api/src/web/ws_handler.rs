//! services/api/src/web/ws_handler.rs
//!
//! The live status WebSocket. Each connection subscribes to one bus topic and
//! forwards every lifecycle event on it until either side goes away. A job that
//! already finished is answered with its terminal event and the connection closes.

use crate::jobs::JobDispatcher;
use crate::web::{middleware::CallerId, protocol::ServerMessage, state::AppState};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use proscientia_core::{domain::UserId, Topic};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Follow a single job instead of every job of the caller.
    pub job_id: Option<Uuid>,
}

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(CallerId(user_id)): Extension<CallerId>,
    Query(query): Query<WsQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, user_id, query.job_id))
}

async fn handle_socket(
    socket: WebSocket,
    app_state: Arc<AppState>,
    user_id: UserId,
    job_id: Option<Uuid>,
) {
    let (mut sender, mut receiver) = socket.split();

    let topic = match job_id {
        Some(job_id) => match app_state.dispatcher.job(job_id) {
            Some(job) if job.owner_id == user_id => Topic::Job(job_id),
            _ => {
                let message = ServerMessage::Error {
                    message: format!("Job {} not found.", job_id),
                };
                send_message(&mut sender, &message).await;
                return;
            }
        },
        None => Topic::Owner(user_id),
    };

    // Events published before this point are not replayed, except a terminal one.
    let subscription = app_state.bus.subscribe(topic);
    info!(user_id, %topic, "Status WebSocket subscribed");
    let subscribed = ServerMessage::Subscribed {
        topic: topic.to_string(),
    };
    if !send_message(&mut sender, &subscribed).await {
        return;
    }

    if let Some(update) = finished_update(&app_state.dispatcher, topic) {
        info!(user_id, %topic, "Job already finished; sending its final state");
        send_message(&mut sender, &update).await;
        return;
    }

    let events = subscription.into_stream();
    tokio::pin!(events);

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => {
                    if !send_message(&mut sender, &ServerMessage::TaskUpdate { message: event }).await {
                        break;
                    }
                }
                None => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Pings are answered by axum; anything else from the client is ignored.
                Some(Ok(_)) => {}
            },
        }
    }

    info!(user_id, %topic, "Status WebSocket closed");
}

/// The terminal event of a followed job that has already finished. Checked after
/// subscribing, since the event is recorded before it is published.
fn finished_update(dispatcher: &JobDispatcher, topic: Topic) -> Option<ServerMessage> {
    let Topic::Job(job_id) = topic else {
        return None;
    };
    dispatcher
        .terminal_event(job_id)
        .map(|event| ServerMessage::TaskUpdate { message: event })
}

/// Serializes and sends one message. Returns whether the client is still reachable.
async fn send_message(sender: &mut SplitSink<WebSocket, Message>, message: &ServerMessage) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server message: {:?}", e);
            return false;
        }
    };
    sender.send(Message::Text(json.into())).await.is_ok()
}
