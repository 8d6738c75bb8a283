//! services/api/src/web/protocol.rs
//!
//! Defines the messages the server pushes over the live status WebSocket.
//! The connection is server-to-client only; client text frames are ignored.

use proscientia_core::domain::LifecycleEvent;
use serde::Serialize;

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms which topic the connection is now following.
    Subscribed { topic: String },

    /// One job lifecycle transition.
    TaskUpdate { message: LifecycleEvent },

    /// Reports a fatal error; the server closes the connection afterwards.
    Error { message: String },
}
