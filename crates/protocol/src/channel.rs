//! Message shapes for the host channel.
//!
//! The sandboxed process cannot open sockets; it asks the privileged host
//! to do so over an asynchronous message channel. Requests and responses
//! are paired per call, while inbound socket traffic arrives on a single
//! fire-and-forget event stream keyed by connection id.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::payload::Payload;

/// Identifier for one logical tunneled connection, issued by the host.
pub type ConnectionId = u64;

/// A normalized HTTP request tunneled to the host for dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequest {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Payload>,
}

/// The host's answer to a tunneled HTTP request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Payload>,
}

impl HttpResponse {
    /// Returns `true` for 2xx statuses.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Request to open a tunneled WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketOpen {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub runtime_id: String,
}

/// Host acknowledgment carrying the issued connection id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketOpened {
    pub id: ConnectionId,
}

/// Outbound frame for an open tunneled WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketSend {
    pub id: ConnectionId,
    pub data: Payload,
}

/// Request to close a tunneled WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketClose {
    pub id: ConnectionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Inbound socket lifecycle event from the host, keyed by connection id.
///
/// Decoded once at the channel boundary so downstream logic matches
/// exhaustively instead of probing optional fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SocketEvent {
    Open {
        id: ConnectionId,
    },
    Message {
        id: ConnectionId,
        data: Payload,
    },
    Close {
        id: ConnectionId,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Error {
        id: ConnectionId,
        message: String,
    },
}

impl SocketEvent {
    /// The connection this event belongs to.
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            SocketEvent::Open { id }
            | SocketEvent::Message { id, .. }
            | SocketEvent::Close { id, .. }
            | SocketEvent::Error { id, .. } => *id,
        }
    }
}
