//! WebSocket tunnel: one logical socket relayed through the host.
//!
//! The tunnel's authoritative state lives in the connection registry so
//! that the dispatch loop, the caller, and the lifecycle manager's forced
//! teardown all observe the same machine:
//! `Connecting -> Open -> Closing -> Closed`.

use std::sync::Arc;

use kb_protocol::{ConnectionId, Payload, SocketClose, SocketEvent, SocketSend};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::channel::HostChannel;
use crate::error::Error;
use crate::registry::{ConnectionRegistry, SocketState};
use crate::Result;

/// Handle for one tunneled WebSocket, created by [`Bridge::open_socket`].
///
/// [`Bridge::open_socket`]: crate::bridge::Bridge::open_socket
pub struct WebSocketTunnel {
    id: ConnectionId,
    runtime_id: String,
    channel: Arc<dyn HostChannel>,
    registry: Arc<ConnectionRegistry>,
    events: Option<mpsc::UnboundedReceiver<SocketEvent>>,
}

impl std::fmt::Debug for WebSocketTunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTunnel")
            .field("id", &self.id)
            .field("runtime_id", &self.runtime_id)
            .finish_non_exhaustive()
    }
}

impl WebSocketTunnel {
    pub(crate) fn new(
        id: ConnectionId,
        runtime_id: String,
        channel: Arc<dyn HostChannel>,
        registry: Arc<ConnectionRegistry>,
        events: mpsc::UnboundedReceiver<SocketEvent>,
    ) -> Self {
        Self {
            id,
            runtime_id,
            channel,
            registry,
            events: Some(events),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn runtime_id(&self) -> &str {
        &self.runtime_id
    }

    /// Current socket state; `Closed` once the listener has been released.
    pub fn state(&self) -> SocketState {
        self.registry.state(self.id)
    }

    /// Takes the ordered inbound event stream. Yields `None` after the
    /// first call.
    ///
    /// Events arrive already decoded: byte-wrapped JSON control frames as
    /// text, genuine binary reconstructed byte-for-byte.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SocketEvent>> {
        self.events.take()
    }

    /// Sends an already-tagged payload. Only legal in the open state.
    pub async fn send(&self, data: Payload) -> Result<()> {
        if self.state() != SocketState::Open {
            return Err(Error::NotOpen { id: self.id });
        }
        self.channel
            .socket_send(SocketSend { id: self.id, data })
            .await
    }

    /// Sends binary data as an explicit tagged byte-array frame.
    pub async fn send_bytes(&self, bytes: &[u8]) -> Result<()> {
        self.send(Payload::from_bytes(bytes)).await
    }

    /// Sends plain text unchanged.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send(Payload::from_text(text)).await
    }

    /// Sends a structured value in its canonical text form.
    pub async fn send_json(&self, value: &Value) -> Result<()> {
        self.send(Payload::from_text(value.to_string())).await
    }

    /// Requests close and releases the event listener immediately.
    ///
    /// Idempotent: calling from `Closing` or `Closed` is a no-op. The
    /// listener is released without waiting for the remote close
    /// acknowledgment, so it cannot leak even if the ack never arrives.
    pub async fn close(&self, code: Option<u16>, reason: Option<&str>) -> Result<()> {
        match self.state() {
            SocketState::Closing | SocketState::Closed => return Ok(()),
            SocketState::Connecting | SocketState::Open => {}
        }

        self.registry.set_state(self.id, SocketState::Closing);
        let result = self
            .channel
            .socket_close(SocketClose {
                id: self.id,
                code,
                reason: reason.map(str::to_string),
            })
            .await;
        self.registry.remove(self.id);

        debug!(
            target = "kb.tunnel",
            id = self.id,
            runtime_id = %self.runtime_id,
            "socket closed, listener released"
        );
        result
    }
}
