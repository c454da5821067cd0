//! Bridge service: owns the host channel, connection registry, and
//! termination fence, and runs the inbound event dispatch loop.
//!
//! # Message Flow
//!
//! 1. A tunnel issues a request over the host channel
//! 2. The host performs the network I/O and issues a connection id
//! 3. Inbound socket traffic arrives on one multiplexed event stream
//! 4. The dispatch loop decodes each event once at the boundary and routes
//!    it to the per-connection listener registered in the registry
//!
//! All registries are fields on this constructed instance; two bridges in
//! one process are fully independent.

use std::sync::Arc;

use kb_protocol::{Payload, SocketEvent, SocketOpen};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::channel::{ChannelParts, HostChannel};
use crate::error::Error;
use crate::fence::TerminationFence;
use crate::registry::{ConnectionRegistry, SocketState};
use crate::tunnel::{HttpTunnel, WebSocketTunnel};
use crate::Result;

pub struct Bridge {
    channel: Arc<dyn HostChannel>,
    registry: Arc<ConnectionRegistry>,
    fence: Arc<TerminationFence>,
    events: Mutex<Option<mpsc::UnboundedReceiver<SocketEvent>>>,
}

impl Bridge {
    pub fn new(parts: ChannelParts) -> Self {
        Self {
            channel: parts.channel,
            registry: Arc::new(ConnectionRegistry::new()),
            fence: Arc::new(TerminationFence::new()),
            events: Mutex::new(Some(parts.events)),
        }
    }

    pub fn channel(&self) -> &Arc<dyn HostChannel> {
        &self.channel
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn fence(&self) -> &Arc<TerminationFence> {
        &self.fence
    }

    /// Run the inbound event dispatch loop.
    ///
    /// Should be spawned in a background task; returns when the host side
    /// of the channel closes. Only the first call gets the event stream;
    /// later calls return immediately.
    pub async fn run(&self) {
        let Some(mut events) = self.events.lock().take() else {
            warn!(target = "kb.channel", "dispatch loop already running; ignoring");
            return;
        };

        while let Some(event) = events.recv().await {
            self.dispatch(event);
        }

        debug!(target = "kb.channel", "event loop ended (channel closed)");
    }

    /// Decode, transition, and route one inbound event.
    ///
    /// Events are delivered to each connection's listener in arrival order;
    /// no reordering is introduced here.
    fn dispatch(&self, event: SocketEvent) {
        let id = event.connection_id();

        // Byte-wrapped frames are classified once at the boundary: JSON
        // control messages wrapped as bytes become text, genuine binary is
        // reconstructed byte-for-byte.
        let event = match event {
            SocketEvent::Message {
                id,
                data: data @ Payload::Bytes { .. },
            } => match data.to_bytes() {
                Ok(bytes) => SocketEvent::Message {
                    id,
                    data: Payload::classify_bytes(&bytes),
                },
                Err(err) => {
                    warn!(target = "kb.channel", id, error = %err, "undecodable byte frame dropped");
                    return;
                }
            },
            other => other,
        };

        match &event {
            SocketEvent::Open { .. } => self.registry.set_state(id, SocketState::Open),
            SocketEvent::Close { .. } => self.registry.set_state(id, SocketState::Closed),
            // Errors are dispatched without a state change; the subsequent
            // close event still arrives.
            SocketEvent::Message { .. } | SocketEvent::Error { .. } => {}
        }

        let is_close = matches!(event, SocketEvent::Close { .. });
        if !self.registry.route(event) {
            debug!(target = "kb.channel", id, "event for released connection dropped");
        }
        if is_close {
            self.registry.remove(id);
        }
    }

    /// Returns an HTTP tunnel sharing this bridge's channel and fence.
    pub fn http_tunnel(&self) -> HttpTunnel {
        HttpTunnel::new(Arc::clone(&self.channel), Arc::clone(&self.fence))
    }

    /// Opens a tunneled WebSocket for a runtime.
    ///
    /// The fence is consulted before any channel request is issued: a
    /// sealed runtime fails with `ConnectionBlocked` immediately, which
    /// covers the reconnect-after-teardown race.
    pub async fn open_socket(&self, open: SocketOpen) -> Result<WebSocketTunnel> {
        if self.fence.is_sealed(&open.runtime_id) {
            debug!(
                target = "kb.tunnel",
                runtime_id = %open.runtime_id,
                url = %open.url,
                "open blocked by termination fence"
            );
            return Err(Error::ConnectionBlocked(open.runtime_id));
        }

        let runtime_id = open.runtime_id.clone();
        let opened = self.channel.socket_open(open).await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.registry
            .insert(opened.id, Some(runtime_id.clone()), events_tx);

        debug!(
            target = "kb.tunnel",
            id = opened.id,
            %runtime_id,
            "socket connection registered"
        );

        Ok(WebSocketTunnel::new(
            opened.id,
            runtime_id,
            Arc::clone(&self.channel),
            Arc::clone(&self.registry),
            events_rx,
        ))
    }
}
