//! Connection registry: live transport state keyed by connection id.
//!
//! Owned by the bridge; tunnels and the dispatch loop read and update it
//! through shared references. The only cross-component write path into the
//! registry from outside the transport layer is the lifecycle manager's
//! forced teardown of a terminated runtime's connections.

use std::collections::HashMap;

use kb_protocol::{ConnectionId, SocketEvent};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// Socket state machine, mirroring the standard WebSocket ready states.
///
/// `Closed` is terminal and reachable from any state on error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Connecting,
    Open,
    Closing,
    Closed,
}

struct ConnectionRecord {
    runtime_id: Option<String>,
    state: SocketState,
    /// Per-connection event listener. Unbounded so routing never blocks the
    /// dispatch loop and never reorders events within a connection.
    events: mpsc::UnboundedSender<SocketEvent>,
}

/// Concurrency-safe map of connection id to live transport state.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, ConnectionRecord>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection in the `Connecting` state with its event
    /// listener.
    pub fn insert(
        &self,
        id: ConnectionId,
        runtime_id: Option<String>,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) {
        self.connections.lock().insert(
            id,
            ConnectionRecord {
                runtime_id,
                state: SocketState::Connecting,
                events,
            },
        );
    }

    /// Releases a connection's record and listener. Idempotent.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.connections.lock().remove(&id).is_some()
    }

    /// Current state, or `Closed` for unknown/released connections.
    pub fn state(&self, id: ConnectionId) -> SocketState {
        self.connections
            .lock()
            .get(&id)
            .map(|record| record.state)
            .unwrap_or(SocketState::Closed)
    }

    pub fn set_state(&self, id: ConnectionId, state: SocketState) {
        if let Some(record) = self.connections.lock().get_mut(&id) {
            record.state = state;
        }
    }

    /// Delivers an inbound event to the connection's listener.
    ///
    /// Returns `false` when the connection is unknown or its listener was
    /// released; events for released connections are expected after a local
    /// close and are dropped.
    pub fn route(&self, event: SocketEvent) -> bool {
        let id = event.connection_id();
        let connections = self.connections.lock();
        match connections.get(&id) {
            Some(record) => record.events.send(event).is_ok(),
            None => false,
        }
    }

    /// Forcibly tears down every connection bound to `runtime_id`.
    ///
    /// Each listener receives a final synthetic close before its record is
    /// released. Used by the lifecycle manager during termination.
    pub fn close_for_runtime(&self, runtime_id: &str, code: u16, reason: &str) -> usize {
        let mut connections = self.connections.lock();
        let ids: Vec<ConnectionId> = connections
            .iter()
            .filter(|(_, record)| record.runtime_id.as_deref() == Some(runtime_id))
            .map(|(id, _)| *id)
            .collect();

        for id in &ids {
            if let Some(record) = connections.remove(id) {
                let _ = record.events.send(SocketEvent::Close {
                    id: *id,
                    code: Some(code),
                    reason: Some(reason.to_string()),
                });
            }
        }

        if !ids.is_empty() {
            debug!(
                target = "kb.registry",
                runtime_id,
                count = ids.len(),
                "closed connections for terminated runtime"
            );
        }
        ids.len()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }
}
