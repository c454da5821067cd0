//! Host channel abstraction.
//!
//! The sandboxed process never opens sockets itself. Every network
//! operation is a request to the privileged host over an asynchronous
//! message channel: paired request/response calls for HTTP and socket
//! control, plus one multiplexed fire-and-forget event stream carrying
//! inbound socket traffic keyed by connection id.

pub mod fake;

use async_trait::async_trait;
use kb_protocol::{HttpRequest, HttpResponse, SocketClose, SocketEvent, SocketOpen, SocketOpened, SocketSend};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::Result;

/// Request/response surface of the channel to the privileged process.
///
/// Implementations perform the actual network I/O on the far side of the
/// trust boundary; this crate only ever sees the message shapes.
#[async_trait]
pub trait HostChannel: Send + Sync {
    /// Executes one HTTP exchange on behalf of the sandboxed caller.
    async fn http_request(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Requests a new tunneled WebSocket; the host issues the connection id.
    async fn socket_open(&self, open: SocketOpen) -> Result<SocketOpened>;

    /// Forwards one outbound frame on an open connection.
    async fn socket_send(&self, send: SocketSend) -> Result<()>;

    /// Requests channel-level close of a connection.
    async fn socket_close(&self, close: SocketClose) -> Result<()>;
}

/// Everything needed to construct a [`Bridge`].
///
/// [`Bridge`]: crate::bridge::Bridge
pub struct ChannelParts {
    /// Request/response half of the channel.
    pub channel: Arc<dyn HostChannel>,
    /// Inbound socket event stream, multiplexed across all connections.
    pub events: mpsc::UnboundedReceiver<SocketEvent>,
}
