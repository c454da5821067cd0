//! Fake host channel for unit testing tunnels and lifecycle without a host.
//!
//! Provides an in-memory channel for testing the bridge layer without a
//! privileged process on the other side.
//!
//! # Example
//!
//! ```ignore
//! let (parts, controller) = FakeChannelBuilder::new().build();
//! let bridge = Arc::new(Bridge::new(parts));
//!
//! tokio::spawn({
//!     let bridge = Arc::clone(&bridge);
//!     async move { bridge.run().await }
//! });
//!
//! let mut tunnel = bridge.open_socket(open_request).await?;
//! controller.inject_open(tunnel.id());
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use kb_protocol::{
    ConnectionId, HttpRequest, HttpResponse, Payload, SocketClose, SocketEvent, SocketOpen,
    SocketOpened, SocketSend,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{ChannelParts, HostChannel};
use crate::error::Error;
use crate::Result;

/// One recorded outbound call, in the order the channel saw it.
#[derive(Debug, Clone)]
pub enum SentFrame {
    Http(HttpRequest),
    Open(SocketOpen),
    Send(SocketSend),
    Close(SocketClose),
}

struct FakeChannelState {
    sent: Mutex<Vec<SentFrame>>,
    http_responses: Mutex<VecDeque<Result<HttpResponse>>>,
    next_id: AtomicU64,
    events_tx: mpsc::UnboundedSender<SocketEvent>,
}

/// Builder for creating fake channel instances.
pub struct FakeChannelBuilder {
    // Nothing needed for now, but allows future extensibility
}

impl FakeChannelBuilder {
    /// Create a new fake channel builder.
    pub fn new() -> Self {
        Self {}
    }

    /// Build the fake channel and return both parts and a controller.
    ///
    /// Returns [`ChannelParts`] for constructing a bridge and a
    /// [`FakeChannelController`] for scripting responses, injecting socket
    /// events, and inspecting sent frames.
    pub fn build(self) -> (ChannelParts, FakeChannelController) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let state = Arc::new(FakeChannelState {
            sent: Mutex::new(Vec::new()),
            http_responses: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            events_tx,
        });

        let channel = FakeChannel {
            state: Arc::clone(&state),
        };

        let controller = FakeChannelController { state };

        let parts = ChannelParts {
            channel: Arc::new(channel),
            events: events_rx,
        };

        (parts, controller)
    }
}

impl Default for FakeChannelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Controller for scripting the fake host and inspecting traffic.
pub struct FakeChannelController {
    state: Arc<FakeChannelState>,
}

impl FakeChannelController {
    /// Queue the response for the next `http_request` call.
    ///
    /// When no response is queued, requests succeed with an empty 200.
    pub fn push_http_response(&self, response: HttpResponse) {
        self.state.http_responses.lock().push_back(Ok(response));
    }

    /// Queue a channel failure for the next `http_request` call.
    pub fn push_http_error(&self, message: &str) {
        self.state
            .http_responses
            .lock()
            .push_back(Err(Error::Channel(message.to_string())));
    }

    /// Inject a raw socket event into the bridge's inbound stream.
    pub fn inject(&self, event: SocketEvent) {
        let _ = self.state.events_tx.send(event);
    }

    /// Inject an `open` event for a connection.
    pub fn inject_open(&self, id: ConnectionId) {
        self.inject(SocketEvent::Open { id });
    }

    /// Inject an inbound message frame.
    pub fn inject_message(&self, id: ConnectionId, data: Payload) {
        self.inject(SocketEvent::Message { id, data });
    }

    /// Inject a `close` event.
    pub fn inject_close(&self, id: ConnectionId, code: Option<u16>, reason: Option<&str>) {
        self.inject(SocketEvent::Close {
            id,
            code,
            reason: reason.map(str::to_string),
        });
    }

    /// Inject an `error` event.
    pub fn inject_error(&self, id: ConnectionId, message: &str) {
        self.inject(SocketEvent::Error {
            id,
            message: message.to_string(),
        });
    }

    /// Take all recorded outbound frames, clearing the buffer.
    pub fn take_sent(&self) -> Vec<SentFrame> {
        std::mem::take(&mut *self.state.sent.lock())
    }

    /// The id the next `socket_open` call will be issued.
    pub fn next_connection_id(&self) -> ConnectionId {
        self.state.next_id.load(Ordering::SeqCst)
    }
}

struct FakeChannel {
    state: Arc<FakeChannelState>,
}

#[async_trait]
impl HostChannel for FakeChannel {
    async fn http_request(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.state.sent.lock().push(SentFrame::Http(request));
        match self.state.http_responses.lock().pop_front() {
            Some(scripted) => scripted,
            None => Ok(HttpResponse {
                status: 200,
                status_text: "OK".to_string(),
                headers: Default::default(),
                body: None,
            }),
        }
    }

    async fn socket_open(&self, open: SocketOpen) -> Result<SocketOpened> {
        self.state.sent.lock().push(SentFrame::Open(open));
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(SocketOpened { id })
    }

    async fn socket_send(&self, send: SocketSend) -> Result<()> {
        self.state.sent.lock().push(SentFrame::Send(send));
        Ok(())
    }

    async fn socket_close(&self, close: SocketClose) -> Result<()> {
        self.state.sent.lock().push(SentFrame::Close(close));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_frames_in_call_order() {
        let (parts, controller) = FakeChannelBuilder::new().build();

        let opened = parts
            .channel
            .socket_open(SocketOpen {
                url: "wss://host/api/kernels/k1".into(),
                protocol: None,
                headers: Default::default(),
                runtime_id: "r1".into(),
            })
            .await
            .unwrap();

        parts
            .channel
            .socket_send(SocketSend {
                id: opened.id,
                data: Payload::from_text("hi"),
            })
            .await
            .unwrap();

        let sent = controller.take_sent();
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[0], SentFrame::Open(_)));
        assert!(matches!(sent[1], SentFrame::Send(_)));
        assert!(controller.take_sent().is_empty());
    }

    #[tokio::test]
    async fn scripted_http_responses_are_served_in_order() {
        let (parts, controller) = FakeChannelBuilder::new().build();
        controller.push_http_response(HttpResponse {
            status: 503,
            status_text: "Service Unavailable".into(),
            headers: Default::default(),
            body: None,
        });
        controller.push_http_error("host went away");

        let request = HttpRequest {
            url: "https://host/api".into(),
            method: "GET".into(),
            headers: Default::default(),
            body: None,
        };

        let first = parts.channel.http_request(request.clone()).await.unwrap();
        assert_eq!(first.status, 503);

        let second = parts.channel.http_request(request.clone()).await;
        assert!(second.is_err());

        // Unscripted requests fall back to an empty 200.
        let third = parts.channel.http_request(request).await.unwrap();
        assert_eq!(third.status, 200);
    }

    #[tokio::test]
    async fn injected_events_arrive_on_the_stream() {
        let (mut parts, controller) = FakeChannelBuilder::new().build();
        controller.inject_open(3);
        controller.inject_close(3, Some(1000), Some("done"));

        let first = parts.events.recv().await.unwrap();
        assert!(matches!(first, SocketEvent::Open { id: 3 }));
        let second = parts.events.recv().await.unwrap();
        assert!(matches!(second, SocketEvent::Close { id: 3, .. }));
    }
}
