//! HTTP tunnel: one request/response exchange via the privileged host.

use std::collections::HashMap;
use std::sync::Arc;

use kb_protocol::{HttpRequest, HttpResponse, Payload};
use serde_json::Value;
use tracing::debug;

use crate::channel::HostChannel;
use crate::fence::TerminationFence;
use crate::Result;

pub struct HttpTunnel {
    channel: Arc<dyn HostChannel>,
    fence: Arc<TerminationFence>,
}

impl HttpTunnel {
    pub fn new(channel: Arc<dyn HostChannel>, fence: Arc<TerminationFence>) -> Self {
        Self { channel, fence }
    }

    /// Builds a normalized request: JSON bodies are carried structured,
    /// everything else as tagged raw bytes.
    pub fn normalize(
        method: &str,
        url: &str,
        headers: HashMap<String, String>,
        body: Option<Vec<u8>>,
    ) -> HttpRequest {
        let body = body.map(|bytes| match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => Payload::from_json(value),
            Err(_) => Payload::from_bytes(&bytes),
        });
        HttpRequest {
            url: url.to_string(),
            method: method.to_string(),
            headers,
            body,
        }
    }

    /// Executes one exchange.
    ///
    /// Requests addressing a terminated runtime short-circuit with a
    /// synthetic empty-result 200 instead of an error: UI polling loops
    /// keep hitting a runtime for a short window after teardown, and a
    /// burst of failures there is pure noise.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        if let Some(runtime_id) = self.fence.blocks_url(&request.url) {
            debug!(
                target = "kb.tunnel",
                %runtime_id,
                url = %request.url,
                method = %request.method,
                "request to terminated runtime short-circuited"
            );
            return Ok(Self::synthetic_empty_ok());
        }

        self.channel.http_request(request).await
    }

    fn synthetic_empty_ok() -> HttpResponse {
        HttpResponse {
            status: 200,
            status_text: "OK".to_string(),
            headers: HashMap::new(),
            body: Some(Payload::from_json(Value::Array(Vec::new()))),
        }
    }
}
