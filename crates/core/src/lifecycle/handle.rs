//! Service-manager handle: the per-runtime connection context handed to
//! tunnels.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use kb_protocol::RuntimeRecord;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::Error;
use crate::Result;

/// Disposable resource bundle bound to one runtime's live connection
/// context.
///
/// Owned by the lifecycle manager; tunnels borrow it for a connection's
/// lifetime. Disposal is idempotent and safe to call even if the
/// underlying transport already failed, so the manager can tear down
/// unconditionally.
#[derive(Clone)]
pub struct ServiceHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    runtime_id: String,
    ingress: String,
    token: String,
    disposed: AtomicBool,
    /// Lazily built connection context (auth headers today; cached
    /// protocol clients hang off the same slot).
    context: Mutex<Option<HashMap<String, String>>>,
}

impl ServiceHandle {
    pub(crate) fn new(record: &RuntimeRecord) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                runtime_id: record.uid.clone(),
                ingress: record.ingress.trim_end_matches('/').to_string(),
                token: record.token.clone(),
                disposed: AtomicBool::new(false),
                context: Mutex::new(None),
            }),
        }
    }

    pub fn runtime_id(&self) -> &str {
        &self.inner.runtime_id
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// HTTP address under the runtime's ingress.
    pub fn http_url(&self, path: &str) -> String {
        format!("{}/{}", self.inner.ingress, path.trim_start_matches('/'))
    }

    /// WebSocket address under the runtime's ingress.
    pub fn ws_url(&self, path: &str) -> String {
        let http = self.http_url(path);
        match http.strip_prefix("https://") {
            Some(rest) => format!("wss://{rest}"),
            None => match http.strip_prefix("http://") {
                Some(rest) => format!("ws://{rest}"),
                None => http,
            },
        }
    }

    /// Auth headers for tunnel traffic to this runtime, built once and
    /// cached until disposal.
    pub fn auth_headers(&self) -> Result<HashMap<String, String>> {
        if self.is_disposed() {
            return Err(Error::Channel(format!(
                "service handle for runtime {} is disposed",
                self.inner.runtime_id
            )));
        }
        let mut context = self.inner.context.lock();
        if context.is_none() {
            let mut headers = HashMap::new();
            headers.insert(
                "Authorization".to_string(),
                format!("Bearer {}", self.inner.token),
            );
            *context = Some(headers);
        }
        Ok(context.as_ref().cloned().unwrap_or_default())
    }

    /// Releases the cached connection context. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.context.lock().take();
        debug!(
            target = "kb.lifecycle",
            runtime_id = %self.inner.runtime_id,
            "service handle disposed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kb_protocol::RuntimeStatus;

    fn record() -> RuntimeRecord {
        RuntimeRecord {
            uid: "r1".into(),
            pod_name: "p1".into(),
            ingress: "https://runtimes.example/r1/".into(),
            token: "tok".into(),
            environment: "python-cpu-env".into(),
            started_at: 0,
            expired_at: None,
            status: RuntimeStatus::Active,
        }
    }

    #[test]
    fn urls_are_joined_under_the_ingress() {
        let handle = ServiceHandle::new(&record());
        assert_eq!(
            handle.http_url("/api/kernels"),
            "https://runtimes.example/r1/api/kernels"
        );
        assert_eq!(
            handle.ws_url("api/kernels/k1/channels"),
            "wss://runtimes.example/r1/api/kernels/k1/channels"
        );
    }

    #[test]
    fn dispose_is_idempotent_and_blocks_the_context() {
        let handle = ServiceHandle::new(&record());
        let headers = handle.auth_headers().unwrap();
        assert_eq!(headers["Authorization"], "Bearer tok");

        handle.dispose();
        handle.dispose();
        assert!(handle.is_disposed());
        assert!(handle.auth_headers().is_err());
    }
}
