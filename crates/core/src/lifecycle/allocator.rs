//! Remote control-plane seam for runtime allocation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kb_protocol::{AllocateRequest, RuntimeRecord, RuntimeStatus};
use parking_lot::Mutex;

use crate::error::Error;
use crate::Result;

/// The remote control-plane API the lifecycle manager consumes.
#[async_trait]
pub trait RuntimeAllocator: Send + Sync {
    /// Allocates a new remote compute runtime.
    async fn allocate(&self, request: AllocateRequest) -> Result<RuntimeRecord>;

    /// Destroys a runtime on the control plane.
    async fn deallocate(&self, uid: &str) -> Result<()>;

    /// Lists every runtime visible to the authenticated principal.
    async fn list(&self) -> Result<Vec<RuntimeRecord>>;
}

/// In-memory allocator for tests: scripts results and counts calls.
#[derive(Default)]
pub struct FakeAllocator {
    scripted: Mutex<VecDeque<RuntimeRecord>>,
    listing: Mutex<VecDeque<Result<Vec<RuntimeRecord>>>>,
    allocate_calls: AtomicUsize,
    deallocated: Mutex<Vec<String>>,
    fail_next_allocate: AtomicBool,
    fail_next_deallocate: AtomicBool,
    delay: Mutex<Option<Duration>>,
    synthesized: AtomicUsize,
}

impl FakeAllocator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue an explicit record for the next `allocate` call. Unscripted
    /// calls synthesize a record from the request.
    pub fn push_runtime(&self, record: RuntimeRecord) {
        self.scripted.lock().push_back(record);
    }

    /// Queue the next `list` result.
    pub fn push_listing(&self, records: Vec<RuntimeRecord>) {
        self.listing.lock().push_back(Ok(records));
    }

    /// Queue a failure for the next `list` call.
    pub fn fail_next_list(&self, message: &str) {
        self.listing
            .lock()
            .push_back(Err(Error::Channel(message.to_string())));
    }

    pub fn fail_next_allocate(&self) {
        self.fail_next_allocate.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_deallocate(&self) {
        self.fail_next_deallocate.store(true, Ordering::SeqCst);
    }

    /// Adds latency to `allocate` so concurrent callers genuinely overlap.
    pub fn set_allocate_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn allocate_calls(&self) -> usize {
        self.allocate_calls.load(Ordering::SeqCst)
    }

    pub fn deallocated(&self) -> Vec<String> {
        self.deallocated.lock().clone()
    }

    fn synthesize(&self, request: &AllocateRequest) -> RuntimeRecord {
        let n = self.synthesized.fetch_add(1, Ordering::SeqCst) + 1;
        let now = crate::lifecycle::now_ms();
        RuntimeRecord {
            uid: format!("rt-{n}"),
            pod_name: format!("pod-{n}"),
            ingress: format!("https://runtimes.example/rt-{n}"),
            token: format!("token-{n}"),
            environment: request.environment.clone(),
            started_at: now,
            expired_at: Some(now + request.ttl_minutes * 60_000),
            status: RuntimeStatus::Active,
        }
    }
}

#[async_trait]
impl RuntimeAllocator for FakeAllocator {
    async fn allocate(&self, request: AllocateRequest) -> Result<RuntimeRecord> {
        self.allocate_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_next_allocate.swap(false, Ordering::SeqCst) {
            return Err(Error::AllocationFailed(
                "control plane rejected allocation".to_string(),
            ));
        }
        let scripted = self.scripted.lock().pop_front();
        Ok(scripted.unwrap_or_else(|| self.synthesize(&request)))
    }

    async fn deallocate(&self, uid: &str) -> Result<()> {
        self.deallocated.lock().push(uid.to_string());
        if self.fail_next_deallocate.swap(false, Ordering::SeqCst) {
            return Err(Error::Channel("control plane unreachable".to_string()));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RuntimeRecord>> {
        match self.listing.lock().pop_front() {
            Some(result) => result,
            None => Ok(Vec::new()),
        }
    }
}
