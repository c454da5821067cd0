//! Runtime lifecycle manager: creation deduplication, expiration,
//! termination fencing.
//!
//! The manager owns every piece of runtime state: owner bindings, in-flight
//! creation futures, expiration timers, service handles, and the listing
//! cache. The transport layer never mutates any of it; the single write
//! path from here into transport-visible state is sealing the termination
//! fence.
//!
//! # Teardown ordering
//!
//! Both explicit termination and expiration commit the fence seal before
//! removing the owner binding. A transport operation racing the removal
//! either observes the binding (and the not-yet-sealed fence) or observes
//! the seal; it can never see a missing binding with an open fence.

pub mod allocator;
pub mod cache;
pub mod handle;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use kb_protocol::{AllocateRequest, RuntimeRecord};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::fence::TerminationFence;
use crate::registry::ConnectionRegistry;
use crate::Result;
use allocator::RuntimeAllocator;
use cache::{CACHE_TTL, RuntimeCache};
use handle::ServiceHandle;

/// Close code used when the manager force-closes a runtime's connections.
const CLOSE_GOING_AWAY: u16 = 1001;

/// Epoch milliseconds, matching the control plane's timestamp wire format.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Options for a runtime creation request.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub environment: String,
    /// Human name for the runtime; derived from the owner when absent.
    pub name: Option<String>,
    pub ttl_minutes: u64,
}

/// Lifecycle notifications, broadcast to any subscriber.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Created { owner: String, uid: String },
    Terminated { owner: String, uid: String },
    Expired { uid: String, pod_name: String },
}

struct OwnerBinding {
    runtime: RuntimeRecord,
    handle: ServiceHandle,
}

type SharedCreate = Shared<BoxFuture<'static, std::result::Result<RuntimeRecord, Arc<str>>>>;

type ExpiredCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Creates, tracks, and destroys remote compute runtimes.
///
/// A constructed instance with explicit lifetime; collaborators receive
/// the shared fence and registry by handle, never through globals. Clones
/// share the same state.
#[derive(Clone)]
pub struct RuntimeLifecycleManager {
    inner: Arc<Inner>,
}

struct Inner {
    allocator: Arc<dyn RuntimeAllocator>,
    fence: Arc<TerminationFence>,
    registry: Arc<ConnectionRegistry>,
    bindings: Mutex<HashMap<String, OwnerBinding>>,
    in_flight: Mutex<HashMap<String, SharedCreate>>,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    cache: Mutex<RuntimeCache>,
    expired_callbacks: RwLock<Vec<ExpiredCallback>>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl RuntimeLifecycleManager {
    pub fn new(
        allocator: Arc<dyn RuntimeAllocator>,
        fence: Arc<TerminationFence>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                allocator,
                fence,
                registry,
                bindings: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                timers: Mutex::new(HashMap::new()),
                cache: Mutex::new(RuntimeCache::new()),
                expired_callbacks: RwLock::new(Vec::new()),
                events,
            }),
        }
    }

    /// Returns the owner's runtime, allocating one if needed.
    ///
    /// Idempotent per owner: an existing binding is returned as-is, and
    /// concurrent calls while an allocation is in flight all resolve to
    /// the same result. At most one remote allocation happens per owner
    /// regardless of call concurrency.
    pub async fn create_runtime(&self, owner: &str, options: CreateOptions) -> Result<RuntimeRecord> {
        if let Some(binding) = self.inner.bindings.lock().get(owner) {
            return Ok(binding.runtime.clone());
        }

        let creation = {
            let mut in_flight = self.inner.in_flight.lock();
            match in_flight.get(owner) {
                Some(shared) => shared.clone(),
                None => {
                    let inner = Arc::clone(&self.inner);
                    let owner_key = owner.to_string();
                    let shared = async move { Inner::allocate_and_bind(inner, owner_key, options).await }
                        .boxed()
                        .shared();
                    in_flight.insert(owner.to_string(), shared.clone());
                    shared
                }
            }
        };

        let result = creation.await;
        // Clear the marker either way: success is covered by the binding,
        // failure must leave room for a retry.
        self.inner.in_flight.lock().remove(owner);
        result.map_err(|message| Error::AllocationFailed(message.to_string()))
    }

    /// The runtime currently bound to `owner`, if any.
    pub fn get_runtime(&self, owner: &str) -> Option<RuntimeRecord> {
        self.inner
            .bindings
            .lock()
            .get(owner)
            .map(|binding| binding.runtime.clone())
    }

    /// The service handle bound to `owner`'s runtime, if any.
    pub fn service_handle(&self, owner: &str) -> Option<ServiceHandle> {
        self.inner
            .bindings
            .lock()
            .get(owner)
            .map(|binding| binding.handle.clone())
    }

    /// Tears down the owner's runtime.
    ///
    /// A missing binding is a logged no-op. Remote deallocation is
    /// best-effort: its failure surfaces as `DeallocationFailed` but never
    /// prevents local teardown, so a runtime cannot wedge un-terminable.
    pub async fn terminate_runtime(&self, owner: &str) -> Result<()> {
        let binding = self
            .inner
            .bindings
            .lock()
            .get(owner)
            .map(|binding| (binding.runtime.clone(), binding.handle.clone()));
        let Some((runtime, handle)) = binding else {
            warn!(
                target = "kb.lifecycle",
                owner, "terminate requested for owner without a runtime"
            );
            return Ok(());
        };

        if let Some(timer) = self.inner.timers.lock().remove(&runtime.uid) {
            timer.abort();
        }
        handle.dispose();

        let dealloc = self.inner.allocator.deallocate(&runtime.uid).await;
        if let Err(err) = &dealloc {
            warn!(
                target = "kb.lifecycle",
                uid = %runtime.uid,
                error = %err,
                "remote deallocation failed; continuing local teardown"
            );
        }

        // Seal before unbinding: any transport operation racing the
        // removal observes the fence.
        self.inner.fence.seal(&runtime.uid);
        self.inner
            .registry
            .close_for_runtime(&runtime.uid, CLOSE_GOING_AWAY, "runtime terminated");
        self.inner.bindings.lock().remove(owner);
        self.inner.cache.lock().remove(&runtime.uid);

        let _ = self.inner.events.send(LifecycleEvent::Terminated {
            owner: owner.to_string(),
            uid: runtime.uid.clone(),
        });
        info!(target = "kb.lifecycle", owner, uid = %runtime.uid, "runtime terminated");

        dealloc.map_err(|err| Error::DeallocationFailed(err.to_string()))
    }

    /// Lists all visible runtimes, serving the cache while it is fresh.
    pub async fn list_all_runtimes(&self) -> Result<Vec<RuntimeRecord>> {
        {
            let cache = self.inner.cache.lock();
            if cache.is_fresh(CACHE_TTL) {
                return Ok(cache.records());
            }
        }
        self.refresh_all_runtimes().await
    }

    /// Forces a listing refresh.
    ///
    /// On success the full expiration timer set is re-derived: every
    /// existing timer is cleared and each returned runtime gets a fresh
    /// one, so stale visibility never leaves an orphaned or duplicate
    /// timer. Already-expired runtimes are expired on the spot. On failure
    /// the previous cache is left untouched.
    pub async fn refresh_all_runtimes(&self) -> Result<Vec<RuntimeRecord>> {
        let records = self.inner.allocator.list().await.map_err(|err| {
            warn!(
                target = "kb.lifecycle",
                error = %err,
                "runtime list refresh failed; previous cache preserved"
            );
            Error::FetchFailed(err.to_string())
        })?;

        {
            let mut timers = self.inner.timers.lock();
            for (_, timer) in timers.drain() {
                timer.abort();
            }
        }
        self.inner.cache.lock().replace(records.clone());
        for record in &records {
            self.inner.schedule_expiry(record);
        }

        debug!(
            target = "kb.lifecycle",
            count = records.len(),
            "runtime listing refreshed"
        );
        Ok(self.inner.cache.lock().records())
    }

    /// Registers a callback invoked with the `pod_name` of every runtime
    /// that expires.
    pub fn on_runtime_expired(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.inner
            .expired_callbacks
            .write()
            .push(Arc::new(callback));
    }

    /// Subscribes to the lifecycle event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    /// Drops every binding, timer, and cached handle. Used on shutdown.
    pub fn dispose(&self) {
        for (_, timer) in self.inner.timers.lock().drain() {
            timer.abort();
        }
        {
            let mut bindings = self.inner.bindings.lock();
            for binding in bindings.values() {
                binding.handle.dispose();
            }
            bindings.clear();
        }
        self.inner.in_flight.lock().clear();
        self.inner.cache.lock().clear();
    }
}

impl Inner {
    async fn allocate_and_bind(
        inner: Arc<Inner>,
        owner: String,
        options: CreateOptions,
    ) -> std::result::Result<RuntimeRecord, Arc<str>> {
        let request = AllocateRequest {
            environment: options.environment,
            name: options
                .name
                .unwrap_or_else(|| format!("{owner}-runtime")),
            ttl_minutes: options.ttl_minutes,
        };
        debug!(
            target = "kb.lifecycle",
            %owner,
            environment = %request.environment,
            "allocating runtime"
        );

        let record = inner.allocator.allocate(request).await.map_err(|err| {
            warn!(target = "kb.lifecycle", %owner, error = %err, "runtime allocation failed");
            Arc::from(err.to_string().as_str())
        })?;

        inner.bindings.lock().insert(
            owner.clone(),
            OwnerBinding {
                runtime: record.clone(),
                handle: ServiceHandle::new(&record),
            },
        );
        inner.schedule_expiry(&record);

        let _ = inner.events.send(LifecycleEvent::Created {
            owner: owner.clone(),
            uid: record.uid.clone(),
        });
        info!(target = "kb.lifecycle", %owner, uid = %record.uid, "runtime created");
        Ok(record)
    }

    /// Arms the expiration timer for a runtime, replacing any previous one
    /// so at most one timer exists per runtime id.
    ///
    /// A runtime already past due at schedule time is expired on the spot,
    /// before any timer could fire.
    fn schedule_expiry(self: &Arc<Self>, record: &RuntimeRecord) {
        let Some(expired_at) = record.expired_at else {
            if let Some(old) = self.timers.lock().remove(&record.uid) {
                old.abort();
            }
            return;
        };

        let now = now_ms();
        if expired_at <= now {
            if let Some(old) = self.timers.lock().remove(&record.uid) {
                old.abort();
            }
            self.expire(&record.uid, &record.pod_name);
            return;
        }

        let delay = Duration::from_millis(expired_at - now);
        let inner = Arc::clone(self);
        let uid = record.uid.clone();
        let pod_name = record.pod_name.clone();
        // The handle must land in the map before the task can deregister
        // itself; the task takes this same lock first, so holding it across
        // the spawn closes the near-zero-delay window.
        let mut timers = self.timers.lock();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.timers.lock().remove(&uid);
            inner.expire(&uid, &pod_name);
        });
        if let Some(old) = timers.insert(record.uid.clone(), timer) {
            old.abort();
        }
    }

    /// Expiration teardown: same fence-before-unbind ordering as explicit
    /// termination, without the remote deallocation call.
    fn expire(&self, uid: &str, pod_name: &str) {
        info!(target = "kb.lifecycle", uid, pod_name, "runtime expired");

        let _ = self.events.send(LifecycleEvent::Expired {
            uid: uid.to_string(),
            pod_name: pod_name.to_string(),
        });
        // Callbacks run outside the lock; one may register another.
        let callbacks = self.expired_callbacks.read().clone();
        for callback in &callbacks {
            callback(pod_name);
        }

        let owner = self
            .bindings
            .lock()
            .iter()
            .find(|(_, binding)| binding.runtime.uid == uid)
            .map(|(owner, binding)| {
                binding.handle.dispose();
                owner.clone()
            });

        self.fence.seal(uid);
        self.registry
            .close_for_runtime(uid, CLOSE_GOING_AWAY, "runtime expired");
        if let Some(owner) = owner {
            self.bindings.lock().remove(&owner);
        }
        self.cache.lock().remove(uid);
    }
}
