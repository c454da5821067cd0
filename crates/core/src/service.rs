//! Top-level service wiring the transport bridge to the lifecycle manager.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::bridge::Bridge;
use crate::channel::ChannelParts;
use crate::lifecycle::RuntimeLifecycleManager;
use crate::lifecycle::allocator::RuntimeAllocator;

/// One constructed bridge instance: channel, registry, fence, and the
/// lifecycle manager that shares them.
///
/// The fence and registry are shared by handle between the two halves;
/// the lifecycle manager's fence seal is the only write path from
/// lifecycle state into transport-visible state. Multiple instances in
/// one process are fully independent.
pub struct KernelBridge {
    bridge: Arc<Bridge>,
    lifecycle: RuntimeLifecycleManager,
}

impl KernelBridge {
    pub fn new(parts: ChannelParts, allocator: Arc<dyn RuntimeAllocator>) -> Self {
        let bridge = Arc::new(Bridge::new(parts));
        let lifecycle = RuntimeLifecycleManager::new(
            allocator,
            Arc::clone(bridge.fence()),
            Arc::clone(bridge.registry()),
        );
        Self { bridge, lifecycle }
    }

    /// Spawns the inbound event dispatch loop.
    pub fn start(&self) -> JoinHandle<()> {
        let bridge = Arc::clone(&self.bridge);
        tokio::spawn(async move { bridge.run().await })
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    pub fn lifecycle(&self) -> &RuntimeLifecycleManager {
        &self.lifecycle
    }

    /// Releases lifecycle state on shutdown.
    pub fn dispose(&self) {
        self.lifecycle.dispose();
    }
}
