//! Cross-process transport bridge and runtime lifecycle manager.
//!
//! A sandboxed UI process cannot open sockets to arbitrary origins; this
//! crate lets it speak HTTP and a notebook-kernel WebSocket sub-protocol
//! to remote compute runtimes by tunneling everything through a privileged
//! host over an asynchronous message channel.
//!
//! Two halves, inseparable in practice:
//!
//! * The **bridge** ([`Bridge`], [`HttpTunnel`], [`WebSocketTunnel`])
//!   relays traffic across the trust boundary and consults the
//!   [`TerminationFence`] before opening or continuing any connection.
//! * The **lifecycle manager** ([`RuntimeLifecycleManager`]) owns the
//!   remote compute sessions that traffic talks to: creation
//!   deduplication, time-bounded expiration, and termination fencing.
//!   Its only way to stop in-flight traffic is sealing the fence.
//!
//! Wire shapes live in `kb-protocol`; [`KernelBridge`] wires both halves
//! around one shared fence and connection registry.

pub mod bridge;
pub mod channel;
pub mod error;
pub mod fence;
pub mod lifecycle;
pub mod registry;
pub mod service;
pub mod tunnel;

pub use bridge::Bridge;
pub use channel::{ChannelParts, HostChannel};
pub use error::{Error, Result};
pub use fence::TerminationFence;
pub use lifecycle::allocator::{FakeAllocator, RuntimeAllocator};
pub use lifecycle::handle::ServiceHandle;
pub use lifecycle::{CreateOptions, LifecycleEvent, RuntimeLifecycleManager};
pub use registry::{ConnectionRegistry, SocketState};
pub use service::KernelBridge;
pub use tunnel::{HttpTunnel, WebSocketTunnel};
