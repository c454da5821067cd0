//! Runtime records as returned by the remote control plane.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a remote compute runtime.
///
/// There is no transition out of `Terminated` or `Expired`; a fresh
/// allocation for the same owner produces a new runtime with a new uid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    Allocating,
    Active,
    Terminating,
    Terminated,
    Expiring,
    Expired,
}

/// One remote, time-bounded compute session.
///
/// Timestamps are epoch milliseconds. `expired_at` is absent for runtimes
/// without a server-side expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeRecord {
    pub uid: String,
    /// Network-facing name, distinct from the internal uid. Expiration
    /// notifications identify runtimes by this name.
    pub pod_name: String,
    /// Ingress address for tunnel traffic.
    pub ingress: String,
    pub token: String,
    pub environment: String,
    pub started_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<u64>,
    pub status: RuntimeStatus,
}

/// Allocation call to the remote control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocateRequest {
    pub environment: String,
    pub name: String,
    pub ttl_minutes: u64,
}
