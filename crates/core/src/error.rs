//! Error taxonomy for the bridge.

use kb_protocol::ConnectionId;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Remote allocation call failed. The in-flight creation marker is
    /// cleared before this surfaces, so a retry can allocate fresh.
    #[error("runtime allocation failed: {0}")]
    AllocationFailed(String),

    /// Remote deallocation call failed. Local state is still torn down and
    /// fenced; the remote side effect is best-effort.
    #[error("runtime deallocation failed: {0}")]
    DeallocationFailed(String),

    /// `send` on a tunnel that is not in the open state. Programmer error,
    /// not retried.
    #[error("connection {id} is not open")]
    NotOpen { id: ConnectionId },

    /// Runtime list refresh failed. The previous cache is preserved.
    #[error("runtime list fetch failed: {0}")]
    FetchFailed(String),

    /// Open attempted against a fenced runtime. Expected and benign during
    /// the notice-lag window after termination; logged at debug level.
    #[error("connection blocked: runtime {0} is terminated")]
    ConnectionBlocked(String),

    /// Host channel plumbing failure.
    #[error("channel error: {0}")]
    Channel(String),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` for the benign fenced-runtime condition.
    pub fn is_connection_blocked(&self) -> bool {
        matches!(self, Error::ConnectionBlocked(_))
    }

    /// Returns `true` when a send was attempted outside the open state.
    pub fn is_not_open(&self) -> bool {
        matches!(self, Error::NotOpen { .. })
    }
}
