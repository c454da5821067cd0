//! Termination fence: the single synchronization point between runtime
//! teardown and in-flight transport operations.
//!
//! Every transport operation consults the fence before proceeding. The
//! lifecycle manager seals a runtime's entry before it removes the owner
//! binding, so any tunnel operation racing the removal is guaranteed to
//! observe the seal. Sealing is monotonic: an entry never transitions back.

use std::collections::HashSet;

use parking_lot::RwLock;
use url::Url;

/// Shared table of terminated runtime ids.
///
/// A set is the monotonic encoding of `runtime id -> {terminated: bool}`:
/// membership only ever grows.
#[derive(Default)]
pub struct TerminationFence {
    sealed: RwLock<HashSet<String>>,
}

impl TerminationFence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a runtime as terminated. Returns `true` on the first seal;
    /// repeated seals are no-ops.
    pub fn seal(&self, runtime_id: &str) -> bool {
        self.sealed.write().insert(runtime_id.to_string())
    }

    /// Whether the runtime has been terminated.
    pub fn is_sealed(&self, runtime_id: &str) -> bool {
        self.sealed.read().contains(runtime_id)
    }

    /// Scans `url` for a path segment naming a sealed runtime.
    ///
    /// UI polling loops keep addressing a runtime for a short window after
    /// termination; the HTTP tunnel uses this to short-circuit those
    /// requests. No fixed route shape is assumed: any segment that matches
    /// a sealed id blocks the request.
    pub fn blocks_url(&self, url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        let segments = parsed.path_segments()?;
        let sealed = self.sealed.read();
        for segment in segments {
            if sealed.contains(segment) {
                return Some(segment.to_string());
            }
        }
        None
    }
}
