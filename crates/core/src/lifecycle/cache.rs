//! Short-TTL read-through cache of the platform-visible runtime list.

use std::time::Duration;

use kb_protocol::RuntimeRecord;
use tokio::time::Instant;

/// How long a fetched listing stays servable.
pub const CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Default)]
pub(crate) struct RuntimeCache {
    records: Vec<RuntimeRecord>,
    fetched_at: Option<Instant>,
}

impl RuntimeCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fresh means fetched within `ttl` and non-empty; an empty listing is
    /// always re-fetched.
    pub(crate) fn is_fresh(&self, ttl: Duration) -> bool {
        !self.records.is_empty()
            && self
                .fetched_at
                .is_some_and(|fetched_at| fetched_at.elapsed() < ttl)
    }

    pub(crate) fn replace(&mut self, records: Vec<RuntimeRecord>) {
        self.records = records;
        self.fetched_at = Some(Instant::now());
    }

    pub(crate) fn remove(&mut self, uid: &str) -> bool {
        let before = self.records.len();
        self.records.retain(|record| record.uid != uid);
        self.records.len() != before
    }

    pub(crate) fn records(&self) -> Vec<RuntimeRecord> {
        self.records.clone()
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
        self.fetched_at = None;
    }
}
