use std::time::Duration;

use moka::sync::Cache;

use crate::model::TransferEvent;

/// Short-lived memory of recently handled transfer fingerprints, used to
/// skip notifications that are redelivered after a reconnect.
#[derive(Debug, Clone)]
pub struct RecentTransfers {
    seen: Cache<String, ()>,
}

impl RecentTransfers {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
    pub const DEFAULT_CAPACITY: u64 = 100_000;

    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, capacity: u64) -> Self {
        Self {
            seen: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(capacity.max(1))
                .build(),
        }
    }

    pub fn contains(&self, event: &TransferEvent) -> bool {
        self.seen.contains_key(&event.fingerprint())
    }

    /// Records the event and reports whether it was new.
    pub fn mark(&self, event: &TransferEvent) -> bool {
        let fingerprint = event.fingerprint();
        if self.seen.contains_key(&fingerprint) {
            return false;
        }
        self.seen.insert(fingerprint, ());
        true
    }
}

impl Default for RecentTransfers {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}
