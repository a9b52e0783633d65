//! Correlation of outgoing requests with incoming replies and results.

use std::time::Duration;

use tokio::time::Instant;

use eebus_wire::spine::FeatureAddress;

#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub ski: String,
    pub counter: u64,
    /// Local feature awaiting the response.
    pub local_feature: FeatureAddress,
    pub deadline: Instant,
}

/// Outstanding requests, one entry per outgoing counter.
#[derive(Default)]
pub struct PendingRequests {
    entries: Vec<PendingEntry>,
}

impl PendingRequests {
    pub fn new() -> Self {
        PendingRequests {
            entries: Vec::new(),
        }
    }

    pub fn add(
        &mut self,
        ski: impl Into<String>,
        counter: u64,
        local_feature: FeatureAddress,
        max_delay: Duration,
    ) {
        self.entries.push(PendingEntry {
            ski: ski.into(),
            counter,
            local_feature,
            deadline: Instant::now() + max_delay,
        });
    }

    /// Resolve the entry for a reply/result carrying this reference.
    pub fn resolve(&mut self, ski: &str, counter: u64) -> Option<PendingEntry> {
        let index = self
            .entries
            .iter()
            .position(|e| e.ski == ski && e.counter == counter)?;
        Some(self.entries.swap_remove(index))
    }

    /// Remove and return every entry past its deadline.
    pub fn expire(&mut self, now: Instant) -> Vec<PendingEntry> {
        let mut expired = Vec::new();
        let mut index = 0;
        while index < self.entries.len() {
            if self.entries[index].deadline <= now {
                expired.push(self.entries.swap_remove(index));
            } else {
                index += 1;
            }
        }
        expired
    }

    /// Drop every entry addressed at the given peer.
    pub fn remove_device(&mut self, ski: &str) {
        self.entries.retain(|e| e.ski != ski);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature() -> FeatureAddress {
        FeatureAddress::new(None, vec![0], 0)
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_removes_the_entry() {
        let mut pending = PendingRequests::new();
        pending.add("ski-a", 1, feature(), Duration::from_secs(10));

        assert!(pending.resolve("ski-a", 1).is_some());
        assert!(pending.resolve("ski-a", 1).is_none());
        assert!(pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_surfaces_overdue_entries() {
        let mut pending = PendingRequests::new();
        pending.add("ski-a", 1, feature(), Duration::from_secs(10));
        pending.add("ski-a", 2, feature(), Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(11)).await;
        let expired = pending.expire(Instant::now());
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].counter, 1);
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_device_clears_that_peer_only() {
        let mut pending = PendingRequests::new();
        pending.add("ski-a", 1, feature(), Duration::from_secs(10));
        pending.add("ski-b", 1, feature(), Duration::from_secs(10));

        pending.remove_device("ski-a");
        assert_eq!(pending.len(), 1);
        assert!(pending.resolve("ski-b", 1).is_some());
    }
}
