use dashmap::DashMap;

/// Process-wide count of automated replies issued per identity.
///
/// Entries are created lazily at zero, only ever incremented, and never
/// cleared on disconnect: the quota belongs to the identity, not to any
/// single connection. The table lives exactly as long as its owning
/// [`crate::server::ServerState`].
#[derive(Debug, Default)]
pub struct QuotaTracker {
    counts: DashMap<String, u32>,
}

impl QuotaTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: DashMap::new(),
        }
    }

    /// Returns the number of automated replies issued to this identity.
    #[must_use]
    pub fn get(&self, identity_id: &str) -> u32 {
        self.counts.get(identity_id).map_or(0, |entry| *entry)
    }

    /// Increments the identity's counter by one and returns the new value.
    pub fn increment(&self, identity_id: &str) -> u32 {
        let mut entry = self.counts.entry(identity_id.to_string()).or_insert(0);
        *entry = entry.saturating_add(1);
        *entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_identity_defaults_to_zero() {
        let tracker = QuotaTracker::new();
        assert_eq!(tracker.get("u-1"), 0);
    }

    #[test]
    fn increment_returns_the_new_count() {
        let tracker = QuotaTracker::new();
        assert_eq!(tracker.increment("u-1"), 1);
        assert_eq!(tracker.increment("u-1"), 2);
        assert_eq!(tracker.get("u-1"), 2);
    }

    #[test]
    fn counters_are_tracked_per_identity() {
        let tracker = QuotaTracker::new();
        let _ = tracker.increment("u-1");
        assert_eq!(tracker.get("u-2"), 0);
        assert_eq!(tracker.increment("u-2"), 1);
        assert_eq!(tracker.get("u-1"), 1);
    }

    #[test]
    fn count_is_monotonically_non_decreasing() {
        let tracker = QuotaTracker::new();
        let mut last = 0;
        for _ in 0..10 {
            let next = tracker.increment("u-1");
            assert_eq!(next, last + 1);
            last = next;
        }
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let tracker = std::sync::Arc::new(QuotaTracker::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let tracker = tracker.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    let _ = tracker.increment("u-1");
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.get("u-1"), 800);
    }
}
