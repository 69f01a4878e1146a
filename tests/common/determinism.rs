//! Deterministic test environment setup
//!
//! Pins the values that would otherwise differ between a recording run and
//! the replay run that checks it: trace ids and wall-clock time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use replaykit::clock::ReplayClock;
use replaykit::{Mode, ReplayManager, Storage};

/// Fixed timestamp for testing (2024-01-01 00:00:00 UTC)
pub const TEST_TIMESTAMP: &str = "2024-01-01T00:00:00Z";

/// Trace id used by every manager built with [`pinned_manager`]
pub const TEST_TRACE_ID: &str = "integration-trace";

/// Get a fixed chrono DateTime for testing
pub fn test_now() -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(TEST_TIMESTAMP)
        .expect("Invalid test timestamp")
        .with_timezone(&chrono::Utc)
}

/// Replay clock starting at [`TEST_TIMESTAMP`]
pub fn pinned_clock() -> ReplayClock {
    ReplayClock::new(test_now())
}

/// Manager over `storage` with the trace id pinned
pub fn pinned_manager(mode: Mode, storage: Arc<dyn Storage>) -> Arc<ReplayManager> {
    let manager = ReplayManager::with_storage(mode, storage);
    manager.set_trace_id(TEST_TRACE_ID);
    Arc::new(manager)
}

/// Sequential trace ids, one per simulated inbound request
pub struct TraceIdSequence {
    counter: AtomicU64,
}

impl TraceIdSequence {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(1),
        }
    }

    /// Start the next trace on `manager` and return its id
    pub fn start(&self, manager: &ReplayManager) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let id = format!("{TEST_TRACE_ID}-{n}");
        manager.set_trace_id(id.clone());
        id
    }

    /// Reset the sequence so a replay run sees the recorded ids again
    pub fn reset(&self) {
        self.counter.store(1, Ordering::SeqCst);
    }
}

impl Default for TraceIdSequence {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use replaykit::clock::Clock;
    use replaykit::MemoryStorage;

    #[test]
    fn test_trace_sequence_reset() {
        let manager = ReplayManager::default();
        let seq = TraceIdSequence::new();
        let first = seq.start(&manager);
        assert_ne!(first, seq.start(&manager));

        seq.reset();
        assert_eq!(seq.start(&manager), first);
        assert_eq!(manager.trace_id(), first);
    }

    #[test]
    fn test_timestamp() {
        let ts = test_now();
        assert_eq!(ts.year(), 2024);
        assert_eq!(ts.month(), 1);
        assert_eq!(ts.day(), 1);
        assert_eq!(pinned_clock().now(), ts);
    }

    #[test]
    fn test_pinned_manager() {
        let manager = pinned_manager(Mode::Record, Arc::new(MemoryStorage::new()));
        assert_eq!(manager.trace_id(), TEST_TRACE_ID);
        assert!(manager.should_record());
    }
}
