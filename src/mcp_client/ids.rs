//! Per-kind request ID allocation.
//!
//! Every request kind (`ping`, `tools-list`, ...) owns its own counter, so ids
//! look like `"ping-1"`, `"ping-2"`, `"tools-call-1"` and are never reused
//! within a process.

use std::collections::HashMap;
use std::sync::Mutex;

/// Monotonic id counters keyed by request kind.
#[derive(Debug, Default)]
pub struct IdAllocator {
    counters: Mutex<HashMap<String, u64>>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id for `kind`, formatted as `"<kind>-<n>"`.
    pub fn next_id(&self, kind: &str) -> String {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let counter = counters.entry(kind.to_string()).or_insert(0);
        *counter += 1;
        format!("{kind}-{counter}")
    }

    /// Last value handed out for `kind` (0 if none yet).
    pub fn current(&self, kind: &str) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(kind)
            .copied()
            .unwrap_or(0)
    }

    /// Reset the counter for `kind` back to zero.
    #[cfg(test)]
    pub(crate) fn reset(&self, kind: &str) {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(kind.to_string(), 0);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_ids_are_sequential_per_kind() {
        let ids = IdAllocator::new();
        ids.reset("ping");
        let got: Vec<String> = (0..5).map(|_| ids.next_id("ping")).collect();
        assert_eq!(got, vec!["ping-1", "ping-2", "ping-3", "ping-4", "ping-5"]);
    }

    #[test]
    fn test_kinds_have_independent_counters() {
        let ids = IdAllocator::new();
        assert_eq!(ids.next_id("ping"), "ping-1");
        assert_eq!(ids.next_id("tools-list"), "tools-list-1");
        assert_eq!(ids.next_id("ping"), "ping-2");
        assert_eq!(ids.current("tools-list"), 1);
        assert_eq!(ids.current("prompts-list"), 0);
    }

    #[test]
    fn test_reset_restarts_numbering() {
        let ids = IdAllocator::new();
        ids.next_id("tools-call");
        ids.next_id("tools-call");
        ids.reset("tools-call");
        assert_eq!(ids.next_id("tools-call"), "tools-call-1");
    }

    #[test]
    fn test_concurrent_allocation_never_repeats() {
        let ids = Arc::new(IdAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || {
                    (0..100).map(|_| ids.next_id("ping")).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 800);
        assert_eq!(ids.current("ping"), 800);
    }
}
