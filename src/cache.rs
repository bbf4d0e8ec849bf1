//! Change-detection cache.
//!
//! Event-style responses (server ID, status, mode) are only propagated to
//! the application when their payload actually changed; telemetry paths
//! bypass the cache. The cache keeps one snapshot of the last decoded
//! payload per (address, function) pair and is updated on CRC boundaries
//! through [`FifoBuffer::check_recording`](crate::FifoBuffer::check_recording).

use std::collections::HashMap;

/// Last-seen payload snapshots, keyed by address then function code.
#[derive(Debug, Clone, Default)]
pub struct ChangeCache {
    snapshots: HashMap<u8, HashMap<u8, Vec<u8>>>,
}

impl ChangeCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot slot for the pair, created empty on first access. The slot
    /// is handed to `check_recording`, which swaps in the new payload when
    /// it differs.
    pub fn snapshot(&mut self, address: u8, function: u8) -> &mut Vec<u8> {
        self.snapshots
            .entry(address)
            .or_default()
            .entry(function)
            .or_default()
    }

    /// Drop every snapshot, forcing the next response of each pair to be
    /// treated as changed.
    pub fn clear(&mut self) {
        self.snapshots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_lazily_initialized_empty() {
        let mut cache = ChangeCache::new();
        assert!(cache.snapshot(5, 18).is_empty());

        cache.snapshot(5, 18).extend_from_slice(&[1, 2, 3]);
        assert_eq!(cache.snapshot(5, 18), &vec![1, 2, 3]);
        // other pairs are independent
        assert!(cache.snapshot(5, 17).is_empty());
        assert!(cache.snapshot(6, 18).is_empty());
    }

    #[test]
    fn test_clear_forgets_snapshots() {
        let mut cache = ChangeCache::new();
        cache.snapshot(5, 18).push(9);
        cache.clear();
        assert!(cache.snapshot(5, 18).is_empty());
    }
}
