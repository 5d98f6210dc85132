//! Indexed binary min-heap over customer slots.
//!
//! The waiting queue keys each customer slot by its current share (lower
//! share = higher priority). Every indexed slot carries an O(1) back-pointer
//! to its heap position, so removing an arbitrary waiter (rest, disconnect)
//! is O(log n) without a linear scan.
//!
//! Ties between equal keys are broken positionally by the current heap
//! layout; no FIFO order among equal shares is guaranteed.

use tracing::error;

use crate::core::error::SchedulerError;
use crate::core::state::SlotId;

#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    slot: SlotId,
    key: f64,
}

/// Binary min-heap of customer slots keyed by share, with back-pointers.
///
/// Capacity is fixed at construction (one potential entry per arena slot).
/// Precondition violations — duplicate insert, removal of an absent slot —
/// are logged errors that leave the heap unchanged; the heap never panics on
/// spurious input.
#[derive(Debug)]
pub struct ShareHeap {
    entries: Vec<HeapEntry>,
    /// `positions[slot]` is the index of `slot` in `entries`, if present.
    positions: Vec<Option<usize>>,
}

impl ShareHeap {
    /// Create an empty heap able to index slots `0..capacity`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            positions: vec![None; capacity],
        }
    }

    /// Number of queued slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of slots the heap can index.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.positions.len()
    }

    /// Current heap position of `slot`, if queued.
    #[must_use]
    pub fn position(&self, slot: SlotId) -> Option<usize> {
        self.positions.get(slot).copied().flatten()
    }

    /// Whether `slot` is queued.
    #[must_use]
    pub fn contains(&self, slot: SlotId) -> bool {
        self.position(slot).is_some()
    }

    /// Queue `slot` keyed by `key`.
    ///
    /// # Errors
    ///
    /// `SlotOutOfRange` if `slot` is not indexable, `QueueFull` at capacity,
    /// `AlreadyQueued` if the slot is already present. All leave the heap
    /// unchanged.
    pub fn insert(&mut self, slot: SlotId, key: f64) -> Result<(), SchedulerError> {
        if slot >= self.positions.len() {
            error!(slot, "heap insert: slot out of range");
            return Err(SchedulerError::SlotOutOfRange(slot));
        }
        if self.entries.len() >= self.positions.len() {
            error!(slot, "heap insert: queue full");
            return Err(SchedulerError::QueueFull(self.positions.len()));
        }
        if self.positions[slot].is_some() {
            error!(slot, "heap insert: slot already queued");
            return Err(SchedulerError::AlreadyQueued(slot));
        }

        let idx = self.entries.len();
        self.entries.push(HeapEntry { slot, key });
        self.positions[slot] = Some(idx);
        self.sift_up(idx);
        Ok(())
    }

    /// Pop the slot with the smallest key, or `None` if empty.
    pub fn pop_min(&mut self) -> Option<SlotId> {
        if self.entries.is_empty() {
            return None;
        }
        let last = self.entries.len() - 1;
        self.swap(0, last);
        let entry = self.entries.pop()?;
        self.positions[entry.slot] = None;
        if !self.entries.is_empty() {
            self.sift_down(0);
        }
        Some(entry.slot)
    }

    /// Slot with the smallest key without removing it, or `None` if empty.
    #[must_use]
    pub fn peek_min(&self) -> Option<SlotId> {
        self.entries.first().map(|e| e.slot)
    }

    /// Remove `slot` from an arbitrary position.
    ///
    /// The entry swapped into the vacated position is re-sifted in whichever
    /// direction restores the heap property; a single direction is not
    /// enough, because the last entry can be smaller than the parent of the
    /// removed position.
    ///
    /// # Errors
    ///
    /// `SlotOutOfRange` or `NotQueued`; both leave the heap unchanged.
    pub fn remove(&mut self, slot: SlotId) -> Result<(), SchedulerError> {
        if slot >= self.positions.len() {
            error!(slot, "heap remove: slot out of range");
            return Err(SchedulerError::SlotOutOfRange(slot));
        }
        let Some(idx) = self.positions[slot] else {
            error!(slot, "heap remove: slot not queued");
            return Err(SchedulerError::NotQueued(slot));
        };

        let last = self.entries.len() - 1;
        self.swap(idx, last);
        let entry = self.entries.pop().ok_or(SchedulerError::NotQueued(slot))?;
        self.positions[entry.slot] = None;

        if idx < self.entries.len() {
            self.sift_up(idx);
            self.sift_down(idx);
        }
        Ok(())
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.entries.swap(a, b);
        self.positions[self.entries[a].slot] = Some(a);
        self.positions[self.entries[b].slot] = Some(b);
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.entries[idx].key < self.entries[parent].key {
                self.swap(idx, parent);
                idx = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * idx + 1;
            let right = 2 * idx + 2;
            let mut smallest = idx;
            if left < len && self.entries[left].key < self.entries[smallest].key {
                smallest = left;
            }
            if right < len && self.entries[right].key < self.entries[smallest].key {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.swap(idx, smallest);
            idx = smallest;
        }
    }

    /// Verify the heap property and back-pointer consistency.
    ///
    /// Used by tests at quiescent points; returns a description of the first
    /// violation found.
    pub fn check(&self) -> Result<(), String> {
        for (idx, entry) in self.entries.iter().enumerate() {
            if self.positions[entry.slot] != Some(idx) {
                return Err(format!(
                    "slot {} at heap index {} has back-pointer {:?}",
                    entry.slot, idx, self.positions[entry.slot]
                ));
            }
            if idx > 0 {
                let parent = (idx - 1) / 2;
                if self.entries[parent].key > entry.key {
                    return Err(format!(
                        "heap property violated at index {} (parent {} key {} > child key {})",
                        idx, parent, self.entries[parent].key, entry.key
                    ));
                }
            }
        }
        let indexed = self.positions.iter().filter(|p| p.is_some()).count();
        if indexed != self.entries.len() {
            return Err(format!(
                "{} back-pointers set for {} entries",
                indexed,
                self.entries.len()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(heap: &mut ShareHeap) -> Vec<SlotId> {
        let mut out = Vec::new();
        while let Some(slot) = heap.pop_min() {
            out.push(slot);
        }
        out
    }

    #[test]
    fn test_pop_orders_by_key() {
        let mut heap = ShareHeap::new(8);
        heap.insert(0, 30.0).unwrap();
        heap.insert(1, 10.0).unwrap();
        heap.insert(2, 20.0).unwrap();
        heap.insert(3, 5.0).unwrap();
        assert_eq!(drain(&mut heap), vec![3, 1, 2, 0]);
    }

    #[test]
    fn test_peek_does_not_mutate() {
        let mut heap = ShareHeap::new(4);
        heap.insert(2, 1.5).unwrap();
        assert_eq!(heap.peek_min(), Some(2));
        assert_eq!(heap.peek_min(), Some(2));
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut heap = ShareHeap::new(4);
        heap.insert(1, 1.0).unwrap();
        assert_eq!(heap.insert(1, 2.0), Err(SchedulerError::AlreadyQueued(1)));
        assert_eq!(heap.len(), 1);
        heap.check().unwrap();
    }

    #[test]
    fn test_remove_absent_rejected() {
        let mut heap = ShareHeap::new(4);
        assert_eq!(heap.remove(3), Err(SchedulerError::NotQueued(3)));
        assert_eq!(heap.remove(99), Err(SchedulerError::SlotOutOfRange(99)));
    }

    #[test]
    fn test_insert_at_capacity_rejected() {
        let mut heap = ShareHeap::new(2);
        heap.insert(0, 1.0).unwrap();
        heap.insert(1, 2.0).unwrap();
        assert_eq!(heap.insert(1, 3.0), Err(SchedulerError::QueueFull(2)));
        assert_eq!(heap.len(), 2);
        heap.check().unwrap();
    }

    #[test]
    fn test_insert_then_remove_is_noop() {
        let mut heap = ShareHeap::new(8);
        heap.insert(0, 3.0).unwrap();
        heap.insert(1, 1.0).unwrap();
        heap.insert(5, 7.0).unwrap();
        heap.insert(2, 4.0).unwrap();
        heap.remove(2).unwrap();
        heap.check().unwrap();
        assert_eq!(drain(&mut heap), vec![1, 0, 5]);
    }

    #[test]
    fn test_remove_root() {
        let mut heap = ShareHeap::new(8);
        heap.insert(0, 1.0).unwrap();
        heap.insert(1, 2.0).unwrap();
        heap.insert(2, 3.0).unwrap();
        heap.remove(0).unwrap();
        heap.check().unwrap();
        assert_eq!(drain(&mut heap), vec![1, 2]);
    }

    #[test]
    fn test_remove_requires_sift_up() {
        // Build a shape where the last entry is smaller than the parent of
        // the removed position, so restoring the property needs an upward
        // sift, not a downward one.
        let mut heap = ShareHeap::new(16);
        heap.insert(0, 0.0).unwrap();
        heap.insert(1, 10.0).unwrap();
        heap.insert(2, 1.0).unwrap();
        heap.insert(3, 11.0).unwrap();
        heap.insert(4, 12.0).unwrap();
        heap.insert(5, 2.0).unwrap();
        // Removing slot 3 (a deep entry under the large subtree) moves slot 5
        // (key 2.0) under parent slot 1 (key 10.0).
        heap.remove(3).unwrap();
        heap.check().unwrap();
        assert_eq!(drain(&mut heap), vec![0, 2, 5, 1, 4]);
    }

    #[test]
    fn test_positions_track_churn() {
        let mut heap = ShareHeap::new(32);
        for slot in 0..32 {
            #[allow(clippy::cast_precision_loss)]
            heap.insert(slot, ((slot * 7) % 13) as f64).unwrap();
            heap.check().unwrap();
        }
        for slot in (0..32).step_by(3) {
            heap.remove(slot).unwrap();
            heap.check().unwrap();
        }
        let mut prev = f64::MIN;
        while let Some(slot) = heap.peek_min() {
            #[allow(clippy::cast_precision_loss)]
            let key = ((slot * 7) % 13) as f64;
            assert!(key >= prev);
            prev = key;
            heap.pop_min();
        }
    }

    #[test]
    fn test_pop_empty() {
        let mut heap = ShareHeap::new(4);
        assert_eq!(heap.pop_min(), None);
        assert_eq!(heap.peek_min(), None);
    }
}
