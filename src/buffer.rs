//! Fixed-capacity ring buffer with in-place slot reuse
//!
//! Slots are allocated once at construction and recycled forever after. The
//! buffer never hands out references to its slots: every read or write goes
//! through a closure executed while the buffer-wide lock is held.
//!
//! ```rust
//! use perimon::buffer::RingBuffer;
//!
//! let buffer = RingBuffer::new(3, || 0u32).unwrap();
//! for value in 1..=5 {
//!     buffer.put(|slot| *slot = value);
//! }
//! assert_eq!(buffer.len(), 3);
//! assert_eq!(buffer.head(), Some(5));
//! assert_eq!(buffer.with_tail(|oldest| *oldest), Some(3));
//! ```

use parking_lot::Mutex;

use crate::{MonitorError, Result};

struct Slots<T> {
    items: Vec<T>,
    /// Index of the most recently written slot
    head: usize,
    /// Index of the oldest written slot
    tail: usize,
    count: usize,
}

impl<T> Slots<T> {
    fn capacity(&self) -> usize {
        self.items.len()
    }

    /// Slot index of the `offset`-th element counting back from the newest.
    fn back_from_head(&self, offset: usize) -> usize {
        let capacity = self.capacity();
        (self.head + capacity - offset) % capacity
    }
}

/// Lock-guarded circular buffer of reusable elements.
pub struct RingBuffer<T> {
    slots: Mutex<Slots<T>>,
}

impl<T> RingBuffer<T> {
    /// Create a buffer with `capacity` slots, each built by `supplier`.
    pub fn new(capacity: usize, mut supplier: impl FnMut() -> T) -> Result<Self> {
        if capacity == 0 {
            return Err(MonitorError::Buffer {
                context: "ring buffer capacity must be at least 1".to_string(),
            });
        }

        let items = (0..capacity).map(|_| supplier()).collect();
        Ok(Self {
            slots: Mutex::new(Slots { items, head: capacity - 1, tail: 0, count: 0 }),
        })
    }

    /// Advance the write position and let `mutate` overwrite that slot in place.
    ///
    /// Once the buffer is full the oldest slot is the one recycled.
    pub fn put<R>(&self, mutate: impl FnOnce(&mut T) -> R) -> R {
        let mut slots = self.slots.lock();
        let capacity = slots.capacity();

        slots.head = (slots.head + 1) % capacity;
        if slots.count == capacity {
            slots.tail = (slots.tail + 1) % capacity;
        } else {
            slots.count += 1;
        }

        let head = slots.head;
        mutate(&mut slots.items[head])
    }

    /// Apply `f` to the newest element. `None` when empty.
    pub fn with_head<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut slots = self.slots.lock();
        if slots.count == 0 {
            return None;
        }
        let head = slots.head;
        Some(f(&mut slots.items[head]))
    }

    /// Apply `f` to the oldest element. `None` when empty.
    pub fn with_tail<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut slots = self.slots.lock();
        if slots.count == 0 {
            return None;
        }
        let tail = slots.tail;
        Some(f(&mut slots.items[tail]))
    }

    /// Search from newest to oldest; `on_match` runs on the first hit.
    pub fn scan_newest_to_oldest(
        &self,
        mut predicate: impl FnMut(&T) -> bool,
        on_match: impl FnOnce(&T),
    ) -> bool {
        let slots = self.slots.lock();
        for offset in 0..slots.count {
            let item = &slots.items[slots.back_from_head(offset)];
            if predicate(item) {
                on_match(item);
                return true;
            }
        }
        false
    }

    /// Search from oldest to newest; `on_match` runs on the first hit.
    pub fn scan_oldest_to_newest(
        &self,
        mut predicate: impl FnMut(&T) -> bool,
        on_match: impl FnOnce(&T),
    ) -> bool {
        let slots = self.slots.lock();
        for offset in (0..slots.count).rev() {
            let item = &slots.items[slots.back_from_head(offset)];
            if predicate(item) {
                on_match(item);
                return true;
            }
        }
        false
    }

    /// Number of written elements, never above capacity.
    pub fn len(&self) -> usize {
        self.slots.lock().count
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.lock().capacity()
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Clone of the newest element.
    pub fn head(&self) -> Option<T> {
        self.with_head(|item| item.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(RingBuffer::new(0, || 0u8), Err(MonitorError::Buffer { .. })));
    }

    #[test]
    fn empty_buffer_accessors_are_no_ops() {
        let buffer = RingBuffer::new(4, || 7i32).unwrap();
        assert!(buffer.is_empty());
        assert_eq!(buffer.head(), None);
        assert_eq!(buffer.with_tail(|v| *v), None);
        assert!(!buffer.scan_newest_to_oldest(|_| true, |_| {}));
    }

    #[test]
    fn scans_visit_in_opposite_orders() {
        let buffer = RingBuffer::new(5, || 0i32).unwrap();
        for value in [10, 20, 30, 40] {
            buffer.put(|slot| *slot = value);
        }

        let mut newest_first = None;
        assert!(buffer.scan_newest_to_oldest(|v| *v >= 20, |v| newest_first = Some(*v)));
        assert_eq!(newest_first, Some(40));

        let mut oldest_first = None;
        assert!(buffer.scan_oldest_to_newest(|v| *v >= 20, |v| oldest_first = Some(*v)));
        assert_eq!(oldest_first, Some(20));
    }

    #[test]
    fn slots_are_reused_in_place() {
        let buffer = RingBuffer::new(2, || Vec::<u8>::with_capacity(64)).unwrap();
        for round in 0..6u8 {
            buffer.put(|slot| {
                // Recycled slots still own the allocation made by the supplier
                assert!(slot.capacity() >= 64);
                slot.clear();
                slot.push(round);
            });
        }
        assert_eq!(buffer.head(), Some(vec![5]));
        assert_eq!(buffer.with_tail(|v| v.clone()), Some(vec![4]));
    }

    proptest! {
        #[test]
        fn head_is_last_write_and_len_is_bounded(
            capacity in 1usize..40,
            writes in prop::collection::vec(any::<i64>(), 1..200)
        ) {
            let buffer = RingBuffer::new(capacity, || 0i64).unwrap();
            for (i, value) in writes.iter().enumerate() {
                buffer.put(|slot| *slot = *value);
                prop_assert_eq!(buffer.head(), Some(*value));
                prop_assert_eq!(buffer.len(), (i + 1).min(capacity));
                prop_assert_eq!(buffer.capacity(), capacity);
            }

            let oldest_index = writes.len().saturating_sub(capacity);
            prop_assert_eq!(buffer.with_tail(|v| *v), Some(writes[oldest_index]));
        }
    }
}
