//! Fixed-capacity sliding window backed by a ring buffer.
//!
//! The newest sample sits at the front, the oldest at the back. The window does not
//! enforce its capacity on insertion: the owner evicts with [`BoundedWindow::remove_back`]
//! before pushing once the window is full. Each window has exactly one owner, so there
//! is no locking here.

use core::fmt;

pub struct BoundedWindow<T> {
    slots: Vec<Option<T>>,
    /// Index of the front (newest) sample.
    head: usize,
    len: usize,
}

impl<T> BoundedWindow<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity.max(1));
        slots.resize_with(capacity.max(1), || None);
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots currently allocated.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Insert at the front. Always grows the length by one; when every slot is taken
    /// the ring is re-laid out into a larger buffer first.
    pub fn push_front(&mut self, sample: T) {
        if self.len == self.slots.len() {
            self.grow();
        }
        let cap = self.slots.len();
        self.head = (self.head + cap - 1) % cap;
        self.slots[self.head] = Some(sample);
        self.len += 1;
    }

    pub fn front(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        self.slots[self.head].as_ref()
    }

    pub fn back(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        self.slots[self.back_index()].as_ref()
    }

    /// Detach the oldest sample. No-op on an empty window.
    pub fn remove_back(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let index = self.back_index();
        self.len -= 1;
        self.slots[index].take()
    }

    /// Samples from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let cap = self.slots.len();
        (0..self.len).filter_map(move |offset| self.slots[(self.head + offset) % cap].as_ref())
    }

    #[inline]
    fn back_index(&self) -> usize {
        (self.head + self.len - 1) % self.slots.len()
    }

    fn grow(&mut self) {
        let new_cap = self.slots.len() * 2;
        let mut slots: Vec<Option<T>> = Vec::with_capacity(new_cap);
        let cap = self.slots.len();
        for offset in 0..self.len {
            slots.push(self.slots[(self.head + offset) % cap].take());
        }
        slots.resize_with(new_cap, || None);
        self.slots = slots;
        self.head = 0;
    }
}

impl<T: fmt::Debug> fmt::Debug for BoundedWindow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedWindow")
            .field("len", &self.len)
            .field("capacity", &self.slots.len())
            .field("samples", &self.iter().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod window_tests {
    use super::*;

    /// The evict-then-insert protocol the aggregation engine follows.
    fn admit(window: &mut BoundedWindow<u32>, capacity: usize, sample: u32) {
        if window.len() >= capacity {
            window.remove_back();
        }
        window.push_front(sample);
    }

    #[test]
    fn test_empty_window() {
        let mut window: BoundedWindow<u32> = BoundedWindow::with_capacity(3);
        assert_eq!(window.len(), 0);
        assert!(window.is_empty());
        assert_eq!(window.back(), None);
        assert_eq!(window.front(), None);
        assert_eq!(window.remove_back(), None);
        assert_eq!(window.len(), 0);
        assert_eq!(window.iter().count(), 0);
    }

    #[test]
    fn test_iterates_newest_first() {
        let mut window = BoundedWindow::with_capacity(3);
        window.push_front(1);
        window.push_front(2);
        window.push_front(3);

        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![3, 2, 1]);
        assert_eq!(window.front(), Some(&3));
        assert_eq!(window.back(), Some(&1));
    }

    #[test]
    fn test_remove_back_drops_oldest() {
        let mut window = BoundedWindow::with_capacity(3);
        window.push_front("a");
        window.push_front("b");

        assert_eq!(window.remove_back(), Some("a"));
        assert_eq!(window.len(), 1);
        assert_eq!(window.back(), Some(&"b"));
        assert_eq!(window.remove_back(), Some("b"));
        assert_eq!(window.remove_back(), None);
        assert!(window.is_empty());
    }

    #[test]
    fn test_push_front_grows_past_capacity() {
        let mut window = BoundedWindow::with_capacity(2);
        for sample in 0..5 {
            window.push_front(sample);
        }

        assert_eq!(window.len(), 5);
        assert!(window.capacity() >= 5);
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_zero_capacity_still_holds_one() {
        let mut window = BoundedWindow::with_capacity(0);
        admit(&mut window, 1, 7);
        admit(&mut window, 1, 8);
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![8]);
    }

    #[test]
    fn test_keeps_most_recent_in_order() {
        for capacity in 1..=8usize {
            for inserted in 0..=(capacity as u32 * 3 + 1) {
                let mut window = BoundedWindow::with_capacity(capacity);
                for sample in 0..inserted {
                    admit(&mut window, capacity, sample);
                    assert!(window.len() <= capacity);
                    assert_eq!(window.capacity(), capacity);
                }

                let expected: Vec<u32> = (0..inserted).rev().take(capacity).collect();
                assert_eq!(
                    window.iter().copied().collect::<Vec<_>>(),
                    expected,
                    "capacity {capacity}, inserted {inserted}"
                );
            }
        }
    }
}
