//! Fixed-capacity, append-only arena shared between workers.
//!
//! Slots are reserved with an atomic counter and written exactly once.
//! Storage is allocated in chunks on first touch, so a large capacity only
//! costs memory once it is actually used.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

const CHUNK_BITS: usize = 12;
const CHUNK_SIZE: usize = 1 << CHUNK_BITS;
const CHUNK_MASK: usize = CHUNK_SIZE - 1;

pub(crate) struct AppendArena<T> {
    chunks: Box<[OnceLock<Box<[OnceLock<T>]>>]>,
    reserved: AtomicUsize,
    capacity: usize,
}

impl<T> AppendArena<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        let chunks = (0..capacity.div_ceil(CHUNK_SIZE))
            .map(|_| OnceLock::new())
            .collect();
        Self {
            chunks,
            reserved: AtomicUsize::new(0),
            capacity,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of reserved slots.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.reserved.load(Ordering::Acquire).min(self.capacity)
    }

    /// Reserve `count` consecutive slots. `None` once the capacity is
    /// exhausted; the arena stays full afterwards.
    pub(crate) fn reserve(&self, count: usize) -> Option<Range<usize>> {
        let start = self.reserved.fetch_add(count, Ordering::AcqRel);
        let end = start.checked_add(count)?;
        (end <= self.capacity).then_some(start..end)
    }

    /// Write slot `index`. Returns false if the index is out of bounds or the
    /// slot was already written.
    pub(crate) fn set(&self, index: usize, value: T) -> bool {
        if index >= self.capacity {
            return false;
        }
        let chunk = self.chunks[index >> CHUNK_BITS]
            .get_or_init(|| (0..CHUNK_SIZE).map(|_| OnceLock::new()).collect());
        chunk[index & CHUNK_MASK].set(value).is_ok()
    }

    #[inline]
    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        self.chunks
            .get(index >> CHUNK_BITS)?
            .get()?
            .get(index & CHUNK_MASK)?
            .get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_until_full() {
        let arena = AppendArena::<u32>::new(10);
        assert_eq!(arena.reserve(4), Some(0..4));
        assert_eq!(arena.reserve(6), Some(4..10));
        assert_eq!(arena.reserve(1), None);
        assert_eq!(arena.len(), 10);
    }

    #[test]
    fn test_write_once() {
        let arena = AppendArena::new(CHUNK_SIZE * 2 + 1);
        assert!(arena.set(CHUNK_SIZE * 2, 7u64));
        assert!(!arena.set(CHUNK_SIZE * 2, 8));
        assert!(!arena.set(CHUNK_SIZE * 3, 8));
        assert_eq!(arena.get(CHUNK_SIZE * 2), Some(&7));
        assert_eq!(arena.get(0), None);
        assert_eq!(arena.get(CHUNK_SIZE * 5), None);
    }

    #[test]
    fn test_concurrent_reservations_are_disjoint() {
        use std::sync::Arc;
        use std::thread;

        let arena = Arc::new(AppendArena::<usize>::new(4 * 250));
        let mut handles = vec![];
        for _ in 0..4 {
            let arena = Arc::clone(&arena);
            handles.push(thread::spawn(move || {
                for _ in 0..250 {
                    let range = arena.reserve(1).unwrap();
                    assert!(arena.set(range.start, range.start));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(arena.len(), 1000);
        assert!((0..1000).all(|i| arena.get(i) == Some(&i)));
    }
}
