//! State storage for exploration.

use crate::arena::AppendArena;
use crate::resolver::ChoicePath;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use faultline_model::FaultSet;

/// How a state was first reached.
#[derive(Debug, Clone, PartialEq)]
pub struct StateInfo {
    /// Predecessor index (None for initial states).
    pub predecessor: Option<u32>,
    /// Options taken on the path from the predecessor.
    pub choices: ChoicePath,
    /// Faults active on that transition.
    pub faults: FaultSet,
    /// Number of steps from the initial states.
    pub depth: u32,
}

/// Result of [`StateStore::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inserted {
    pub index: u32,
    pub is_new: bool,
}

/// Thread-safe map from state vectors to dense indices.
///
/// Indices are handed out in insertion order starting at 0 and never change.
/// Optionally records the first predecessor of every state for trace
/// reconstruction.
pub struct StateStore {
    indices: DashMap<Box<[u8]>, u32, ahash::RandomState>,
    vectors: AppendArena<Box<[u8]>>,
    info: Option<AppendArena<StateInfo>>,
}

impl StateStore {
    pub fn new(capacity: usize, track_predecessors: bool) -> Self {
        Self {
            indices: DashMap::with_hasher(ahash::RandomState::new()),
            vectors: AppendArena::new(capacity),
            info: track_predecessors.then(|| AppendArena::new(capacity)),
        }
    }

    /// Look up `vector`, inserting it if it is new. `info` is only called for
    /// new states. Returns `None` once the capacity is exhausted.
    pub fn insert<F>(&self, vector: &[u8], info: F) -> Option<Inserted>
    where
        F: FnOnce() -> StateInfo,
    {
        if let Some(index) = self.indices.get(vector) {
            return Some(Inserted {
                index: *index,
                is_new: false,
            });
        }

        // The entry keeps the shard locked, so concurrent inserts of the same
        // vector wait here and observe the index assigned below.
        match self.indices.entry(Box::from(vector)) {
            Entry::Occupied(occupied) => Some(Inserted {
                index: *occupied.get(),
                is_new: false,
            }),
            Entry::Vacant(vacant) => {
                let index = self.vectors.reserve(1)?.start;
                self.vectors.set(index, vacant.key().clone());
                if let Some(arena) = &self.info {
                    arena.set(index, info());
                }
                vacant.insert(index as u32);
                Some(Inserted {
                    index: index as u32,
                    is_new: true,
                })
            }
        }
    }

    #[inline]
    pub fn contains(&self, vector: &[u8]) -> bool {
        self.indices.contains_key(vector)
    }

    pub fn index_of(&self, vector: &[u8]) -> Option<u32> {
        self.indices.get(vector).map(|r| *r)
    }

    /// Vector of the state with `index`.
    #[inline]
    pub fn vector(&self, index: usize) -> Option<&[u8]> {
        self.vectors.get(index).map(|v| &**v)
    }

    /// Number of states stored.
    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.vectors.capacity()
    }

    #[inline]
    pub fn has_predecessors(&self) -> bool {
        self.info.is_some()
    }

    /// Returns None if predecessors are not tracked.
    pub fn info(&self, index: usize) -> Option<&StateInfo> {
        self.info.as_ref()?.get(index)
    }

    /// Indices from an initial state to `index`, in path order.
    /// Returns empty trace if predecessors are not tracked.
    pub fn trace_to(&self, index: u32) -> Vec<u32> {
        let mut trace = Vec::new();
        let mut current = Some(index);
        while let Some(state) = current {
            let Some(info) = self.info(state as usize) else {
                return Vec::new();
            };
            trace.push(state);
            current = info.predecessor;
        }
        trace.reverse();
        trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(predecessor: Option<u32>, depth: u32) -> StateInfo {
        StateInfo {
            predecessor,
            choices: ChoicePath::new(),
            faults: FaultSet::EMPTY,
            depth,
        }
    }

    #[test]
    fn test_store_insert() {
        let store = StateStore::new(8, false);

        assert_eq!(
            store.insert(&[1], || info(None, 0)),
            Some(Inserted {
                index: 0,
                is_new: true
            })
        );
        assert_eq!(store.insert(&[1], || info(None, 0)).map(|i| i.is_new), Some(false)); // duplicate
        assert_eq!(store.insert(&[2], || info(None, 0)).map(|i| i.index), Some(1));

        assert_eq!(store.len(), 2);
        assert_eq!(store.vector(1), Some(&[2u8][..]));
        assert!(store.info(0).is_none());
    }

    #[test]
    fn test_capacity_is_enforced() {
        let store = StateStore::new(2, false);
        assert!(store.insert(&[0], || info(None, 0)).is_some());
        assert!(store.insert(&[1], || info(None, 0)).is_some());
        assert!(store.insert(&[2], || info(None, 0)).is_none());
        // Known states are still found.
        assert_eq!(store.insert(&[1], || info(None, 0)).map(|i| i.index), Some(1));
    }

    #[test]
    fn test_trace_reconstruction() {
        let store = StateStore::new(8, true);

        store.insert(&[0], || info(None, 0));
        store.insert(&[1], || info(Some(0), 1));
        store.insert(&[2], || info(Some(1), 2));
        // A second path to state 2 does not overwrite its predecessor.
        store.insert(&[2], || info(Some(0), 1));

        assert_eq!(store.trace_to(2), vec![0, 1, 2]);
        assert_eq!(store.info(2).map(|i| i.depth), Some(2));
        assert!(StateStore::new(8, false).trace_to(0).is_empty());
    }

    #[test]
    fn test_concurrent_insert() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(StateStore::new(1024, true));
        let mut handles = vec![];

        // Overlapping ranges: every vector is inserted by two threads.
        for t in 0..4u32 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for i in 0..200u32 {
                    let value = (t / 2) * 1000 + i;
                    store.insert(&value.to_le_bytes(), || info(None, 0));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 400);
        for index in 0..400 {
            let vector = store.vector(index).unwrap();
            assert_eq!(store.index_of(vector), Some(index as u32));
        }
    }
}
