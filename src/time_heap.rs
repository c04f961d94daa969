// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use crate::core::{checked_strides, nd_to_flat};
use crate::error::Result;

/// Which extreme sits at the top of a [`TimeHeap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapKind {
    /// Smallest time on top.
    Min,
    /// Largest time on top.
    Max,
}

/// A heap entry: sample indices, a time, and a caller-defined mark.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeapEntry<const N: usize> {
    /// Sample indices.
    pub index: [usize; N],
    /// Heap key.
    pub time: f32,
    /// Carried along for the caller; not used for ordering.
    pub mark: i32,
}

const NOT_IN_HEAP: usize = usize::MAX;

/// A binary min- or max-heap of times sampled on a grid.
///
/// A dense map from grid sample to heap slot gives O(1) membership tests
/// and lets [`TimeHeap::reduce`] find an entry without searching. Insert,
/// remove and reduce are O(log K) for K entries.
pub struct TimeHeap<const N: usize> {
    kind: HeapKind,
    shape: [usize; N],
    strides: [usize; N],
    slots: Vec<usize>,
    entries: Vec<(usize, HeapEntry<N>)>,
}

impl<const N: usize> TimeHeap<N> {
    /// Create an empty heap for a grid of the given shape.
    ///
    /// # Errors
    /// Returns an error if any axis has zero samples.
    pub fn new(kind: HeapKind, shape: [usize; N]) -> Result<Self> {
        let strides = checked_strides(shape)?;
        Ok(TimeHeap {
            kind,
            shape,
            strides,
            slots: vec![NOT_IN_HEAP; shape.iter().product()],
            entries: Vec::new(),
        })
    }

    /// The heap kind.
    pub fn kind(&self) -> HeapKind {
        self.kind
    }

    /// The grid shape this heap indexes.
    pub fn shape(&self) -> [usize; N] {
        self.shape
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the heap has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether an entry with these indices is in the heap.
    pub fn contains(&self, index: [usize; N]) -> bool {
        self.slot_of(nd_to_flat(self.strides, index)).is_some()
    }

    /// Time of the entry with these indices, if present.
    pub fn time(&self, index: [usize; N]) -> Option<f32> {
        self.slot_of(nd_to_flat(self.strides, index))
            .map(|i| self.entries[i].1.time)
    }

    /// The top entry, without removing it.
    pub fn peek(&self) -> Option<&HeapEntry<N>> {
        self.entries.first().map(|(_, e)| e)
    }

    /// Insert a new entry.
    ///
    /// # Panics
    /// Panics if an entry with the same indices is already in the heap.
    pub fn insert(&mut self, index: [usize; N], time: f32, mark: i32) {
        let flat = nd_to_flat(self.strides, index);
        assert!(
            self.slot_of(flat).is_none(),
            "entry with indices {:?} is already in the heap",
            index
        );
        let i = self.entries.len();
        self.entries.push((flat, HeapEntry { index, time, mark }));
        self.slots[flat] = i;
        self.sift_up(i);
    }

    /// Lower the time of an existing entry.
    ///
    /// # Panics
    /// Panics if no entry has these indices or if `time` is not strictly
    /// less than the entry's current time.
    pub fn reduce(&mut self, index: [usize; N], time: f32) {
        let flat = nd_to_flat(self.strides, index);
        let i = match self.slot_of(flat) {
            Some(i) => i,
            None => panic!("entry with indices {:?} is not in the heap", index),
        };
        let old = self.entries[i].1.time;
        assert!(
            time < old,
            "reduced time {} is not less than time {} in heap",
            time,
            old
        );
        self.entries[i].1.time = time;
        match self.kind {
            HeapKind::Min => self.sift_up(i),
            HeapKind::Max => self.sift_down(i),
        }
    }

    /// Remove and return the top entry.
    pub fn remove(&mut self) -> Option<HeapEntry<N>> {
        if self.entries.is_empty() {
            return None;
        }
        let last = self.entries.len() - 1;
        self.swap(0, last);
        let (flat, top) = self.entries.pop()?;
        self.slots[flat] = NOT_IN_HEAP;
        if !self.entries.is_empty() {
            self.sift_down(0);
        }
        Some(top)
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        for &(flat, _) in &self.entries {
            self.slots[flat] = NOT_IN_HEAP;
        }
        self.entries.clear();
    }

    fn slot_of(&self, flat: usize) -> Option<usize> {
        let i = self.slots[flat];
        if i < self.entries.len() && self.entries[i].0 == flat {
            Some(i)
        } else {
            None
        }
    }

    /// Whether a time belongs above b's in the heap.
    #[inline]
    fn above(&self, a: f32, b: f32) -> bool {
        match self.kind {
            HeapKind::Min => a < b,
            HeapKind::Max => a > b,
        }
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.entries.swap(i, j);
        self.slots[self.entries[i].0] = i;
        self.slots[self.entries[j].0] = j;
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let p = (i - 1) / 2;
            if !self.above(self.entries[i].1.time, self.entries[p].1.time) {
                break;
            }
            self.swap(i, p);
            i = p;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.entries.len();
        loop {
            let l = 2 * i + 1;
            if l >= n {
                break;
            }
            let r = l + 1;
            let mut c = l;
            if r < n && self.above(self.entries[r].1.time, self.entries[l].1.time) {
                c = r;
            }
            if !self.above(self.entries[c].1.time, self.entries[i].1.time) {
                break;
            }
            self.swap(i, c);
            i = c;
        }
    }

    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let n = self.entries.len();
        (0..n).all(|i| self.slots[self.entries[i].0] == i)
            && (1..n).all(|i| {
                let p = (i - 1) / 2;
                !self.above(self.entries[i].1.time, self.entries[p].1.time)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn fill_and_drain(kind: HeapKind) {
        let shape = [9, 11, 13];
        let mut heap = TimeHeap::<3>::new(kind, shape).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut expected = Vec::new();
        for i in 0..shape[0] {
            for j in 0..shape[1] {
                for k in 0..shape[2] {
                    let t: f32 = rng.gen();
                    heap.insert([i, j, k], t, 0);
                    expected.push(t - 0.5);
                }
            }
        }
        assert!(heap.is_consistent());

        let mut it = expected.iter();
        for i in 0..shape[0] {
            for j in 0..shape[1] {
                for k in 0..shape[2] {
                    heap.reduce([i, j, k], *it.next().unwrap());
                }
            }
        }
        assert!(heap.is_consistent());
        assert_eq!(heap.len(), expected.len());

        expected.sort_by(|a, b| a.partial_cmp(b).unwrap());
        if kind == HeapKind::Max {
            expected.reverse();
        }
        for t in expected {
            let e = heap.remove().unwrap();
            assert_eq!(e.time, t);
        }
        assert!(heap.is_empty());
        assert!(heap.remove().is_none());
    }

    #[test]
    fn min_heap_order_after_reduce() {
        fill_and_drain(HeapKind::Min);
    }

    #[test]
    fn max_heap_order_after_reduce() {
        fill_and_drain(HeapKind::Max);
    }

    #[test]
    fn contains_and_time() {
        let mut heap = TimeHeap::<2>::new(HeapKind::Max, [4, 4]).unwrap();
        heap.insert([1, 2], 3.0, 7);
        heap.insert([3, 0], 5.0, 8);
        assert!(heap.contains([1, 2]));
        assert!(!heap.contains([2, 1]));
        assert_eq!(heap.time([3, 0]), Some(5.0));
        assert_eq!(heap.peek().map(|e| e.mark), Some(8));

        heap.reduce([3, 0], 1.0);
        assert_eq!(heap.peek().map(|e| e.index), Some([1, 2]));

        let e = heap.remove().unwrap();
        assert_eq!((e.index, e.mark), ([1, 2], 7));
        assert!(!heap.contains([1, 2]));
        assert!(heap.is_consistent());
    }

    #[test]
    fn clear_resets_membership() {
        let mut heap = TimeHeap::<2>::new(HeapKind::Min, [3, 3]).unwrap();
        heap.insert([0, 0], 1.0, 0);
        heap.insert([2, 2], 2.0, 0);
        heap.clear();
        assert!(heap.is_empty());
        assert!(!heap.contains([0, 0]));
        heap.insert([0, 0], 4.0, 1);
        assert_eq!(heap.len(), 1);
    }

    #[test]
    #[should_panic(expected = "already in the heap")]
    fn duplicate_insert_panics() {
        let mut heap = TimeHeap::<2>::new(HeapKind::Min, [3, 3]).unwrap();
        heap.insert([1, 1], 1.0, 0);
        heap.insert([1, 1], 2.0, 0);
    }

    #[test]
    #[should_panic(expected = "not less than")]
    fn reduce_to_larger_panics() {
        let mut heap = TimeHeap::<2>::new(HeapKind::Max, [3, 3]).unwrap();
        heap.insert([1, 1], 1.0, 0);
        heap.reduce([1, 1], 2.0);
    }

    #[test]
    #[should_panic(expected = "not in the heap")]
    fn reduce_missing_panics() {
        let mut heap = TimeHeap::<2>::new(HeapKind::Min, [3, 3]).unwrap();
        heap.reduce([0, 1], 0.5);
    }
}
