// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::error::{MarkerError, Result};

/// An `f32` stored as raw bits in an `AtomicU32`.
///
/// Loads and stores are relaxed; ordering between a sample's time and its
/// activation epoch is carried by the epoch (see [`SampleGrid::activate`]).
#[derive(Debug)]
#[repr(transparent)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    /// Create a new atomic float.
    pub fn new(v: f32) -> Self {
        AtomicF32(AtomicU32::new(v.to_bits()))
    }

    /// Load the current value.
    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Store a new value.
    #[inline]
    pub fn store(&self, v: f32) {
        self.0.store(v.to_bits(), Ordering::Relaxed);
    }

    /// Store `v` only if it is strictly smaller than the current value.
    /// Returns true if the store happened.
    pub fn store_min(&self, v: f32) -> bool {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            if f32::from_bits(current) <= v {
                return false;
            }
            match self.0.compare_exchange_weak(
                current,
                v.to_bits(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Fixed-size set of flags that can be set and cleared from many threads.
pub(crate) struct AtomicBitset {
    bits: Box<[AtomicU64]>,
}

impl AtomicBitset {
    pub(crate) fn new(num_bits: usize) -> Self {
        let num_words = num_bits.div_ceil(64);
        let bits: Box<[AtomicU64]> = (0..num_words)
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        AtomicBitset { bits }
    }

    /// Set bit `id`; returns true if it was previously clear.
    pub(crate) fn try_set(&self, id: usize) -> bool {
        let word = id / 64;
        let bit = 1u64 << (id % 64);
        let prev = self.bits[word].fetch_or(bit, Ordering::AcqRel);
        (prev & bit) == 0
    }

    pub(crate) fn clear(&self, id: usize) {
        let word = id / 64;
        let bit = 1u64 << (id % 64);
        self.bits[word].fetch_and(!bit, Ordering::Release);
    }

    pub(crate) fn is_set(&self, id: usize) -> bool {
        let word = id / 64;
        let bit = 1u64 << (id % 64);
        self.bits[word].load(Ordering::Acquire) & bit != 0
    }
}

/// One grid cell: its indices and the epoch in which it was last activated.
#[derive(Debug)]
pub struct Sample<const N: usize> {
    index: [usize; N],
    activated: AtomicU32,
}

impl<const N: usize> Sample<N> {
    /// Grid indices of this sample.
    pub fn index(&self) -> [usize; N] {
        self.index
    }
}

/// Fixed-size grid of samples reused across every source sweep.
///
/// "Has this sample been computed for the current source?" is answered by
/// comparing the sample's activation epoch against the grid's current epoch,
/// so starting a new source costs O(1) instead of clearing every flag. The
/// full reset only happens when the epoch counter wraps.
///
/// The grid also owns the pending flags used to keep active lists free of
/// duplicates. Indices are row-major: the last axis varies fastest.
pub struct SampleGrid<const N: usize> {
    shape: [usize; N],
    strides: [usize; N],
    samples: Box<[Sample<N>]>,
    epoch: u32,
    pending: AtomicBitset,
}

impl<const N: usize> SampleGrid<N> {
    /// Create a sample grid with the given shape.
    ///
    /// # Errors
    /// Returns an error if any axis has zero samples.
    pub fn new(shape: [usize; N]) -> Result<Self> {
        assert!(N == 2 || N == 3, "SampleGrid only supports N=2 or N=3");
        let strides = checked_strides(shape)?;
        let num_samples: usize = shape.iter().product();

        let samples: Box<[Sample<N>]> = (0..num_samples)
            .map(|flat| Sample {
                index: flat_to_nd(strides, flat),
                activated: AtomicU32::new(0),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(SampleGrid {
            shape,
            strides,
            samples,
            epoch: 1,
            pending: AtomicBitset::new(num_samples),
        })
    }

    /// Get the grid shape.
    pub fn shape(&self) -> [usize; N] {
        self.shape
    }

    /// Get the row-major strides.
    pub fn strides(&self) -> [usize; N] {
        self.strides
    }

    /// Get the total number of samples.
    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    /// Get the sample at a flat index.
    pub fn sample(&self, flat: usize) -> &Sample<N> {
        &self.samples[flat]
    }

    /// Convert a flat index to an N-dimensional index.
    pub fn flat_to_nd(&self, flat: usize) -> [usize; N] {
        self.samples[flat].index
    }

    /// Convert an N-dimensional index to a flat index.
    pub fn nd_to_flat(&self, idx: [usize; N]) -> usize {
        nd_to_flat(self.strides, idx)
    }

    /// Flat index of the sample at `offset` from sample `flat`, or `None`
    /// if that falls outside the grid.
    #[inline]
    pub fn offset(&self, flat: usize, offset: [i8; N]) -> Option<usize> {
        let index = self.samples[flat].index;
        let mut j = 0;
        for d in 0..N {
            let jd = index[d] as isize + offset[d] as isize;
            if jd < 0 || jd >= self.shape[d] as isize {
                return None;
            }
            j += jd as usize * self.strides[d];
        }
        Some(j)
    }

    /// The current activation epoch.
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Start a new epoch so that no sample counts as activated.
    pub fn clear_activated(&mut self) {
        if self.epoch == u32::MAX {
            self.epoch = 1;
            for s in self.samples.iter() {
                s.activated.store(0, Ordering::Relaxed);
            }
        } else {
            self.epoch += 1;
        }
    }

    /// Mark a sample activated in the current epoch. Publishes any time
    /// written for the sample before this call.
    #[inline]
    pub fn activate(&self, flat: usize) {
        self.samples[flat]
            .activated
            .store(self.epoch, Ordering::Release);
    }

    /// Remove a single sample from the current epoch.
    #[inline]
    pub fn deactivate(&self, flat: usize) {
        self.samples[flat].activated.store(0, Ordering::Relaxed);
    }

    /// Whether a sample was activated in the current epoch.
    #[inline]
    pub fn was_activated(&self, flat: usize) -> bool {
        self.samples[flat].activated.load(Ordering::Acquire) == self.epoch
    }

    pub(crate) fn pending(&self) -> &AtomicBitset {
        &self.pending
    }

    #[cfg(test)]
    pub(crate) fn set_epoch(&mut self, epoch: u32) {
        self.epoch = epoch;
    }
}

/// Validate a grid shape and compute its row-major strides.
#[allow(clippy::needless_range_loop)]
pub(crate) fn checked_strides<const N: usize>(shape: [usize; N]) -> Result<[usize; N]> {
    for (axis, &size) in shape.iter().enumerate() {
        if size == 0 {
            return Err(MarkerError::InvalidGridShape { axis, size });
        }
    }
    let mut strides = [0usize; N];
    strides[N - 1] = 1;
    for d in (0..N - 1).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    Ok(strides)
}

#[allow(clippy::needless_range_loop)]
pub(crate) fn flat_to_nd<const N: usize>(strides: [usize; N], flat: usize) -> [usize; N] {
    let mut idx = [0usize; N];
    let mut remainder = flat;
    for d in 0..N {
        idx[d] = remainder / strides[d];
        remainder %= strides[d];
    }
    idx
}

pub(crate) fn nd_to_flat<const N: usize>(strides: [usize; N], idx: [usize; N]) -> usize {
    idx.iter().zip(strides.iter()).map(|(i, s)| i * s).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn flat_nd_roundtrip_2d() {
        let grid = SampleGrid::<2>::new([12, 8]).unwrap();
        for flat in 0..96 {
            let nd = grid.flat_to_nd(flat);
            assert_eq!(grid.nd_to_flat(nd), flat, "flat={} nd={:?}", flat, nd);
        }
    }

    #[test]
    fn flat_nd_roundtrip_3d() {
        let grid = SampleGrid::<3>::new([4, 5, 6]).unwrap();
        for flat in 0..120 {
            let nd = grid.flat_to_nd(flat);
            assert_eq!(grid.nd_to_flat(nd), flat);
        }
        assert_eq!(grid.strides(), [30, 6, 1]);
    }

    #[test]
    fn offset_respects_bounds() {
        let grid = SampleGrid::<2>::new([3, 4]).unwrap();
        let corner = grid.nd_to_flat([0, 0]);
        assert_eq!(grid.offset(corner, [-1, 0]), None);
        assert_eq!(grid.offset(corner, [0, -1]), None);
        assert_eq!(grid.offset(corner, [1, 1]), Some(grid.nd_to_flat([1, 1])));

        let far = grid.nd_to_flat([2, 3]);
        assert_eq!(grid.offset(far, [1, 0]), None);
        assert_eq!(grid.offset(far, [0, 1]), None);
        assert_eq!(grid.offset(far, [-1, -1]), Some(grid.nd_to_flat([1, 2])));
    }

    #[test]
    fn single_sample_grid() {
        let grid = SampleGrid::<3>::new([1, 1, 1]).unwrap();
        assert_eq!(grid.num_samples(), 1);
        assert_eq!(grid.offset(0, [0, 0, 1]), None);
    }

    #[test]
    fn zero_axis_rejected() {
        let result = SampleGrid::<3>::new([4, 0, 2]);
        assert!(matches!(
            result,
            Err(MarkerError::InvalidGridShape { axis: 1, size: 0 })
        ));
    }

    #[test]
    fn epochs_clear_activation() {
        let mut grid = SampleGrid::<2>::new([4, 4]).unwrap();
        assert!(!grid.was_activated(5));
        grid.activate(5);
        assert!(grid.was_activated(5));
        grid.clear_activated();
        assert!(!grid.was_activated(5));
        grid.activate(5);
        grid.deactivate(5);
        assert!(!grid.was_activated(5));
    }

    #[test]
    fn epoch_wraparound_resets_all() {
        let mut grid = SampleGrid::<2>::new([4, 4]).unwrap();
        grid.set_epoch(u32::MAX);
        grid.activate(3);
        assert!(grid.was_activated(3));
        grid.clear_activated();
        assert_eq!(grid.epoch(), 1);
        assert!(!grid.was_activated(3));
        grid.activate(7);
        assert!(grid.was_activated(7));
        assert!(!grid.was_activated(3));
    }

    #[test]
    fn store_min_monotonicity() {
        let t = AtomicF32::new(f32::INFINITY);
        assert!(t.store_min(10.0));
        assert!(t.store_min(5.0));
        assert!(!t.store_min(7.0));
        assert!(!t.store_min(5.0));
        assert_eq!(t.load(), 5.0);
    }

    #[test]
    fn bitset_set_clear() {
        let bs = AtomicBitset::new(128);
        assert!(bs.try_set(0));
        assert!(!bs.try_set(0));
        assert!(bs.is_set(0));
        bs.clear(0);
        assert!(!bs.is_set(0));
        assert!(bs.try_set(0));

        assert!(bs.try_set(63));
        assert!(bs.try_set(64));
        assert!(bs.try_set(127));
    }

    #[test]
    fn bitset_concurrent() {
        let bs = Arc::new(AtomicBitset::new(1024));
        let success_count = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let bs = Arc::clone(&bs);
            let sc = Arc::clone(&success_count);
            handles.push(std::thread::spawn(move || {
                for id in 0..1024 {
                    if bs.try_set(id) {
                        sc.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(success_count.load(Ordering::Relaxed), 1024);
    }
}
