// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;
use rayon::prelude::*;

use crate::core::{AtomicBitset, AtomicF32, SampleGrid};
use crate::tensors::TensorField;
use crate::update_kernels::{LocalSolve, Stencil};

/// How the samples of one active list are processed in a sweep pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    /// One thread; fully deterministic.
    Serial,
    /// Adaptive blocks on a rayon parallel iterator, each block with its own
    /// scratch and next list, merged by one thread after the pass.
    #[default]
    Parallel,
    /// A fixed set of pool tasks pulling fixed-size blocks from a shared
    /// atomic cursor, appending to one lock-free next list.
    ParallelX,
}

/// Target minimum number of samples per block for [`Concurrency::Parallel`].
pub const MIN_BLOCK_SAMPLES: usize = 64;
/// Maximum number of blocks for [`Concurrency::Parallel`].
pub const MAX_BLOCKS: usize = 256;
/// Block size for [`Concurrency::ParallelX`].
pub const POOL_BLOCK_SAMPLES: usize = 32;

/// Scratch space for one tensor, large enough for 3D.
type TensorScratch = [f32; 6];

/// Destination for samples activated during a pass.
pub(crate) trait NextList {
    fn add(&mut self, s: usize);
}

impl NextList for Vec<usize> {
    #[inline]
    fn add(&mut self, s: usize) {
        self.push(s);
    }
}

/// A next list shared by all pool tasks. The pending bit of a sample is set
/// when it enters the queue, so each sample is queued at most once per pass.
#[derive(Clone, Copy)]
struct SharedQueue<'a> {
    queue: &'a SegQueue<usize>,
    pending: &'a AtomicBitset,
}

impl NextList for SharedQueue<'_> {
    #[inline]
    fn add(&mut self, s: usize) {
        if self.pending.try_set(s) {
            self.queue.push(s);
        }
    }
}

/// Everything one source's sweep reads and writes.
///
/// `t` holds times for the current source only; a sample's entry is
/// meaningful only while the sample is activated in the grid's current
/// epoch. `times` and `marks` accumulate the minimum over all sources.
pub(crate) struct Sweep<'a, const N: usize, T> {
    pub(crate) grid: &'a SampleGrid<N>,
    pub(crate) tensors: &'a T,
    pub(crate) t: &'a [AtomicF32],
    pub(crate) times: &'a [AtomicF32],
    pub(crate) marks: &'a [AtomicI32],
    pub(crate) mark: i32,
    pub(crate) one_minus_epsilon: f32,
    pub(crate) neighbor_factor: f32,
}

impl<const N: usize, T: TensorField<N>> Sweep<'_, N, T>
where
    Stencil<N>: LocalSolve<N>,
{
    /// Time of sample `s` for the current source; infinite if not activated.
    #[inline]
    fn current_time(&self, s: usize) -> f32 {
        if self.grid.was_activated(s) {
            self.t[s].load()
        } else {
            f32::INFINITY
        }
    }

    /// Activate `s` and add it to the next list.
    #[inline]
    pub(crate) fn append<L: NextList>(&self, s: usize, next: &mut L) {
        self.grid.activate(s);
        next.add(s);
    }

    fn nabor_times(&self, s: usize) -> [[f32; 2]; N] {
        let mut nabors = [[f32::INFINITY; 2]; N];
        for (k, &off) in <Stencil<N> as LocalSolve<N>>::NEIGHBORS.iter().enumerate() {
            if let Some(j) = self.grid.offset(s, off) {
                nabors[k / 2][k % 2] = self.current_time(j);
            }
        }
        nabors
    }

    fn compute_time(&self, s: usize, sets: &[[i8; N]], d: &mut TensorScratch) -> f32 {
        self.tensors.tensor(self.grid.flat_to_nd(s), d);
        let tc = self.current_time(s);
        <Stencil<N> as LocalSolve<N>>::compute_time(d, tc, &self.nabor_times(s), sets)
    }

    /// Process one sample from the active list.
    ///
    /// Recomputes the sample from its whole neighborhood. If that changed
    /// its time by less than epsilon, the sample is converged: the global
    /// minimum is updated, and neighbors that improve are activated. Samples
    /// that have not converged go back on the next list.
    pub(crate) fn solve_one<L: NextList>(&self, s: usize, next: &mut L, d: &mut TensorScratch) {
        let ti = self.current_time(s);
        let ci = self.compute_time(s, <Stencil<N> as LocalSolve<N>>::ALL, d);
        self.t[s].store(ci);

        if ci >= ti * self.one_minus_epsilon {
            let time = self.times[s].load();

            // Neighbors are only worth checking while this source is close
            // to the best time seen so far. Work grows as the square of the
            // factor; a factor above one helps strongly anisotropic fields.
            let check_nabors = ci <= self.neighbor_factor * time;

            if ci < time && self.times[s].store_min(ci) {
                self.marks[s].store(self.mark, Ordering::Relaxed);
            }

            if check_nabors {
                let neighbors = <Stencil<N> as LocalSolve<N>>::NEIGHBORS;
                let toward = <Stencil<N> as LocalSolve<N>>::TOWARD;
                for (k, &off) in neighbors.iter().enumerate() {
                    let Some(j) = self.grid.offset(s, off) else {
                        continue;
                    };
                    let tj = self.current_time(j);
                    let cj = self.compute_time(j, toward[k], d);
                    if cj < tj * self.one_minus_epsilon {
                        self.t[j].store(cj);
                        self.append(j, next);
                    }
                }
            }
        } else {
            self.append(s, next);
        }
    }
}

#[derive(Default)]
struct BlockScratch {
    next: Vec<usize>,
    d: TensorScratch,
}

/// Work done by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SweepCounts {
    pub(crate) passes: u64,
    pub(crate) visits: u64,
}

/// Active list and the scratch reused by every sweep of one apply call.
#[derive(Default)]
pub(crate) struct SweepBuffers {
    pub(crate) active: Vec<usize>,
    next: Vec<usize>,
    blocks: Vec<BlockScratch>,
    queue: SegQueue<usize>,
    d: TensorScratch,
}

impl SweepBuffers {
    /// Process the active list until it is empty.
    pub(crate) fn run<const N: usize, T: TensorField<N>>(
        &mut self,
        sweep: &Sweep<'_, N, T>,
        concurrency: Concurrency,
        num_threads: usize,
    ) -> SweepCounts
    where
        Stencil<N>: LocalSolve<N>,
    {
        match concurrency {
            Concurrency::Serial => self.solve_serial(sweep),
            Concurrency::Parallel => self.solve_parallel(sweep),
            Concurrency::ParallelX => self.solve_parallel_x(sweep, num_threads),
        }
    }

    fn solve_serial<const N: usize, T: TensorField<N>>(
        &mut self,
        sweep: &Sweep<'_, N, T>,
    ) -> SweepCounts
    where
        Stencil<N>: LocalSolve<N>,
    {
        let SweepBuffers {
            active, next, d, ..
        } = self;
        let pending = sweep.grid.pending();
        let mut counts = SweepCounts::default();
        while !active.is_empty() {
            counts.passes += 1;
            counts.visits += active.len() as u64;
            for &s in active.iter() {
                sweep.solve_one(s, next, d);
            }
            active.clear();
            append_if_absent(active, pending, next);
            next.clear();
            settle(active, pending);
        }
        counts
    }

    fn solve_parallel<const N: usize, T: TensorField<N>>(
        &mut self,
        sweep: &Sweep<'_, N, T>,
    ) -> SweepCounts
    where
        Stencil<N>: LocalSolve<N>,
    {
        let SweepBuffers { active, blocks, .. } = self;
        let pending = sweep.grid.pending();
        let mut counts = SweepCounts::default();
        while !active.is_empty() {
            let n = active.len();
            counts.passes += 1;
            counts.visits += n as u64;

            let mbmax = MIN_BLOCK_SAMPLES.max(1 + (n - 1) / MAX_BLOCKS);
            let nb = 1 + (n - 1) / mbmax;
            let mb = 1 + (n - 1) / nb;
            if blocks.len() < nb {
                blocks.resize_with(nb, BlockScratch::default);
            }

            let current = active.as_slice();
            blocks[..nb]
                .par_iter_mut()
                .enumerate()
                .for_each(|(ib, block)| {
                    let i = (ib * mb).min(n);
                    let j = (i + mb).min(n);
                    for &s in &current[i..j] {
                        sweep.solve_one(s, &mut block.next, &mut block.d);
                    }
                });

            active.clear();
            for block in blocks[..nb].iter_mut() {
                append_if_absent(active, pending, &block.next);
                block.next.clear();
            }
            settle(active, pending);
        }
        counts
    }

    fn solve_parallel_x<const N: usize, T: TensorField<N>>(
        &mut self,
        sweep: &Sweep<'_, N, T>,
        num_threads: usize,
    ) -> SweepCounts
    where
        Stencil<N>: LocalSolve<N>,
    {
        let SweepBuffers { active, queue, .. } = self;
        let pending = sweep.grid.pending();
        let sink = SharedQueue {
            queue: &*queue,
            pending,
        };
        let mut counts = SweepCounts::default();
        while !active.is_empty() {
            let n = active.len();
            counts.passes += 1;
            counts.visits += n as u64;

            let mb = POOL_BLOCK_SAMPLES;
            let nb = 1 + (n - 1) / mb;
            let ntask = nb.min(num_threads.max(1));
            let cursor = AtomicUsize::new(0);
            let cursor = &cursor;
            let current = active.as_slice();

            // The scope is the barrier between passes.
            rayon::scope(|sc| {
                for _ in 0..ntask {
                    let mut sink = sink;
                    sc.spawn(move |_| {
                        let mut d = TensorScratch::default();
                        loop {
                            let ib = cursor.fetch_add(1, Ordering::Relaxed);
                            if ib >= nb {
                                break;
                            }
                            let i = ib * mb;
                            let j = (i + mb).min(n);
                            for &s in &current[i..j] {
                                sweep.solve_one(s, &mut sink, &mut d);
                            }
                        }
                    });
                }
            });

            active.clear();
            while let Some(s) = queue.pop() {
                pending.clear(s);
                active.push(s);
            }
        }
        counts
    }
}

/// Append samples from `next` that are not already pending, in order.
fn append_if_absent(active: &mut Vec<usize>, pending: &AtomicBitset, next: &[usize]) {
    active.reserve(next.len());
    for &s in next {
        if pending.try_set(s) {
            active.push(s);
        }
    }
}

/// Clear the pending bits of a freshly merged active list.
fn settle(active: &[usize], pending: &AtomicBitset) {
    for &s in active {
        pending.clear(s);
    }
}
