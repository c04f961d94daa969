// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::ThreadPool;
use slog::{debug, info, o, Logger};

use crate::core::{checked_strides, AtomicF32, SampleGrid};
use crate::error::{MarkerError, Result};
use crate::scheduler::{Concurrency, Sweep, SweepBuffers, SweepCounts};
use crate::tensors::TensorField;
use crate::time_heap::{HeapKind, TimeHeap};
use crate::update_kernels::{LocalSolve, Stencil};

/// Seed for the order in which known samples are used as sources.
pub const SHUFFLE_SEED: u64 = 314159;
/// Default relative change below which a sample counts as converged.
pub const DEFAULT_EPSILON: f32 = 0.001;
/// Default bound on re-examining neighbors, relative to the best known time.
pub const DEFAULT_NEIGHBOR_FACTOR: f32 = 1.5;

/// Order in which known samples are used as sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceOrder {
    /// Known samples adjacent to at least one unknown sample, in a
    /// pseudo-random order fixed by [`SHUFFLE_SEED`].
    #[default]
    Shuffled,
    /// Every known sample, ordered by a heap of times that is reduced as
    /// sweeps reach other pending known samples.
    ///
    /// The known sample nearest the grid center starts with the largest key.
    /// This is experimental; it can save work on some inputs but is not
    /// guaranteed to beat [`SourceOrder::Shuffled`].
    TimeHeap(HeapKind),
}

/// Progress information passed to the optional callback after each source.
pub struct ProgressInfo {
    /// Number of sources swept so far.
    pub sources_done: usize,
    /// Total number of sources for this call.
    pub sources_total: usize,
    /// Active-list entries processed so far, summed over all passes.
    pub samples_visited: u64,
    /// Elapsed time since the call started.
    pub elapsed: Duration,
}

/// Summary of the work done by one call to [`TimeMarker::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MarkerStats {
    /// Number of known samples used as sources.
    pub sources: usize,
    /// Sweep passes, summed over all sources.
    pub passes: u64,
    /// Active-list entries processed, summed over all passes.
    pub samples_visited: u64,
    /// Wall-clock time of the call.
    pub elapsed: Duration,
}

/// Mutable state for one call to [`TimeMarker::apply_with`].
///
/// Allocating this once and passing it to repeated calls avoids rebuilding
/// the sample grid and working arrays. A state may only be used by one call
/// at a time; the solver itself can be shared.
pub struct MarkerState<const N: usize> {
    grid: SampleGrid<N>,
    t: Vec<AtomicF32>,
    times: Vec<AtomicF32>,
    marks: Vec<AtomicI32>,
    buffers: SweepBuffers,
}

impl<const N: usize> MarkerState<N> {
    /// Allocate state for a grid of the given shape.
    ///
    /// # Errors
    /// Returns an error if any axis has zero samples.
    pub fn new(shape: [usize; N]) -> Result<Self> {
        let grid = SampleGrid::new(shape)?;
        let n = grid.num_samples();
        Ok(MarkerState {
            grid,
            t: (0..n).map(|_| AtomicF32::new(f32::INFINITY)).collect(),
            times: (0..n).map(|_| AtomicF32::new(f32::INFINITY)).collect(),
            marks: (0..n).map(|_| AtomicI32::new(0)).collect(),
            buffers: SweepBuffers::default(),
        })
    }

    /// The grid shape this state was allocated for.
    pub fn shape(&self) -> [usize; N] {
        self.grid.shape()
    }

    fn load(&mut self, times: &[f32], marks: &[i32]) {
        for (a, &t) in self.times.iter().zip(times) {
            a.store(if t == 0.0 { 0.0 } else { f32::INFINITY });
        }
        for (a, &m) in self.marks.iter().zip(marks) {
            a.store(m, Ordering::Relaxed);
        }
        self.buffers.active.clear();
    }

    fn store(&self, times: &mut [f32], marks: &mut [i32]) {
        for (i, (t, m)) in times.iter_mut().zip(marks.iter_mut()).enumerate() {
            if *t != 0.0 {
                *t = self.times[i].load();
                *m = self.marks[i].load(Ordering::Relaxed);
            }
        }
    }
}

/// Computes times to the nearest known samples, and marks identifying
/// those samples, under a field of metric tensors.
///
/// Known samples are those with time exactly zero. Each known sample that
/// can contribute is used in turn as a source: its times are swept outward
/// over an active list until they stop changing, and every sample keeps the
/// smallest time seen over all sources, along with that source's mark.
///
/// Works on 2D and 3D grids through [`TimeMarker2`] and [`TimeMarker3`].
///
/// Note: serial runs are bitwise reproducible. Parallel runs can differ at
/// floating-point rounding level, which can flip marks where two sources
/// are tied.
pub struct TimeMarker<const N: usize, T> {
    shape: [usize; N],
    tensors: T,
    concurrency: Concurrency,
    order: SourceOrder,
    epsilon: f32,
    neighbor_factor: f32,
    pool: Option<ThreadPool>,
    progress_callback: Option<Box<dyn Fn(ProgressInfo) + Send + Sync>>,
    log: Logger,
}

/// A 2D time marker.
pub type TimeMarker2<T> = TimeMarker<2, T>;
/// A 3D time marker.
pub type TimeMarker3<T> = TimeMarker<3, T>;

impl<const N: usize, T: TensorField<N>> TimeMarker<N, T>
where
    Stencil<N>: LocalSolve<N>,
{
    /// Create a time marker for a grid of the given shape.
    ///
    /// Shape is `[n1, n2]` or `[n1, n2, n3]`, with the last axis varying
    /// fastest in the flat `times` and `marks` arrays. Tensor component
    /// `d11` acts along the first axis; see [`TensorField`].
    ///
    /// # Errors
    /// Returns an error if any axis has zero samples.
    pub fn new(shape: [usize; N], tensors: T) -> Result<Self> {
        checked_strides(shape)?;
        Ok(TimeMarker {
            shape,
            tensors,
            concurrency: Concurrency::default(),
            order: SourceOrder::default(),
            epsilon: DEFAULT_EPSILON,
            neighbor_factor: DEFAULT_NEIGHBOR_FACTOR,
            pool: None,
            progress_callback: None,
            log: Logger::root(slog::Discard, o!()),
        })
    }

    /// Set the concurrency strategy (builder method). Default is
    /// [`Concurrency::Parallel`].
    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the order in which known samples are used as sources (builder
    /// method). Default is [`SourceOrder::Shuffled`].
    pub fn with_source_order(mut self, order: SourceOrder) -> Self {
        self.order = order;
        self
    }

    /// Set the convergence tolerance (builder method). Default is 0.001.
    ///
    /// # Errors
    /// Returns an error unless `0 < epsilon < 1`.
    pub fn with_epsilon(mut self, epsilon: f32) -> Result<Self> {
        if !(epsilon > 0.0 && epsilon < 1.0) {
            return Err(MarkerError::InvalidEpsilon(epsilon));
        }
        self.epsilon = epsilon;
        Ok(self)
    }

    /// Set the neighbor re-examination factor (builder method). Default is 1.5.
    ///
    /// A converged sample updates its neighbors only if its time is within
    /// this factor of the best time from earlier sources.
    ///
    /// # Errors
    /// Returns an error if the factor is less than one or not finite.
    pub fn with_neighbor_factor(mut self, factor: f32) -> Result<Self> {
        if !(factor.is_finite() && factor >= 1.0) {
            return Err(MarkerError::InvalidNeighborFactor(factor));
        }
        self.neighbor_factor = factor;
        Ok(self)
    }

    /// Run the parallel strategies on a dedicated pool of `threads` workers
    /// (builder method). The pool is built here and reused by every later
    /// call. If not specified, the global rayon pool is used.
    ///
    /// # Errors
    /// Returns an error if `threads` is zero or the pool cannot be built.
    pub fn with_threads(mut self, threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(MarkerError::InvalidThreadCount(threads));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| MarkerError::ThreadPool(e.to_string()))?;
        self.pool = Some(pool);
        Ok(self)
    }

    /// Log through a child of `parent_log` (builder method). Without one,
    /// log records are discarded.
    pub fn with_logger(mut self, parent_log: &Logger) -> Self {
        self.log = parent_log.new(o!("system" => "time_marker", "dim" => N));
        self
    }

    /// Set a progress callback invoked after each source (builder method).
    pub fn with_progress(mut self, callback: Box<dyn Fn(ProgressInfo) + Send + Sync>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Change the concurrency strategy for later calls.
    pub fn set_concurrency(&mut self, concurrency: Concurrency) {
        self.concurrency = concurrency;
    }

    /// Replace the tensor field for later calls.
    pub fn set_tensors(&mut self, tensors: T) {
        self.tensors = tensors;
    }

    /// Get the concurrency strategy.
    pub fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    /// Get the source order.
    pub fn source_order(&self) -> SourceOrder {
        self.order
    }

    /// Get a reference to the tensor field.
    pub fn tensors(&self) -> &T {
        &self.tensors
    }

    /// Get the grid shape.
    pub fn shape(&self) -> [usize; N] {
        self.shape
    }

    /// Allocate state for use with [`TimeMarker::apply_with`].
    pub fn new_state(&self) -> Result<MarkerState<N>> {
        MarkerState::new(self.shape)
    }

    /// Compute times and marks in place.
    ///
    /// Samples with `times` exactly zero are known; their times and marks
    /// are left bit-identical. All other times are ignored on input. On
    /// output each unknown sample holds its time to the nearest known sample
    /// and that sample's mark, or stays infinite with its mark unchanged if
    /// no known sample reaches it.
    ///
    /// # Errors
    /// Returns an error if either array length differs from the grid size.
    pub fn apply(&self, times: &mut [f32], marks: &mut [i32]) -> Result<MarkerStats> {
        let mut state = self.new_state()?;
        self.apply_with(&mut state, times, marks)
    }

    /// Like [`TimeMarker::apply`], reusing caller-owned state.
    ///
    /// # Errors
    /// As for [`TimeMarker::apply`], and also if `state` was allocated for
    /// a different shape.
    pub fn apply_with(
        &self,
        state: &mut MarkerState<N>,
        times: &mut [f32],
        marks: &mut [i32],
    ) -> Result<MarkerStats> {
        let n: usize = self.shape.iter().product();
        for got in [times.len(), marks.len(), state.grid.num_samples()] {
            if got != n {
                return Err(MarkerError::ShapeMismatch {
                    expected: self.shape.to_vec(),
                    got,
                });
            }
        }
        if state.shape() != self.shape {
            return Err(MarkerError::ShapeMismatch {
                expected: self.shape.to_vec(),
                got: state.grid.num_samples(),
            });
        }

        match (&self.pool, self.concurrency) {
            (Some(pool), Concurrency::Parallel | Concurrency::ParallelX) => {
                pool.install(|| self.run(state, times, marks))
            }
            _ => self.run(state, times, marks),
        }
    }

    /// Workers available to the parallel strategies.
    pub fn num_threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    fn run(
        &self,
        state: &mut MarkerState<N>,
        times: &mut [f32],
        marks: &mut [i32],
    ) -> Result<MarkerStats> {
        let start = Instant::now();
        state.load(times, marks);

        let mut stats = match self.order {
            SourceOrder::Shuffled => {
                let mut sources = boundary_known_samples(&state.grid, times);
                let mut rng = ChaCha8Rng::seed_from_u64(SHUFFLE_SEED);
                sources.shuffle(&mut rng);
                self.log_start(sources.len());

                let mut stats = MarkerStats {
                    sources: sources.len(),
                    ..MarkerStats::default()
                };
                for (isource, &k) in sources.iter().enumerate() {
                    let mark = state.marks[k].load(Ordering::Relaxed);
                    let counts = self.sweep_from(state, k, mark);
                    self.record(&mut stats, counts, isource + 1, start);
                }
                stats
            }
            SourceOrder::TimeHeap(kind) => self.run_heap(state, times, kind, start)?,
        };

        state.store(times, marks);
        stats.elapsed = start.elapsed();
        info!(self.log, "Time marker done";
            "sources" => stats.sources,
            "passes" => stats.passes,
            "samples_visited" => stats.samples_visited,
            "visits_per_sample" => stats.samples_visited as f64 / state.grid.num_samples() as f64,
            "elapsed" => format!("{:.3?}", stats.elapsed));
        Ok(stats)
    }

    fn run_heap(
        &self,
        state: &mut MarkerState<N>,
        times: &[f32],
        kind: HeapKind,
        start: Instant,
    ) -> Result<MarkerStats> {
        let mut heap = TimeHeap::new(kind, self.shape)?;
        let known: Vec<usize> = (0..times.len()).filter(|&s| times[s] == 0.0).collect();
        let center = nearest_to_center(&state.grid, &known);
        for &k in &known {
            let time = if Some(k) == center {
                f32::MAX
            } else {
                0.5 * f32::MAX
            };
            let mark = state.marks[k].load(Ordering::Relaxed);
            heap.insert(state.grid.flat_to_nd(k), time, mark);
        }
        for t in state.times.iter() {
            t.store(f32::INFINITY);
        }
        self.log_start(known.len());

        let mut stats = MarkerStats {
            sources: known.len(),
            ..MarkerStats::default()
        };
        let mut isource = 0;
        while let Some(entry) = heap.remove() {
            let k = state.grid.nd_to_flat(entry.index);
            state.times[k].store(0.0);
            state.marks[k].store(entry.mark, Ordering::Relaxed);
            let counts = self.sweep_from(state, k, entry.mark);
            update_time_heap(state, &mut heap, k, entry.mark);
            isource += 1;
            self.record(&mut stats, counts, isource, start);
        }
        Ok(stats)
    }

    /// Sweep times outward from known sample `k` until the active list empties.
    fn sweep_from(&self, state: &mut MarkerState<N>, k: usize, mark: i32) -> SweepCounts {
        state.grid.clear_activated();
        state.buffers.active.clear();
        state.t[k].store(0.0);
        let sweep = Sweep {
            grid: &state.grid,
            tensors: &self.tensors,
            t: &state.t,
            times: &state.times,
            marks: &state.marks,
            mark,
            one_minus_epsilon: 1.0 - self.epsilon,
            neighbor_factor: self.neighbor_factor,
        };
        sweep.append(k, &mut state.buffers.active);
        state
            .buffers
            .run(&sweep, self.concurrency, rayon::current_num_threads())
    }

    fn log_start(&self, sources: usize) {
        info!(self.log, "Time marker start";
            "shape" => format!("{:?}", self.shape),
            "sources" => sources,
            "concurrency" => format!("{:?}", self.concurrency),
            "order" => format!("{:?}", self.order));
    }

    fn record(&self, stats: &mut MarkerStats, counts: SweepCounts, done: usize, start: Instant) {
        stats.passes += counts.passes;
        stats.samples_visited += counts.visits;

        let step = (stats.sources / 100).max(1);
        if done % step == 0 || done == stats.sources {
            debug!(self.log, "Sources swept";
                "done" => done,
                "total" => stats.sources,
                "samples_visited" => stats.samples_visited,
                "elapsed" => format!("{:.3?}", start.elapsed()));
        }
        if let Some(cb) = &self.progress_callback {
            cb(ProgressInfo {
                sources_done: done,
                sources_total: stats.sources,
                samples_visited: stats.samples_visited,
                elapsed: start.elapsed(),
            });
        }
    }
}

/// Known samples with at least one unknown face neighbor.
fn boundary_known_samples<const N: usize>(grid: &SampleGrid<N>, times: &[f32]) -> Vec<usize>
where
    Stencil<N>: LocalSolve<N>,
{
    let neighbors = <Stencil<N> as LocalSolve<N>>::NEIGHBORS;
    (0..grid.num_samples())
        .filter(|&s| {
            times[s] == 0.0
                && neighbors
                    .iter()
                    .any(|&off| grid.offset(s, off).is_some_and(|j| times[j] != 0.0))
        })
        .collect()
}

/// The first of `samples` closest to the grid center.
fn nearest_to_center<const N: usize>(grid: &SampleGrid<N>, samples: &[usize]) -> Option<usize> {
    let shape = grid.shape();
    let mut best = None;
    let mut dmin = u64::MAX;
    for &s in samples {
        let idx = grid.flat_to_nd(s);
        let d: u64 = (0..N)
            .map(|a| {
                let c = (shape[a] / 2) as i64;
                let di = idx[a] as i64 - c;
                (di * di) as u64
            })
            .sum();
        if d < dmin {
            dmin = d;
            best = Some(s);
        }
    }
    best
}

/// Reduce heap keys of pending known samples reached by the last sweep.
///
/// Flood-fills from `k` over the samples the sweep activated. Known samples
/// still in the heap whose mark is now `mark` take their new time as key.
fn update_time_heap<const N: usize>(
    state: &MarkerState<N>,
    heap: &mut TimeHeap<N>,
    k: usize,
    mark: i32,
) where
    Stencil<N>: LocalSolve<N>,
{
    let grid = &state.grid;
    let mut stack = vec![k];
    grid.deactivate(k);
    while let Some(s) = stack.pop() {
        if state.marks[s].load(Ordering::Relaxed) == mark {
            let idx = grid.flat_to_nd(s);
            if let Some(key) = heap.time(idx) {
                let time = state.times[s].load();
                if time < key {
                    heap.reduce(idx, time);
                }
            }
        }
        for &off in <Stencil<N> as LocalSolve<N>>::NEIGHBORS {
            if let Some(j) = grid.offset(s, off) {
                if grid.was_activated(j) {
                    grid.deactivate(j);
                    stack.push(j);
                }
            }
        }
    }
}
