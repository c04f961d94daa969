// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Anisotropic time marking on 2D and 3D grids.
//!
//! Given a grid in which some samples are known (time exactly zero), this
//! library computes for every other sample the travel time to the nearest
//! known sample under a field of symmetric positive-definite metric tensors,
//! together with the mark (an integer label) of that nearest sample. The
//! marks form a generalized Voronoi partition of the grid.
//!
//! Each known sample is swept outward over an active list with a local
//! anisotropic eikonal update in the style of Jeong and Whitaker's fast
//! iterative method, and per-sample minima are kept across sources. Sweep
//! passes can run serially or on a rayon thread pool.
//!
//! ```
//! use eikonal_marker::{Concurrency, ConstantTensors, TimeMarker2};
//!
//! let marker = TimeMarker2::new([5, 5], ConstantTensors::identity())?
//!     .with_concurrency(Concurrency::Serial);
//! let mut times = vec![1.0f32; 25];
//! let mut marks = vec![0i32; 25];
//! times[12] = 0.0;
//! marks[12] = 1;
//! marker.apply(&mut times, &mut marks)?;
//! assert!((times[13] - 1.0).abs() < 1e-5);
//! assert!(marks.iter().all(|&m| m == 1));
//! # Ok::<(), eikonal_marker::MarkerError>(())
//! ```

#![warn(missing_docs)]

/// Sample grid, activation epochs and atomic helpers.
pub mod core;
/// Error types for the library.
pub mod error;
/// The time marker: outer driver over known samples.
pub mod marker;
/// Active-list sweeps: serial and parallel passes.
pub mod scheduler;
/// Tensor field accessors.
pub mod tensors;
/// Min/max heap of grid times.
pub mod time_heap;
/// Anisotropic eikonal update kernels for 2D and 3D grids.
pub mod update_kernels;

pub use crate::core::SampleGrid;
pub use crate::error::{MarkerError, Result};
pub use crate::marker::{
    MarkerState, MarkerStats, ProgressInfo, SourceOrder, TimeMarker, TimeMarker2, TimeMarker3,
};
pub use crate::scheduler::Concurrency;
pub use crate::tensors::{ConstantTensors, DenseTensors, IsotropicTensors, TensorField};
pub use crate::time_heap::{HeapEntry, HeapKind, TimeHeap};
