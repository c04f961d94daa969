// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::fmt;

/// Errors that can occur while configuring a time marker or applying it.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerError {
    /// Grid shape is invalid (an axis has no samples).
    InvalidGridShape {
        /// The axis index.
        axis: usize,
        /// The size provided.
        size: usize,
    },
    /// Array length does not match the number of grid samples.
    ShapeMismatch {
        /// The expected grid shape.
        expected: Vec<usize>,
        /// The length actually supplied.
        got: usize,
    },
    /// Dense tensor storage has the wrong number of components.
    TensorLengthMismatch {
        /// The expected number of components.
        expected: usize,
        /// The number of components supplied.
        got: usize,
    },
    /// Convergence epsilon is not in the open interval (0, 1).
    InvalidEpsilon(f32),
    /// Neighbor recheck factor is not finite or less than one.
    InvalidNeighborFactor(f32),
    /// Requested worker thread count is zero.
    InvalidThreadCount(usize),
    /// The worker thread pool could not be built.
    ThreadPool(String),
}

impl fmt::Display for MarkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerError::InvalidGridShape { axis, size } => {
                write!(
                    f,
                    "invalid grid shape: axis {} has size {} (must be >= 1)",
                    axis, size
                )
            }
            MarkerError::ShapeMismatch { expected, got } => {
                write!(
                    f,
                    "shape mismatch: grid {:?} needs {} samples, got {}",
                    expected,
                    expected.iter().product::<usize>(),
                    got
                )
            }
            MarkerError::TensorLengthMismatch { expected, got } => {
                write!(
                    f,
                    "tensor length mismatch: expected {} components, got {}",
                    expected, got
                )
            }
            MarkerError::InvalidEpsilon(eps) => {
                write!(f, "invalid epsilon: {} (must be in (0, 1))", eps)
            }
            MarkerError::InvalidNeighborFactor(factor) => {
                write!(
                    f,
                    "invalid neighbor factor: {} (must be finite and >= 1)",
                    factor
                )
            }
            MarkerError::InvalidThreadCount(n) => {
                write!(f, "invalid thread count: {} (must be >= 1)", n)
            }
            MarkerError::ThreadPool(msg) => write!(f, "thread pool error: {}", msg),
        }
    }
}

impl std::error::Error for MarkerError {}

/// Convenience type alias for Results with MarkerError.
pub type Result<T> = std::result::Result<T, MarkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_invalid_grid_shape() {
        let e = MarkerError::InvalidGridShape { axis: 1, size: 0 };
        assert_eq!(
            e.to_string(),
            "invalid grid shape: axis 1 has size 0 (must be >= 1)"
        );
    }

    #[test]
    fn display_shape_mismatch() {
        let e = MarkerError::ShapeMismatch {
            expected: vec![4, 5],
            got: 19,
        };
        assert_eq!(
            e.to_string(),
            "shape mismatch: grid [4, 5] needs 20 samples, got 19"
        );
    }

    #[test]
    fn display_invalid_epsilon() {
        let e = MarkerError::InvalidEpsilon(1.5);
        assert_eq!(e.to_string(), "invalid epsilon: 1.5 (must be in (0, 1))");
    }

    #[test]
    fn display_tensor_length_mismatch() {
        let e = MarkerError::TensorLengthMismatch {
            expected: 48,
            got: 47,
        };
        assert!(e.to_string().contains("48"));
        assert!(e.to_string().contains("47"));
    }

    #[test]
    fn error_trait_object() {
        let e: Box<dyn std::error::Error> = Box::new(MarkerError::InvalidThreadCount(0));
        assert_eq!(e.to_string(), "invalid thread count: 0 (must be >= 1)");
    }
}
