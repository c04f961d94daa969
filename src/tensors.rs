// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use crate::core::{checked_strides, nd_to_flat};
use crate::error::{MarkerError, Result};

/// Number of independent components of a symmetric N×N tensor.
pub const fn tensor_len(n: usize) -> usize {
    n * (n + 1) / 2
}

/// Per-sample access to a symmetric positive-definite metric tensor field.
///
/// Components are written in upper-triangular row order: `d11, d12, d22` in
/// 2D and `d11, d12, d13, d22, d23, d33` in 3D. The tensors are
/// velocity-squared metrics, so larger components mean faster travel.
///
/// Component subscripts follow the order of `idx`: `d11` belongs to
/// `idx[0]`, the slowest-varying axis of the flat `times` and `marks`
/// arrays, and `d22` (2D) or `d33` (3D) to the last, fastest axis. Data
/// stored with the first index fastest must be transposed on the way in:
/// swap `d11` and `d22` in 2D; in 3D swap `d11` with `d33` and `d12`
/// with `d23`.
///
/// Implementations are read concurrently from many worker threads, each
/// with its own scratch buffer.
pub trait TensorField<const N: usize>: Sync {
    /// Fill `d` (at least `tensor_len(N)` long) with the tensor at `idx`.
    fn tensor(&self, idx: [usize; N], d: &mut [f32]);
}

impl<const N: usize, F: TensorField<N> + ?Sized> TensorField<N> for &F {
    fn tensor(&self, idx: [usize; N], d: &mut [f32]) {
        (**self).tensor(idx, d)
    }
}

/// The same tensor at every sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantTensors<const N: usize> {
    d: [f32; 6],
}

impl<const N: usize> ConstantTensors<N> {
    /// The identity tensor, giving unit speed in every direction.
    pub fn identity() -> Self {
        let mut d = [0.0f32; 6];
        // Diagonal entries sit at the start of each upper-triangular row.
        let mut k = 0;
        for row in 0..N {
            d[k] = 1.0;
            k += N - row;
        }
        ConstantTensors { d }
    }

    /// The identity scaled by `s`; travel times scale by `1/sqrt(s)`.
    pub fn scaled_identity(s: f32) -> Self {
        let mut c = Self::identity();
        for v in c.d.iter_mut() {
            *v *= s;
        }
        c
    }

    /// The stored components.
    pub fn components(&self) -> &[f32] {
        &self.d[..tensor_len(N)]
    }
}

impl ConstantTensors<2> {
    /// A constant 2D tensor from its three components.
    pub fn new(d11: f32, d12: f32, d22: f32) -> Self {
        ConstantTensors {
            d: [d11, d12, d22, 0.0, 0.0, 0.0],
        }
    }

    /// A constant 2D tensor `au·u·uᵀ + av·v·vᵀ` where `u` points along
    /// `angle` (radians from axis 1 toward axis 2) and `v` is perpendicular.
    pub fn from_eigen(angle: f32, au: f32, av: f32) -> Self {
        let (u2, u1) = angle.sin_cos();
        let (v1, v2) = (-u2, u1);
        ConstantTensors::<2>::new(
            au * u1 * u1 + av * v1 * v1,
            au * u1 * u2 + av * v1 * v2,
            au * u2 * u2 + av * v2 * v2,
        )
    }
}

impl ConstantTensors<3> {
    /// A constant 3D tensor from its six components.
    pub fn new(d11: f32, d12: f32, d13: f32, d22: f32, d23: f32, d33: f32) -> Self {
        ConstantTensors {
            d: [d11, d12, d13, d22, d23, d33],
        }
    }
}

impl<const N: usize> TensorField<N> for ConstantTensors<N> {
    fn tensor(&self, _idx: [usize; N], d: &mut [f32]) {
        let m = tensor_len(N);
        d[..m].copy_from_slice(&self.d[..m]);
    }
}

/// Arbitrary tensors stored per sample, row-major, components contiguous.
#[derive(Debug, Clone)]
pub struct DenseTensors<const N: usize> {
    strides: [usize; N],
    data: Vec<f32>,
}

impl<const N: usize> DenseTensors<N> {
    /// Wrap per-sample components for a grid of the given shape.
    ///
    /// # Errors
    /// Returns an error if the shape is invalid or `data` does not hold
    /// exactly `tensor_len(N)` components per sample.
    pub fn new(shape: [usize; N], data: Vec<f32>) -> Result<Self> {
        let strides = checked_strides(shape)?;
        let expected = shape.iter().product::<usize>() * tensor_len(N);
        if data.len() != expected {
            return Err(MarkerError::TensorLengthMismatch {
                expected,
                got: data.len(),
            });
        }
        Ok(DenseTensors { strides, data })
    }

    /// Build a field by evaluating `f` at every sample.
    pub fn from_fn<F>(shape: [usize; N], mut f: F) -> Result<Self>
    where
        F: FnMut([usize; N], &mut [f32]),
    {
        let strides = checked_strides(shape)?;
        let m = tensor_len(N);
        let num: usize = shape.iter().product();
        let mut data = vec![0.0f32; num * m];
        for (flat, chunk) in data.chunks_exact_mut(m).enumerate() {
            f(crate::core::flat_to_nd(strides, flat), chunk);
        }
        Ok(DenseTensors { strides, data })
    }

    /// Mutable components at `idx`.
    pub fn tensor_mut(&mut self, idx: [usize; N]) -> &mut [f32] {
        let m = tensor_len(N);
        let k = nd_to_flat(self.strides, idx) * m;
        &mut self.data[k..k + m]
    }
}

impl<const N: usize> TensorField<N> for DenseTensors<N> {
    fn tensor(&self, idx: [usize; N], d: &mut [f32]) {
        let m = tensor_len(N);
        let k = nd_to_flat(self.strides, idx) * m;
        d[..m].copy_from_slice(&self.data[k..k + m]);
    }
}

/// Isotropic tensors `s·I` with a scalar `s` (squared speed) per sample.
#[derive(Debug, Clone)]
pub struct IsotropicTensors<const N: usize> {
    strides: [usize; N],
    scale: Vec<f32>,
}

impl<const N: usize> IsotropicTensors<N> {
    /// Wrap one squared speed per sample.
    ///
    /// # Errors
    /// Returns an error if the shape is invalid or the length is wrong.
    pub fn new(shape: [usize; N], scale: Vec<f32>) -> Result<Self> {
        let strides = checked_strides(shape)?;
        let expected: usize = shape.iter().product();
        if scale.len() != expected {
            return Err(MarkerError::TensorLengthMismatch {
                expected,
                got: scale.len(),
            });
        }
        Ok(IsotropicTensors { strides, scale })
    }
}

impl<const N: usize> TensorField<N> for IsotropicTensors<N> {
    fn tensor(&self, idx: [usize; N], d: &mut [f32]) {
        let s = self.scale[nd_to_flat(self.strides, idx)];
        let mut k = 0;
        for row in 0..N {
            for col in row..N {
                d[k] = if row == col { s } else { 0.0 };
                k += 1;
            }
        }
    }
}
