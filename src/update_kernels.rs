// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

/// Solve the 2D anisotropic eikonal equation on one triangle.
///
/// Given tensor `d`, offset signs `s1, s2` toward the two neighbors and
/// their times `t1, t2`, finds `t0` satisfying
///
/// ```text
///   d11*s1*s1*(t0-t1)^2 + 2*d12*s1*s2*(t0-t1)*(t0-t2) + d22*s2*s2*(t0-t2)^2 = 1
/// ```
///
/// The quadratic is solved for `u = t0 - t1` in double precision to limit
/// rounding error. Returns infinity when there is no real root or when the
/// implied gradient points away from either neighbor.
pub fn solve_2d(d11: f32, d12: f32, d22: f32, s1: f32, s2: f32, t1: f32, t2: f32) -> f32 {
    let ds11 = (d11 * s1 * s1) as f64;
    let ds12 = (d12 * s1 * s2) as f64;
    let ds22 = (d22 * s2 * s2) as f64;
    let t12 = t1 as f64 - t2 as f64;
    let a = ds11 + 2.0 * ds12 + ds22;
    let b = 2.0 * (ds12 + ds22) * t12;
    let c = ds22 * t12 * t12 - 1.0;
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return f32::INFINITY;
    }
    let u1 = (-b + disc.sqrt()) / (2.0 * a);
    let u2 = u1 + t12;
    if ds11 * u1 + ds12 * u2 < 0.0 || ds12 * u1 + ds22 * u2 < 0.0 {
        return f32::INFINITY;
    }
    t1 + u1 as f32
}

/// Solve the 3D anisotropic eikonal equation on one tetrahedron.
///
/// Same construction as [`solve_2d`] with three neighbors:
///
/// ```text
///   sum_ij d_ij*s_i*s_j*(t0-t_i)*(t0-t_j) = 1
/// ```
#[allow(clippy::too_many_arguments)]
pub fn solve_3d(
    d: [f32; 6],
    s1: f32,
    s2: f32,
    s3: f32,
    t1: f32,
    t2: f32,
    t3: f32,
) -> f32 {
    let [d11, d12, d13, d22, d23, d33] = d;
    let ds11 = (d11 * s1 * s1) as f64;
    let ds22 = (d22 * s2 * s2) as f64;
    let ds33 = (d33 * s3 * s3) as f64;
    let ds12 = (d12 * s1 * s2) as f64;
    let ds13 = (d13 * s1 * s3) as f64;
    let ds23 = (d23 * s2 * s3) as f64;
    let t12 = t1 as f64 - t2 as f64;
    let t13 = t1 as f64 - t3 as f64;
    let a = ds11 + ds22 + ds33 + 2.0 * (ds12 + ds13 + ds23);
    let b = 2.0 * ((ds22 + ds12 + ds23) * t12 + (ds33 + ds13 + ds23) * t13);
    let c = ds22 * t12 * t12 + ds33 * t13 * t13 + 2.0 * ds23 * t12 * t13 - 1.0;
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return f32::INFINITY;
    }
    let u1 = (-b + disc.sqrt()) / (2.0 * a);
    let u2 = u1 + t12;
    let u3 = u1 + t13;
    if ds11 * u1 + ds12 * u2 + ds13 * u3 < 0.0
        || ds12 * u1 + ds22 * u2 + ds23 * u3 < 0.0
        || ds13 * u1 + ds23 * u2 + ds33 * u3 < 0.0
    {
        return f32::INFINITY;
    }
    t1 + u1 as f32
}

/// Zero-sized marker selecting the neighborhood tables for N dimensions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stencil<const N: usize>;

/// Dimension-specific local update.
///
/// Neighbor times are passed per axis as `[minus, plus]`, with infinity for
/// neighbors outside the grid or not yet activated in the current sweep.
pub trait LocalSolve<const N: usize> {
    /// Face-neighbor offsets. Neighbor `k` lies on axis `k / 2`, on the
    /// negative side when `k` is even.
    const NEIGHBORS: &'static [[i8; N]];

    /// Offset combinations over the whole neighborhood, highest-dimensional
    /// simplices first and edges last.
    const ALL: &'static [[i8; N]];

    /// For each face neighbor `k`, the combinations that include the step
    /// back to the sample at `-NEIGHBORS[k]` relative to it.
    const TOWARD: &'static [&'static [[i8; N]]];

    /// Return the first time in `sets` order that is less than `tc`, or `tc`
    /// if none is.
    fn compute_time(d: &[f32], tc: f32, nabors: &[[f32; 2]; N], sets: &[[i8; N]]) -> f32;
}

#[inline]
fn side(pair: [f32; 2], k: i8) -> f32 {
    if k < 0 {
        pair[0]
    } else {
        pair[1]
    }
}

const NEIGHBORS_2D: [[i8; 2]; 4] = [[-1, 0], [1, 0], [0, -1], [0, 1]];

const ALL_2D: [[i8; 2]; 8] = [
    [-1, -1],
    [1, -1],
    [-1, 1],
    [1, 1],
    [-1, 0],
    [1, 0],
    [0, -1],
    [0, 1],
];

const TOWARD_2D: [&[[i8; 2]]; 4] = [
    &[[1, -1], [1, 1], [1, 0]],
    &[[-1, -1], [-1, 1], [-1, 0]],
    &[[-1, 1], [1, 1], [0, 1]],
    &[[-1, -1], [1, -1], [0, -1]],
];

impl LocalSolve<2> for Stencil<2> {
    const NEIGHBORS: &'static [[i8; 2]] = &NEIGHBORS_2D;
    const ALL: &'static [[i8; 2]] = &ALL_2D;
    const TOWARD: &'static [&'static [[i8; 2]]] = &TOWARD_2D;

    fn compute_time(d: &[f32], tc: f32, nabors: &[[f32; 2]; 2], sets: &[[i8; 2]]) -> f32 {
        let (d11, d12, d22) = (d[0], d[1], d[2]);
        let e12 = 1.0 / (d11 * d22 - d12 * d12);
        for &[k1, k2] in sets {
            let t0 = match (k1 != 0, k2 != 0) {
                (true, true) => {
                    let t1 = side(nabors[0], k1);
                    let t2 = side(nabors[1], k2);
                    if t1.is_infinite() || t2.is_infinite() {
                        continue;
                    }
                    solve_2d(d11, d12, d22, k1 as f32, k2 as f32, t1, t2)
                }
                (true, false) => {
                    let t1 = side(nabors[0], k1);
                    if t1.is_infinite() {
                        continue;
                    }
                    t1 + (d22 * e12).sqrt()
                }
                (false, true) => {
                    let t2 = side(nabors[1], k2);
                    if t2.is_infinite() {
                        continue;
                    }
                    t2 + (d11 * e12).sqrt()
                }
                (false, false) => continue,
            };
            if t0 < tc {
                return t0;
            }
        }
        tc
    }
}

const NEIGHBORS_3D: [[i8; 3]; 6] = [
    [-1, 0, 0],
    [1, 0, 0],
    [0, -1, 0],
    [0, 1, 0],
    [0, 0, -1],
    [0, 0, 1],
];

// 8 tets, 12 tris, 6 edges.
const ALL_3D: [[i8; 3]; 26] = [
    [-1, -1, -1],
    [1, -1, -1],
    [-1, 1, -1],
    [1, 1, -1],
    [-1, -1, 1],
    [1, -1, 1],
    [-1, 1, 1],
    [1, 1, 1],
    [-1, -1, 0],
    [1, -1, 0],
    [-1, 1, 0],
    [1, 1, 0],
    [-1, 0, -1],
    [1, 0, -1],
    [-1, 0, 1],
    [1, 0, 1],
    [0, -1, -1],
    [0, 1, -1],
    [0, -1, 1],
    [0, 1, 1],
    [-1, 0, 0],
    [1, 0, 0],
    [0, -1, 0],
    [0, 1, 0],
    [0, 0, -1],
    [0, 0, 1],
];

const TOWARD_3D: [&[[i8; 3]]; 6] = [
    &[
        [1, -1, -1],
        [1, -1, 1],
        [1, 1, -1],
        [1, 1, 1],
        [1, 0, -1],
        [1, 0, 1],
        [1, -1, 0],
        [1, 1, 0],
        [1, 0, 0],
    ],
    &[
        [-1, -1, -1],
        [-1, -1, 1],
        [-1, 1, -1],
        [-1, 1, 1],
        [-1, 0, -1],
        [-1, 0, 1],
        [-1, -1, 0],
        [-1, 1, 0],
        [-1, 0, 0],
    ],
    &[
        [-1, 1, -1],
        [1, 1, -1],
        [-1, 1, 1],
        [1, 1, 1],
        [-1, 1, 0],
        [1, 1, 0],
        [0, 1, -1],
        [0, 1, 1],
        [0, 1, 0],
    ],
    &[
        [-1, -1, -1],
        [1, -1, -1],
        [-1, -1, 1],
        [1, -1, 1],
        [-1, -1, 0],
        [1, -1, 0],
        [0, -1, -1],
        [0, -1, 1],
        [0, -1, 0],
    ],
    &[
        [-1, -1, 1],
        [-1, 1, 1],
        [1, -1, 1],
        [1, 1, 1],
        [0, -1, 1],
        [0, 1, 1],
        [-1, 0, 1],
        [1, 0, 1],
        [0, 0, 1],
    ],
    &[
        [-1, -1, -1],
        [-1, 1, -1],
        [1, -1, -1],
        [1, 1, -1],
        [0, -1, -1],
        [0, 1, -1],
        [-1, 0, -1],
        [1, 0, -1],
        [0, 0, -1],
    ],
];

impl LocalSolve<3> for Stencil<3> {
    const NEIGHBORS: &'static [[i8; 3]] = &NEIGHBORS_3D;
    const ALL: &'static [[i8; 3]] = &ALL_3D;
    const TOWARD: &'static [&'static [[i8; 3]]] = &TOWARD_3D;

    fn compute_time(d: &[f32], tc: f32, nabors: &[[f32; 2]; 3], sets: &[[i8; 3]]) -> f32 {
        let (d11, d12, d13, d22, d23, d33) = (d[0], d[1], d[2], d[3], d[4], d[5]);
        let o11 = 1.0 / d11;
        let o22 = 1.0 / d22;
        let o33 = 1.0 / d33;

        // 2x2 tensors for the faces, each a Schur complement that eliminates
        // the missing axis: a for axes (1,2), b for (1,3), c for (2,3).
        let a11 = d11 - d13 * d13 * o33;
        let a12 = d12 - d13 * d23 * o33;
        let a22 = d22 - d23 * d23 * o33;
        let b11 = d11 - d12 * d12 * o22;
        let b13 = d13 - d12 * d23 * o22;
        let b33 = d33 - d23 * d23 * o22;
        let c22 = d22 - d12 * d12 * o11;
        let c23 = d23 - d12 * d13 * o11;
        let c33 = d33 - d13 * d13 * o11;
        let e12 = 1.0 / (a11 * a22 - a12 * a12);
        let e13 = 1.0 / (b11 * b33 - b13 * b13);

        for &[k1, k2, k3] in sets {
            let t1 = side(nabors[0], k1);
            let t2 = side(nabors[1], k2);
            let t3 = side(nabors[2], k3);
            let t0 = match (k1 != 0, k2 != 0, k3 != 0) {
                (true, true, true) => {
                    if t1.is_infinite() || t2.is_infinite() || t3.is_infinite() {
                        continue;
                    }
                    solve_3d(
                        [d11, d12, d13, d22, d23, d33],
                        k1 as f32,
                        k2 as f32,
                        k3 as f32,
                        t1,
                        t2,
                        t3,
                    )
                }
                (true, true, false) => {
                    if t1.is_infinite() || t2.is_infinite() {
                        continue;
                    }
                    solve_2d(a11, a12, a22, k1 as f32, k2 as f32, t1, t2)
                }
                (true, false, true) => {
                    if t1.is_infinite() || t3.is_infinite() {
                        continue;
                    }
                    solve_2d(b11, b13, b33, k1 as f32, k3 as f32, t1, t3)
                }
                (false, true, true) => {
                    if t2.is_infinite() || t3.is_infinite() {
                        continue;
                    }
                    solve_2d(c22, c23, c33, k2 as f32, k3 as f32, t2, t3)
                }
                (true, false, false) => {
                    if t1.is_infinite() {
                        continue;
                    }
                    t1 + (a22 * e12).sqrt()
                }
                (false, true, false) => {
                    if t2.is_infinite() {
                        continue;
                    }
                    t2 + (a11 * e12).sqrt()
                }
                (false, false, true) => {
                    if t3.is_infinite() {
                        continue;
                    }
                    t3 + (b11 * e13).sqrt()
                }
                (false, false, false) => continue,
            };
            if t0 < tc {
                return t0;
            }
        }
        tc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INF: f32 = f32::INFINITY;
    const IDENTITY_2D: [f32; 3] = [1.0, 0.0, 1.0];
    const IDENTITY_3D: [f32; 6] = [1.0, 0.0, 0.0, 1.0, 0.0, 1.0];

    #[test]
    fn solve_2d_known_case() {
        // Both neighbors at 0 with the identity tensor: 2*t0^2 = 1.
        let t = solve_2d(1.0, 0.0, 1.0, 1.0, 1.0, 0.0, 0.0);
        assert!((t - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn solve_2d_negative_discriminant() {
        let t = solve_2d(1.0, 0.0, 1.0, 1.0, 1.0, 0.0, 5.0);
        assert!(t.is_infinite());
    }

    #[test]
    fn solve_2d_rejects_acausal_root() {
        // Real root exists, but t0 < t2 so the gradient points back at t2.
        let t = solve_2d(1.0, 0.0, 1.0, 1.0, 1.0, 0.0, 1.2);
        assert!(t.is_infinite());
    }

    #[test]
    fn solve_2d_sign_of_offsets_matters_with_cross_term() {
        // With d12 > 0 a diagonal along (+,+) is fast and along (+,-) slow.
        let fast = solve_2d(1.0, 0.5, 1.0, 1.0, 1.0, 0.0, 0.0);
        let slow = solve_2d(1.0, 0.5, 1.0, 1.0, -1.0, 0.0, 0.0);
        assert!(fast < slow, "fast={} slow={}", fast, slow);
    }

    #[test]
    fn solve_3d_known_case() {
        let t = solve_3d(IDENTITY_3D, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0);
        let expected = 1.0 / 3.0_f32.sqrt();
        assert!((t - expected).abs() < 1e-6);
    }

    #[test]
    fn solve_3d_negative_discriminant() {
        let t = solve_3d(IDENTITY_3D, 1.0, 1.0, 1.0, 0.0, 0.0, 100.0);
        assert!(t.is_infinite());
    }

    #[test]
    fn compute_time_2d_edge_only() {
        let nabors = [[0.0, INF], [INF, INF]];
        let t = Stencil::<2>::compute_time(&IDENTITY_2D, INF, &nabors, Stencil::<2>::ALL);
        assert!((t - 1.0).abs() < 1e-6);
    }

    #[test]
    fn compute_time_2d_prefers_triangle() {
        let nabors = [[1.0, INF], [INF, 1.0]];
        let t = Stencil::<2>::compute_time(&IDENTITY_2D, INF, &nabors, Stencil::<2>::ALL);
        assert!((t - (1.0 + std::f32::consts::FRAC_1_SQRT_2)).abs() < 1e-5);
    }

    #[test]
    fn compute_time_2d_anisotropic_edge() {
        // Squared speed 4 along axis 1 halves the step time along that axis.
        let d = [4.0, 0.0, 1.0];
        let along1 = [[0.0, INF], [INF, INF]];
        let along2 = [[INF, INF], [0.0, INF]];
        let t1 = Stencil::<2>::compute_time(&d, INF, &along1, Stencil::<2>::ALL);
        let t2 = Stencil::<2>::compute_time(&d, INF, &along2, Stencil::<2>::ALL);
        assert!((t1 - 0.5).abs() < 1e-6);
        assert!((t2 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn compute_time_keeps_current_when_no_improvement() {
        let nabors = [[0.0, INF], [INF, INF]];
        let t = Stencil::<2>::compute_time(&IDENTITY_2D, 0.5, &nabors, Stencil::<2>::ALL);
        assert_eq!(t, 0.5);
    }

    #[test]
    fn compute_time_restricted_to_toward_set() {
        // Neighbor 1 sits at +1 on axis 1, so its sets only look back at -1.
        let nabors = [[INF, 0.0], [INF, INF]];
        let t = Stencil::<2>::compute_time(&IDENTITY_2D, INF, &nabors, Stencil::<2>::TOWARD[1]);
        assert!(t.is_infinite());
        let nabors = [[0.0, INF], [INF, INF]];
        let t = Stencil::<2>::compute_time(&IDENTITY_2D, INF, &nabors, Stencil::<2>::TOWARD[1]);
        assert!((t - 1.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_tensor_leaves_time_unchanged() {
        let nabors = [[0.0, 0.0], [0.0, 0.0]];
        let t = Stencil::<2>::compute_time(&[0.0, 0.0, 0.0], INF, &nabors, Stencil::<2>::ALL);
        assert!(t.is_infinite());
        let t = Stencil::<2>::compute_time(&[-1.0, 0.0, -1.0], INF, &nabors, Stencil::<2>::ALL);
        assert!(t.is_infinite());
        let nabors = [[0.0, 0.0], [0.0, 0.0], [0.0, 0.0]];
        let t = Stencil::<3>::compute_time(&[0.0; 6], INF, &nabors, Stencil::<3>::ALL);
        assert!(t.is_infinite());
    }

    #[test]
    fn compute_time_3d_edge_tri_tet() {
        let edge = [[0.0, INF], [INF, INF], [INF, INF]];
        let t = Stencil::<3>::compute_time(&IDENTITY_3D, INF, &edge, Stencil::<3>::ALL);
        assert!((t - 1.0).abs() < 1e-6);

        let tri = [[0.0, INF], [0.0, INF], [INF, INF]];
        let t = Stencil::<3>::compute_time(&IDENTITY_3D, INF, &tri, Stencil::<3>::ALL);
        assert!((t - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);

        let tet = [[0.0, INF], [0.0, INF], [0.0, INF]];
        let t = Stencil::<3>::compute_time(&IDENTITY_3D, INF, &tet, Stencil::<3>::ALL);
        assert!((t - 1.0 / 3.0_f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn compute_time_3d_anisotropic_edges() {
        let d = [1.0, 0.0, 0.0, 4.0, 0.0, 9.0];
        let along2 = [[INF, INF], [0.0, INF], [INF, INF]];
        let along3 = [[INF, INF], [INF, INF], [INF, 0.0]];
        let t2 = Stencil::<3>::compute_time(&d, INF, &along2, Stencil::<3>::ALL);
        let t3 = Stencil::<3>::compute_time(&d, INF, &along3, Stencil::<3>::ALL);
        assert!((t2 - 0.5).abs() < 1e-6);
        assert!((t3 - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn toward_sets_point_back() {
        for (k, off) in Stencil::<3>::NEIGHBORS.iter().enumerate() {
            let axis = k / 2;
            for set in Stencil::<3>::TOWARD[k] {
                assert_eq!(set[axis], -off[axis], "neighbor {} set {:?}", k, set);
            }
            assert_eq!(Stencil::<3>::TOWARD[k].len(), 9);
        }
        for (k, off) in Stencil::<2>::NEIGHBORS.iter().enumerate() {
            let axis = k / 2;
            for set in Stencil::<2>::TOWARD[k] {
                assert_eq!(set[axis], -off[axis]);
            }
        }
    }

    #[test]
    fn no_nan_produced() {
        let cases = [
            [[0.0, 0.0], [0.0, 0.0]],
            [[1.0, INF], [INF, 1.0]],
            [[INF, 0.0], [0.0, INF]],
            [[INF, INF], [INF, INF]],
            [[0.0, 100.0], [50.0, 0.001]],
        ];
        let tensors = [
            [1.0, 0.0, 1.0],
            [1000.0, 0.0, 0.001],
            [1.0, 0.99, 1.0],
            [0.0, 0.0, 0.0],
        ];
        for nabors in cases {
            for d in tensors {
                let t = Stencil::<2>::compute_time(&d, INF, &nabors, Stencil::<2>::ALL);
                assert!(!t.is_nan(), "NaN for d={:?} nabors={:?}", d, nabors);
            }
        }
    }
}
