//! Symmetric eigen-decomposition for the PCA step.
//!
//! Matrices are dense, row-major `m x m` slices of `f64`.
//!
//! - Small matrices use the cyclic Jacobi method (exact, O(m³) per sweep).
//! - Larger matrices use subspace iteration with Rayleigh–Ritz refinement, which only
//!   needs `A · Q` products for an `m x p` basis, `p = k + OVERSAMPLE`.

use rand::prelude::*;

/// Matrices up to this size are decomposed directly with Jacobi rotations.
const JACOBI_MAX_DIM: usize = 128;
/// Extra basis vectors carried by subspace iteration to speed up convergence.
const OVERSAMPLE: usize = 10;
const MAX_SWEEPS: usize = 64;
const MAX_SUBSPACE_ITERS: usize = 1000;
/// Relative residual `|A x - θ x| / |θ_max|` at which Ritz pairs are accepted.
const SUBSPACE_TOL: f64 = 1e-8;
/// Fixed seed for the starting basis, so the decomposition is reproducible.
const BASIS_SEED: u64 = 0x1b3_c0de;

/// Top `k` eigenpairs of the symmetric `m x m` matrix `a`, by descending eigenvalue.
///
/// Returns `(eigenvalues, eigenvectors)`; each eigenvector has length `m`.
pub(crate) fn top_eigenpairs(a: &[f64], m: usize, k: usize) -> (Vec<f64>, Vec<Vec<f64>>) {
    debug_assert_eq!(a.len(), m * m);
    let k = k.min(m);
    if k == 0 {
        return (Vec::new(), Vec::new());
    }
    if m <= JACOBI_MAX_DIM || k + OVERSAMPLE >= m {
        let (vals, vecs) = jacobi(a, m);
        let mut pairs: Vec<(f64, Vec<f64>)> = vals.into_iter().zip(vecs).collect();
        pairs.sort_by(|x, y| y.0.total_cmp(&x.0));
        pairs.truncate(k);
        pairs.into_iter().unzip()
    } else {
        subspace_iteration(a, m, k)
    }
}

/// Full eigen-decomposition by cyclic Jacobi rotations (unsorted).
pub(crate) fn jacobi(a: &[f64], m: usize) -> (Vec<f64>, Vec<Vec<f64>>) {
    let mut a = a.to_vec();
    let mut v = vec![0.0f64; m * m];
    for i in 0..m {
        v[i * m + i] = 1.0;
    }

    let total: f64 = a.iter().map(|x| x * x).sum();
    let threshold = total * 1e-24;

    for _ in 0..MAX_SWEEPS {
        let mut off = 0.0;
        for p in 0..m {
            for q in (p + 1)..m {
                off += a[p * m + q] * a[p * m + q];
            }
        }
        if off <= threshold {
            break;
        }

        for p in 0..m {
            for q in (p + 1)..m {
                let apq = a[p * m + q];
                if apq.abs() <= f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (a[q * m + q] - a[p * m + p]) / (2.0 * apq);
                let t = if theta.abs() > 1e150 {
                    0.5 / theta
                } else {
                    theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt())
                };
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                // A <- A P
                for r in 0..m {
                    let arp = a[r * m + p];
                    let arq = a[r * m + q];
                    a[r * m + p] = c * arp - s * arq;
                    a[r * m + q] = s * arp + c * arq;
                }
                // A <- P^T A
                for col in 0..m {
                    let apc = a[p * m + col];
                    let aqc = a[q * m + col];
                    a[p * m + col] = c * apc - s * aqc;
                    a[q * m + col] = s * apc + c * aqc;
                }
                // V <- V P
                for r in 0..m {
                    let vrp = v[r * m + p];
                    let vrq = v[r * m + q];
                    v[r * m + p] = c * vrp - s * vrq;
                    v[r * m + q] = s * vrp + c * vrq;
                }
            }
        }
    }

    let vals = (0..m).map(|i| a[i * m + i]).collect();
    let vecs = (0..m)
        .map(|col| (0..m).map(|r| v[r * m + col]).collect())
        .collect();
    (vals, vecs)
}

fn subspace_iteration(a: &[f64], m: usize, k: usize) -> (Vec<f64>, Vec<Vec<f64>>) {
    let p = (k + OVERSAMPLE).min(m);
    let mut rng = StdRng::seed_from_u64(BASIS_SEED);
    let mut basis: Vec<Vec<f64>> = (0..p)
        .map(|_| (0..m).map(|_| rng.random::<f64>() * 2.0 - 1.0).collect())
        .collect();
    orthonormalize(&mut basis, &mut rng);

    for iter in 0..MAX_SUBSPACE_ITERS {
        let aq: Vec<Vec<f64>> = basis.iter().map(|q| mat_vec(a, m, q)).collect();

        // Rayleigh–Ritz on the current basis.
        let mut t = vec![0.0f64; p * p];
        for i in 0..p {
            for j in i..p {
                let x = 0.5 * (dot(&basis[i], &aq[j]) + dot(&basis[j], &aq[i]));
                t[i * p + j] = x;
                t[j * p + i] = x;
            }
        }
        let (theta, w) = jacobi(&t, p);
        let mut order: Vec<usize> = (0..p).collect();
        order.sort_by(|&x, &y| theta[y].total_cmp(&theta[x]));

        let ritz: Vec<Vec<f64>> = order.iter().take(k).map(|&o| combine(&basis, &w[o])).collect();
        let scale = theta[order[0]].abs().max(f64::MIN_POSITIVE);
        let converged = order.iter().take(k).zip(&ritz).all(|(&o, x)| {
            let ax = combine(&aq, &w[o]);
            let res: f64 = ax
                .iter()
                .zip(x)
                .map(|(y, v)| (y - theta[o] * v).powi(2))
                .sum();
            res.sqrt() <= SUBSPACE_TOL * scale
        });

        if converged || iter + 1 == MAX_SUBSPACE_ITERS {
            let vals = order.iter().take(k).map(|&o| theta[o]).collect();
            return (vals, ritz);
        }

        // Power step applied to the Ritz vectors: A (Q w) = (A Q) w.
        basis = order.iter().map(|&o| combine(&aq, &w[o])).collect();
        orthonormalize(&mut basis, &mut rng);
    }

    (Vec::new(), Vec::new())
}

fn mat_vec(a: &[f64], m: usize, x: &[f64]) -> Vec<f64> {
    a.chunks_exact(m).map(|row| dot(row, x)).collect()
}

/// `Σ_j coeffs[j] * vectors[j]`.
fn combine(vectors: &[Vec<f64>], coeffs: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0f64; vectors[0].len()];
    for (v, &c) in vectors.iter().zip(coeffs) {
        for (o, x) in out.iter_mut().zip(v) {
            *o += c * x;
        }
    }
    out
}

/// Modified Gram–Schmidt. Vectors that collapse (rank deficiency) are replaced by
/// fresh random directions, or zeroed if none can be found.
fn orthonormalize(vectors: &mut [Vec<f64>], rng: &mut StdRng) {
    for i in 0..vectors.len() {
        let mut ok = false;
        for _attempt in 0..3 {
            for j in 0..i {
                let (done, rest) = vectors.split_at_mut(i);
                let proj = dot(&rest[0], &done[j]);
                for (x, y) in rest[0].iter_mut().zip(&done[j]) {
                    *x -= proj * y;
                }
            }
            let norm = dot(&vectors[i], &vectors[i]).sqrt();
            if norm > 1e-10 {
                for x in &mut vectors[i] {
                    *x /= norm;
                }
                ok = true;
                break;
            }
            for x in &mut vectors[i] {
                *x = rng.random::<f64>() * 2.0 - 1.0;
            }
        }
        if !ok {
            vectors[i].iter_mut().for_each(|x| *x = 0.0);
        }
    }
}

#[inline]
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag_plus_rank_one(m: usize) -> Vec<f64> {
        // A = diag(m, m-1, ..., 1) + 0.1 * 11^T
        let mut a = vec![0.1f64; m * m];
        for i in 0..m {
            a[i * m + i] += (m - i) as f64;
        }
        a
    }

    fn residual(a: &[f64], m: usize, val: f64, vec: &[f64]) -> f64 {
        let av = mat_vec(a, m, vec);
        av.iter()
            .zip(vec)
            .map(|(x, y)| (x - val * y).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    #[test]
    fn jacobi_two_by_two() {
        let a = [2.0, 1.0, 1.0, 2.0];
        let (vals, vecs) = top_eigenpairs(&a, 2, 2);
        assert!((vals[0] - 3.0).abs() < 1e-12);
        assert!((vals[1] - 1.0).abs() < 1e-12);
        assert!((vecs[0][0].abs() - vecs[0][1].abs()).abs() < 1e-12);
    }

    #[test]
    fn jacobi_residuals_small() {
        let m = 12;
        let a = diag_plus_rank_one(m);
        let (vals, vecs) = top_eigenpairs(&a, m, 4);
        assert!(vals.windows(2).all(|w| w[0] >= w[1]));
        for (val, vec) in vals.iter().zip(&vecs) {
            assert!(residual(&a, m, *val, vec) < 1e-9);
            assert!((dot(vec, vec) - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn subspace_matches_jacobi() {
        let m = 160;
        let a = diag_plus_rank_one(m);
        let (sub_vals, sub_vecs) = subspace_iteration(&a, m, 5);
        let (jac_vals, _) = {
            let (vals, vecs) = jacobi(&a, m);
            let mut pairs: Vec<(f64, Vec<f64>)> = vals.into_iter().zip(vecs).collect();
            pairs.sort_by(|x, y| y.0.total_cmp(&x.0));
            pairs.truncate(5);
            pairs.into_iter().unzip::<f64, Vec<f64>, Vec<f64>, Vec<Vec<f64>>>()
        };
        for (s, j) in sub_vals.iter().zip(&jac_vals) {
            assert!((s - j).abs() < 1e-6, "{s} vs {j}");
        }
        for (val, vec) in sub_vals.iter().zip(&sub_vecs) {
            assert!(residual(&a, m, *val, vec) < 1e-4);
        }
    }

    #[test]
    fn rank_deficient_matrix() {
        // Rank one: only the first eigenvalue is non-zero.
        let m = 140;
        let u: Vec<f64> = (0..m).map(|i| (i as f64 + 1.0).sqrt()).collect();
        let mut a = vec![0.0f64; m * m];
        for i in 0..m {
            for j in 0..m {
                a[i * m + j] = u[i] * u[j];
            }
        }
        let (vals, vecs) = top_eigenpairs(&a, m, 3);
        let expected: f64 = u.iter().map(|x| x * x).sum();
        assert!((vals[0] - expected).abs() < 1e-6 * expected);
        assert!(vals[1].abs() < 1e-6 * expected);
        assert!(residual(&a, m, vals[0], &vecs[0]) < 1e-6 * expected);
    }
}
