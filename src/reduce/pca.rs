//! Principal component analysis.
//!
//! Projects centered data onto the directions of maximal variance. The
//! eigen-decomposition runs on whichever of the two equivalent matrices is smaller:
//!
//! - `n <= d`: the Gram matrix `X Xᵀ` (`n x n`); scores are `u_j · sqrt(λ_j)`.
//! - `n > d`: the scatter matrix `Xᵀ X` (`d x d`); scores are `X v_j`.
//!
//! Component signs are fixed so that the largest-magnitude score of each component is
//! positive, making the output deterministic.

use super::linalg;
use crate::cluster::util::check_rows;
use crate::error::{Error, Result};
use tracing::debug;

/// Linear projection onto the top principal components.
#[derive(Debug, Clone)]
pub struct Pca {
    n_components: usize,
}

impl Pca {
    /// Project onto at most `n_components` components.
    ///
    /// The effective count is clamped to `min(n_components, n_samples, n_features)`.
    pub fn new(n_components: usize) -> Self {
        Self { n_components }
    }

    /// Requested number of components.
    pub fn n_components(&self) -> usize {
        self.n_components
    }

    /// Fit on `data` and return its projection, one row per input row.
    pub fn fit_transform(&self, data: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        let d = check_rows(data)?;
        if self.n_components == 0 {
            return Err(Error::InvalidParameter {
                name: "n_components",
                message: "must be at least 1",
            });
        }

        let n = data.len();
        let k = self.n_components.min(n).min(d);

        let mut mean = vec![0.0f64; d];
        for row in data {
            for (m, &x) in mean.iter_mut().zip(row) {
                *m += f64::from(x);
            }
        }
        for m in &mut mean {
            *m /= n as f64;
        }
        let centered: Vec<Vec<f64>> = data
            .iter()
            .map(|row| row.iter().zip(&mean).map(|(&x, m)| f64::from(x) - m).collect())
            .collect();

        let mut scores = vec![vec![0.0f64; k]; n];
        if n <= d {
            let mut gram = vec![0.0f64; n * n];
            for i in 0..n {
                for j in i..n {
                    let g = linalg::dot(&centered[i], &centered[j]);
                    gram[i * n + j] = g;
                    gram[j * n + i] = g;
                }
            }
            let (vals, vecs) = linalg::top_eigenpairs(&gram, n, k);
            for (c, (val, u)) in vals.iter().zip(&vecs).enumerate() {
                let s = val.max(0.0).sqrt();
                for (row, &ui) in scores.iter_mut().zip(u) {
                    row[c] = ui * s;
                }
            }
        } else {
            let mut scatter = vec![0.0f64; d * d];
            for row in &centered {
                for a in 0..d {
                    let xa = row[a];
                    if xa == 0.0 {
                        continue;
                    }
                    let dst = &mut scatter[a * d..(a + 1) * d];
                    for b in a..d {
                        dst[b] += xa * row[b];
                    }
                }
            }
            for a in 0..d {
                for b in 0..a {
                    scatter[a * d + b] = scatter[b * d + a];
                }
            }
            let (_, vecs) = linalg::top_eigenpairs(&scatter, d, k);
            for (row, x) in scores.iter_mut().zip(&centered) {
                for (c, v) in vecs.iter().enumerate() {
                    row[c] = linalg::dot(x, v);
                }
            }
        }

        for c in 0..k {
            let pivot = scores
                .iter()
                .map(|row| row[c])
                .max_by(|a, b| a.abs().total_cmp(&b.abs()))
                .unwrap_or(0.0);
            if pivot < 0.0 {
                for row in &mut scores {
                    row[c] = -row[c];
                }
            }
        }

        debug!(samples = n, features = d, components = k, "pca projection");
        Ok(scores
            .into_iter()
            .map(|row| row.into_iter().map(|x| x as f32).collect())
            .collect())
    }
}

impl Default for Pca {
    fn default() -> Self {
        Self::new(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_components_to_data() {
        let data = vec![vec![1.0, 2.0, 3.0], vec![2.0, 0.0, 1.0]];
        let out = Pca::new(50).fit_transform(&data).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.len() == 2));
    }

    #[test]
    fn recovers_dominant_axis() {
        // Points spread along (1, 1, 0) at a constant height.
        let data: Vec<Vec<f32>> = (0..10)
            .map(|i| {
                let t = i as f32;
                vec![t, t, 0.5]
            })
            .collect();
        let out = Pca::new(1).fit_transform(&data).unwrap();
        // First component is the position along the line, centered, up to sign.
        let step = out[1][0] - out[0][0];
        assert!((step.abs() - 2f32.sqrt()).abs() < 1e-3, "{step}");
        for w in out.windows(2) {
            assert!(((w[1][0] - w[0][0]) - step).abs() < 1e-3);
        }
    }

    #[test]
    fn both_paths_project_orthogonally() {
        // Same variance structure, once with n < d and once with n > d.
        let wide: Vec<Vec<f32>> = (0..4)
            .map(|i| (0..6).map(|j| ((i * 7 + j * 3) % 5) as f32).collect())
            .collect();
        let a = Pca::new(2).fit_transform(&wide).unwrap();

        let tall: Vec<Vec<f32>> = wide.iter().map(|r| r[..3].to_vec()).collect();
        let b = Pca::new(2).fit_transform(&tall).unwrap();

        // Distances between projected points are bounded by the originals.
        for (i, j) in [(0, 1), (1, 2), (2, 3)] {
            let orig: f32 = wide[i].iter().zip(&wide[j]).map(|(x, y)| (x - y).powi(2)).sum();
            let proj: f32 = a[i].iter().zip(&a[j]).map(|(x, y)| (x - y).powi(2)).sum();
            assert!(proj <= orig + 1e-3);
        }
        assert_eq!(b.len(), 4);
        assert!(b.iter().all(|r| r.len() == 2));
    }

    #[test]
    fn deterministic_signs() {
        let data = vec![vec![0.0, 1.0], vec![3.0, 1.5], vec![-1.0, 0.0], vec![5.0, 2.0]];
        let a = Pca::new(2).fit_transform(&data).unwrap();
        let b = Pca::new(2).fit_transform(&data).unwrap();
        assert_eq!(a, b);
        let pivot = a
            .iter()
            .map(|r| r[0])
            .max_by(|x, y| x.abs().total_cmp(&y.abs()))
            .unwrap();
        assert!(pivot > 0.0);
    }

    #[test]
    fn single_sample_is_origin() {
        let out = Pca::new(50).fit_transform(&[vec![3.0, 4.0]]).unwrap();
        assert_eq!(out, vec![vec![0.0]]);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(Pca::new(2).fit_transform(&[]), Err(Error::EmptyInput)));
        assert!(Pca::new(0).fit_transform(&[vec![1.0]]).is_err());
        assert!(matches!(
            Pca::new(2).fit_transform(&[vec![1.0, 2.0], vec![1.0]]),
            Err(Error::DimensionMismatch { .. })
        ));
    }
}
