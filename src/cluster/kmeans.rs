//! K-means: centroid-based partitioning into a fixed number of clusters.
//!
//! # The Algorithm (Lloyd, 1982)
//!
//! 1. **Seeding** (k-means++, Arthur & Vassilvitskii 2007): pick the first centroid
//!    uniformly, then each next centroid with probability proportional to its squared
//!    distance from the nearest centroid already chosen.
//! 2. **Assignment**: label each point with its nearest centroid.
//! 3. **Update**: move each centroid to the mean of its points.
//! 4. Repeat 2–3 until the centroids move less than `tol` (squared, summed) or
//!    `max_iter` is reached.
//!
//! The whole procedure is restarted `n_init` times (at least once) and the fit with
//! the lowest inertia (within-cluster sum of squares) wins.
//!
//! ## Empty clusters
//!
//! If a centroid loses all of its points, it is moved onto the point that is currently
//! farthest from its own centroid. With at least `k` distinct points this keeps every
//! cluster populated.
//!
//! ## Determinism
//!
//! Seeding is random. Use [`Kmeans::with_seed`] for repeatable partitions.

use super::traits::Clustering;
use super::util::{self, squared_euclidean};
use crate::error::{Error, Result};
use rand::prelude::*;

/// K-means clustering algorithm.
#[derive(Debug, Clone)]
pub struct Kmeans {
    k: usize,
    max_iter: usize,
    tol: f32,
    n_init: usize,
    seed: Option<u64>,
}

/// Result of a k-means fit.
#[derive(Debug, Clone)]
pub struct KmeansFit {
    /// Final centroids, one per cluster.
    pub centroids: Vec<Vec<f32>>,
    /// Cluster label per input point, in `0..k`.
    pub labels: Vec<usize>,
    /// Sum of squared distances from each point to its centroid.
    pub inertia: f32,
    /// Lloyd iterations used by the winning restart.
    pub n_iter: usize,
}

impl Kmeans {
    /// Create a new k-means clusterer for `k` clusters.
    ///
    /// Defaults: `max_iter = 300`, `tol = 1e-4`, `n_init = 10`, random seed.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iter: 300,
            tol: 1e-4,
            n_init: 10,
            seed: None,
        }
    }

    /// Set the maximum number of Lloyd iterations per restart.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set the convergence tolerance on total squared centroid movement.
    pub fn with_tol(mut self, tol: f32) -> Self {
        self.tol = tol;
        self
    }

    /// Set the number of restarts.
    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init;
        self
    }

    /// Fix the RNG seed for reproducible results.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Fit centroids and labels.
    pub fn fit(&self, data: &[Vec<f32>]) -> Result<KmeansFit> {
        let n = data.len();
        if n == 0 {
            return Err(Error::EmptyInput);
        }
        if self.k == 0 {
            return Err(Error::InvalidParameter {
                name: "k",
                message: "must be at least 1",
            });
        }
        if self.k > n {
            return Err(Error::InvalidClusterCount {
                requested: self.k,
                n_items: n,
            });
        }
        if self.max_iter == 0 {
            return Err(Error::InvalidParameter {
                name: "max_iter",
                message: "must be at least 1",
            });
        }
        util::check_rows(data)?;

        let mut rng: Box<dyn RngCore> = match self.seed {
            Some(s) => Box::new(StdRng::seed_from_u64(s)),
            None => Box::new(rand::rng()),
        };

        let mut best = self.lloyd(data, &mut rng);
        for _ in 1..self.n_init {
            let fit = self.lloyd(data, &mut rng);
            if fit.inertia < best.inertia {
                best = fit;
            }
        }
        Ok(best)
    }

    fn lloyd(&self, data: &[Vec<f32>], rng: &mut dyn RngCore) -> KmeansFit {
        let n = data.len();
        let d = data[0].len();
        let mut centroids = plus_plus_init(data, self.k, rng);
        let mut labels = vec![0usize; n];
        let mut n_iter = 0;

        for iter in 0..self.max_iter {
            n_iter = iter + 1;
            assign(data, &centroids, &mut labels);

            let mut sums = vec![vec![0.0f32; d]; self.k];
            let mut counts = vec![0usize; self.k];
            for (point, &label) in data.iter().zip(&labels) {
                counts[label] += 1;
                for (s, x) in sums[label].iter_mut().zip(point) {
                    *s += x;
                }
            }

            for c in 0..self.k {
                if counts[c] == 0 {
                    // Re-seed with the point farthest from its current centroid.
                    let far = farthest_point(data, &centroids, &labels);
                    sums[c].clone_from(&data[far]);
                    counts[c] = 1;
                    labels[far] = c;
                } else {
                    let inv = 1.0 / counts[c] as f32;
                    for s in &mut sums[c] {
                        *s *= inv;
                    }
                }
            }

            let shift: f32 = centroids
                .iter()
                .zip(&sums)
                .map(|(old, new)| squared_euclidean(old, new))
                .sum();
            centroids = sums;

            if shift <= self.tol {
                break;
            }
        }

        assign(data, &centroids, &mut labels);
        let inertia = data
            .iter()
            .zip(&labels)
            .map(|(p, &l)| squared_euclidean(p, &centroids[l]))
            .sum();

        KmeansFit {
            centroids,
            labels,
            inertia,
            n_iter,
        }
    }
}

impl Clustering for Kmeans {
    fn fit_predict(&self, data: &[Vec<f32>]) -> Result<Vec<usize>> {
        Ok(self.fit(data)?.labels)
    }

    fn n_clusters(&self) -> usize {
        self.k
    }
}

fn plus_plus_init(data: &[Vec<f32>], k: usize, rng: &mut dyn RngCore) -> Vec<Vec<f32>> {
    let n = data.len();
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    centroids.push(data[rng.random_range(0..n)].clone());

    let mut closest: Vec<f32> = data
        .iter()
        .map(|p| squared_euclidean(p, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f32 = closest.iter().sum();
        let next = if total > 0.0 {
            let mut target = rng.random::<f32>() * total;
            let mut pick = n - 1;
            for (i, &w) in closest.iter().enumerate() {
                if target < w {
                    pick = i;
                    break;
                }
                target -= w;
            }
            pick
        } else {
            // All remaining points coincide with a centroid.
            rng.random_range(0..n)
        };

        centroids.push(data[next].clone());
        let newest = &centroids[centroids.len() - 1];
        for (c, p) in closest.iter_mut().zip(data) {
            *c = c.min(squared_euclidean(p, newest));
        }
    }

    centroids
}

fn assign(data: &[Vec<f32>], centroids: &[Vec<f32>], labels: &mut [usize]) {
    for (point, label) in data.iter().zip(labels.iter_mut()) {
        let mut best = 0;
        let mut best_d = f32::INFINITY;
        for (c, centroid) in centroids.iter().enumerate() {
            let d = squared_euclidean(point, centroid);
            if d < best_d {
                best_d = d;
                best = c;
            }
        }
        *label = best;
    }
}

fn farthest_point(data: &[Vec<f32>], centroids: &[Vec<f32>], labels: &[usize]) -> usize {
    let mut far = 0;
    let mut far_d = f32::NEG_INFINITY;
    for (i, (point, &label)) in data.iter().zip(labels).enumerate() {
        let d = squared_euclidean(point, &centroids[label]);
        if d > far_d {
            far_d = d;
            far = i;
        }
    }
    far
}
