//! DBSCAN: density-based clustering with noise (Ester et al., 1996).
//!
//! Groups points that sit in dense regions and leaves isolated points unlabeled.
//! The number of clusters falls out of the data; it may be zero.
//!
//! # Definitions
//!
//! - The **neighborhood** of `p` is every point within `eps` of `p`, `p` included.
//! - `p` is a **core** point if its neighborhood holds at least `min_samples` points.
//! - A **border** point is not core but lies in the neighborhood of a core point.
//! - Everything else is **noise**.
//!
//! Clusters are the connected components of core points (two cores are connected when
//! each lies in the other's neighborhood), plus the border points they reach. A border
//! point reachable from two clusters joins the one discovered first.
//!
//! # Implementation
//!
//! Neighborhoods are computed once by brute force (O(n²) distances, O(n·avg) memory),
//! then clusters are grown breadth-first from core points in index order. Cluster ids
//! are therefore dense and ordered by the lowest core index they contain.
//!
//! # Choosing `eps`
//!
//! In the image pipeline DBSCAN runs on t-SNE coordinates, whose scale grows with the
//! number of images. An `eps` that works for one folder may mark everything as noise in
//! another; a k-distance plot of the coordinates is the usual guide.

use super::traits::Clustering;
use super::util;
use crate::error::{Error, Result};
use std::collections::VecDeque;

/// Label reserved for points that belong to no cluster.
///
/// Only DBSCAN produces it. Consumers must treat it as "exclude", never as a group.
pub const NOISE: usize = usize::MAX;

/// DBSCAN clustering.
#[derive(Debug, Clone)]
pub struct Dbscan {
    eps: f32,
    /// Neighborhood size required for a core point, the point itself included.
    min_samples: usize,
}

impl Dbscan {
    /// Create a new DBSCAN clusterer with neighborhood radius `eps`.
    pub fn new(eps: f32, min_samples: usize) -> Self {
        Self { eps, min_samples }
    }

    /// Set the neighborhood radius.
    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    /// Set the neighborhood size required for a core point.
    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples;
        self
    }

    fn check(&self) -> Result<()> {
        if self.eps.is_nan() || self.eps <= 0.0 {
            return Err(Error::InvalidParameter {
                name: "eps",
                message: "must be positive",
            });
        }
        if self.min_samples == 0 {
            return Err(Error::InvalidParameter {
                name: "min_samples",
                message: "must be at least 1",
            });
        }
        Ok(())
    }

    /// Indices within `eps` of each point, the point itself included.
    fn neighborhoods(&self, data: &[Vec<f32>]) -> Vec<Vec<usize>> {
        let eps_sq = self.eps * self.eps;
        let n = data.len();
        let mut hoods: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
        for i in 0..n {
            for j in (i + 1)..n {
                if util::squared_euclidean(&data[i], &data[j]) <= eps_sq {
                    hoods[i].push(j);
                    hoods[j].push(i);
                }
            }
        }
        hoods
    }

    /// Cluster id per point, `None` for noise.
    fn labels(&self, data: &[Vec<f32>]) -> Result<Vec<Option<usize>>> {
        util::check_rows(data)?;
        self.check()?;

        let hoods = self.neighborhoods(data);
        let is_core: Vec<bool> = hoods.iter().map(|h| h.len() >= self.min_samples).collect();

        let mut labels: Vec<Option<usize>> = vec![None; data.len()];
        let mut next_id = 0;
        let mut queue = VecDeque::new();

        for seed in 0..data.len() {
            if !is_core[seed] || labels[seed].is_some() {
                continue;
            }
            let id = next_id;
            next_id += 1;
            labels[seed] = Some(id);
            queue.push_back(seed);

            while let Some(core) = queue.pop_front() {
                for &nb in &hoods[core] {
                    if labels[nb].is_some() {
                        continue;
                    }
                    labels[nb] = Some(id);
                    // Border points join the cluster but do not extend it.
                    if is_core[nb] {
                        queue.push_back(nb);
                    }
                }
            }
        }

        Ok(labels)
    }
}

impl Default for Dbscan {
    fn default() -> Self {
        Self::new(0.5, 5)
    }
}

impl Clustering for Dbscan {
    /// Labels are `0..m` for discovered clusters and [`NOISE`] for outliers.
    fn fit_predict(&self, data: &[Vec<f32>]) -> Result<Vec<usize>> {
        Ok(self
            .labels(data)?
            .into_iter()
            .map(|l| l.unwrap_or(NOISE))
            .collect())
    }

    /// Not known before fitting; always 0.
    fn n_clusters(&self) -> usize {
        0
    }
}

/// DBSCAN labels with noise as `None` instead of the [`NOISE`] sentinel.
pub trait DbscanExt {
    /// Fit and predict, returning labels where noise is marked as `None`.
    fn fit_predict_with_noise(&self, data: &[Vec<f32>]) -> Result<Vec<Option<usize>>>;

    /// Check if a label represents noise.
    fn is_noise(label: usize) -> bool {
        label == NOISE
    }
}

impl DbscanExt for Dbscan {
    fn fit_predict_with_noise(&self, data: &[Vec<f32>]) -> Result<Vec<Option<usize>>> {
        self.labels(data)
    }
}
