//! Clustering algorithms for grouping reduced image coordinates.
//!
//! Three strategies with different semantics are available, selected through
//! [`AlgorithmConfig`]:
//!
//! ### K-means
//!
//! Assign each point to the nearest centroid, then update centroids to the mean of
//! their points. Repeat.
//!
//! **Objective**: Minimize within-cluster sum of squares:
//!
//! ```text
//! J = Σ_k Σ_{x ∈ C_k} ||x - μ_k||²
//! ```
//!
//! Every point receives a label in `0..k`; there is no noise.
//!
//! ### DBSCAN
//!
//! Density-based clustering that can discover non-convex clusters and identify
//! outliers (noise points). The number of clusters is data-dependent, possibly zero.
//! Noise points receive the [`NOISE`] sentinel.
//!
//! ### Agglomerative
//!
//! Bottom-up hierarchical merging under a chosen [`Affinity`] and [`Linkage`], cut to
//! exactly `k` clusters.
//!
//! ## Usage
//!
//! ```rust
//! use imgclump::cluster::{cluster, AlgorithmConfig, Clustering, Dbscan, Kmeans, NOISE};
//!
//! let data = vec![
//!     vec![0.0, 0.0],
//!     vec![0.1, 0.1],
//!     vec![10.0, 10.0],
//!     vec![10.1, 10.1],
//! ];
//!
//! let labels = Kmeans::new(2).with_seed(42).fit_predict(&data).unwrap();
//! assert_eq!(labels[0], labels[1]);
//! assert_ne!(labels[0], labels[2]);
//!
//! let labels = Dbscan::new(0.5, 3).fit_predict(&data).unwrap();
//! assert!(labels.iter().all(|&l| l == NOISE));
//!
//! let assignment = cluster(&data, &AlgorithmConfig::kmeans(2).unwrap(), Some(42)).unwrap();
//! assert_eq!(assignment.n_clusters(), 2);
//! ```

mod agglomerative;
mod algorithm;
mod assignment;
mod dbscan;
mod kmeans;
mod traits;
pub(crate) mod util;

pub use agglomerative::{Affinity, Agglomerative, Linkage};
pub use algorithm::AlgorithmConfig;
pub use assignment::ClusterAssignment;
pub use dbscan::{Dbscan, DbscanExt, NOISE};
pub use kmeans::{Kmeans, KmeansFit};
pub use traits::Clustering;

use crate::error::Result;
use tracing::debug;

/// Cluster `coords` with the algorithm described by `config`.
///
/// `seed` makes k-means repeatable; the other algorithms are deterministic.
pub fn cluster(
    coords: &[Vec<f32>],
    config: &AlgorithmConfig,
    seed: Option<u64>,
) -> Result<ClusterAssignment> {
    let clusterer = config.build(seed)?;
    let labels = clusterer.fit_predict(coords)?;
    debug_assert_eq!(labels.len(), coords.len());

    let assignment = ClusterAssignment::new(labels);
    debug!(
        algorithm = config.name(),
        points = coords.len(),
        clusters = assignment.n_clusters(),
        noise = assignment.noise_count(),
        "clustered"
    );
    Ok(assignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn cluster_dispatches_each_algorithm() {
        let data = vec![
            vec![0.0, 0.0],
            vec![0.1, 0.0],
            vec![0.0, 0.1],
            vec![8.0, 8.0],
            vec![8.1, 8.0],
            vec![8.0, 8.1],
        ];
        let configs = [
            AlgorithmConfig::kmeans(2).unwrap(),
            AlgorithmConfig::dbscan(0.5, 2).unwrap(),
            AlgorithmConfig::agglomerative(2, Affinity::Euclidean, Linkage::Ward).unwrap(),
        ];
        for cfg in &configs {
            let a = cluster(&data, cfg, Some(0)).unwrap();
            assert_eq!(a.len(), 6);
            assert_eq!(a.partition(), vec![vec![0, 1, 2], vec![3, 4, 5]], "{cfg}");
        }
    }

    #[test]
    fn cluster_rejects_k_above_point_count() {
        let data = vec![vec![0.0, 0.0], vec![1.0, 1.0]];
        let err = cluster(&data, &AlgorithmConfig::kmeans(3).unwrap(), None).unwrap_err();
        assert!(matches!(err, Error::InvalidClusterCount { requested: 3, n_items: 2 }));
    }
}
