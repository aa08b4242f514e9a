use super::agglomerative::{check_pairing, Affinity, Agglomerative, Linkage};
use super::dbscan::Dbscan;
use super::kmeans::Kmeans;
use super::traits::Clustering;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Choice of clustering algorithm together with its parameters.
///
/// Construct through [`AlgorithmConfig::kmeans`], [`AlgorithmConfig::dbscan`] or
/// [`AlgorithmConfig::agglomerative`] to get validation up front. Values built
/// directly (or deserialized) are validated again when the pipeline starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "lowercase")]
pub enum AlgorithmConfig {
    /// Fixed-k partitioning.
    Kmeans {
        /// Number of clusters.
        k: usize,
    },
    /// Density-based clustering with noise detection.
    Dbscan {
        /// Neighborhood radius.
        eps: f32,
        /// Minimum neighborhood size, the point itself included.
        min_samples: usize,
    },
    /// Hierarchical bottom-up merging cut at `k` clusters.
    Agglomerative {
        /// Number of clusters.
        k: usize,
        /// Point-to-point distance.
        affinity: Affinity,
        /// Merge criterion.
        linkage: Linkage,
    },
}

impl AlgorithmConfig {
    /// Algorithm names recognised in settings.
    pub const NAMES: [&'static str; 3] = ["kmeans", "dbscan", "agglomerative"];

    /// Validated k-means configuration.
    pub fn kmeans(k: usize) -> Result<Self> {
        let cfg = AlgorithmConfig::Kmeans { k };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validated DBSCAN configuration.
    pub fn dbscan(eps: f32, min_samples: usize) -> Result<Self> {
        let cfg = AlgorithmConfig::Dbscan { eps, min_samples };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validated agglomerative configuration.
    pub fn agglomerative(k: usize, affinity: Affinity, linkage: Linkage) -> Result<Self> {
        let cfg = AlgorithmConfig::Agglomerative {
            k,
            affinity,
            linkage,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Short algorithm name.
    pub fn name(&self) -> &'static str {
        match self {
            AlgorithmConfig::Kmeans { .. } => "kmeans",
            AlgorithmConfig::Dbscan { .. } => "dbscan",
            AlgorithmConfig::Agglomerative { .. } => "agglomerative",
        }
    }

    /// Check parameters that do not depend on the data.
    ///
    /// `k` larger than the number of images can only be detected once the images are known
    /// and is reported by the clustering step as [`Error::InvalidClusterCount`].
    pub fn validate(&self) -> Result<()> {
        match *self {
            AlgorithmConfig::Kmeans { k } => check_k(k),
            AlgorithmConfig::Dbscan { eps, min_samples } => {
                if !eps.is_finite() || eps <= 0.0 {
                    return Err(Error::InvalidParameter {
                        name: "eps",
                        message: "must be a positive number",
                    });
                }
                if min_samples == 0 {
                    return Err(Error::InvalidParameter {
                        name: "min_samples",
                        message: "must be at least 1",
                    });
                }
                Ok(())
            }
            AlgorithmConfig::Agglomerative {
                k,
                affinity,
                linkage,
            } => {
                check_k(k)?;
                check_pairing(affinity, linkage)
            }
        }
    }

    /// Build the clusterer this configuration describes.
    ///
    /// `seed` only affects algorithms with random initialisation (k-means).
    pub fn build(&self, seed: Option<u64>) -> Result<Box<dyn Clustering>> {
        self.validate()?;
        Ok(match *self {
            AlgorithmConfig::Kmeans { k } => {
                let kmeans = Kmeans::new(k);
                Box::new(match seed {
                    Some(s) => kmeans.with_seed(s),
                    None => kmeans,
                })
            }
            AlgorithmConfig::Dbscan { eps, min_samples } => Box::new(Dbscan::new(eps, min_samples)),
            AlgorithmConfig::Agglomerative {
                k,
                affinity,
                linkage,
            } => Box::new(
                Agglomerative::new(k)
                    .with_affinity(affinity)
                    .with_linkage(linkage),
            ),
        })
    }
}

impl fmt::Display for AlgorithmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlgorithmConfig::Kmeans { k } => write!(f, "kmeans(k={k})"),
            AlgorithmConfig::Dbscan { eps, min_samples } => {
                write!(f, "dbscan(eps={eps}, min_samples={min_samples})")
            }
            AlgorithmConfig::Agglomerative {
                k,
                affinity,
                linkage,
            } => write!(f, "agglomerative(k={k}, affinity={affinity}, linkage={linkage})"),
        }
    }
}

fn check_k(k: usize) -> Result<()> {
    if k == 0 {
        return Err(Error::InvalidParameter {
            name: "k",
            message: "must be at least 1",
        });
    }
    Ok(())
}
