//! Agglomerative (bottom-up hierarchical) clustering.
//!
//! Every point starts as its own cluster; the two closest clusters are merged until
//! `k` clusters remain. "Closest" is defined by two choices:
//!
//! - [`Affinity`]: the point-to-point distance.
//! - [`Linkage`]: how point distances combine into a cluster-to-cluster distance.
//!
//! ## Implementation
//!
//! - **Single linkage** is the minimum spanning tree cut: build the MST over the
//!   affinity distances (Prim), drop the `k - 1` heaviest edges.
//! - **Ward, complete, average** use the nearest-neighbor chain algorithm with
//!   Lance–Williams distance updates (O(n²) time and memory). The chain produces
//!   merges out of order; because these linkages are reducible, sorting the merges by
//!   height and replaying the first `n - k` with a union-find yields the same cut as
//!   the textbook greedy procedure.
//!
//! Ward works on squared Euclidean distances and is only defined for
//! [`Affinity::Euclidean`].
//!
//! Labels are numbered by first appearance, so point 0 is always in cluster 0.

use super::traits::Clustering;
use super::util::{self, UnionFind};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Point-to-point distance used by agglomerative clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Affinity {
    /// Straight-line distance.
    #[default]
    Euclidean,
    /// Sum of absolute differences.
    L1,
    /// Sum of squared differences.
    L2,
    /// Axis-aligned (city block) distance.
    Manhattan,
    /// Angular distance, `1 - cos(a, b)`.
    Cosine,
}

impl Affinity {
    /// All affinities, in display order.
    pub const ALL: [Affinity; 5] = [
        Affinity::Euclidean,
        Affinity::L1,
        Affinity::L2,
        Affinity::Manhattan,
        Affinity::Cosine,
    ];

    /// Name as accepted by [`FromStr`] and settings files.
    pub fn as_str(self) -> &'static str {
        match self {
            Affinity::Euclidean => "euclidean",
            Affinity::L1 => "l1",
            Affinity::L2 => "l2",
            Affinity::Manhattan => "manhattan",
            Affinity::Cosine => "cosine",
        }
    }

    /// Distance between two points.
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            Affinity::Euclidean => util::squared_euclidean(a, b).sqrt(),
            Affinity::L2 => util::squared_euclidean(a, b),
            Affinity::L1 | Affinity::Manhattan => {
                a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
            }
            Affinity::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                match (na > f32::EPSILON, nb > f32::EPSILON) {
                    (true, true) => (1.0 - dot / (na * nb)).max(0.0),
                    (false, false) => 0.0,
                    _ => 1.0,
                }
            }
        }
    }
}

impl fmt::Display for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Affinity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Affinity::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or(Error::InvalidParameter {
                name: "affinity",
                message: "expected one of euclidean, l1, l2, manhattan, cosine",
            })
    }
}

/// Merge criterion used by agglomerative clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    /// Minimum-variance merge (Ward). Euclidean affinity only.
    #[default]
    Ward,
    /// Maximum distance between members.
    Complete,
    /// Average distance between members.
    Average,
    /// Minimum distance between members.
    Single,
}

impl Linkage {
    /// All linkages, in display order.
    pub const ALL: [Linkage; 4] = [
        Linkage::Ward,
        Linkage::Complete,
        Linkage::Average,
        Linkage::Single,
    ];

    /// Name as accepted by [`FromStr`] and settings files.
    pub fn as_str(self) -> &'static str {
        match self {
            Linkage::Ward => "ward",
            Linkage::Complete => "complete",
            Linkage::Average => "average",
            Linkage::Single => "single",
        }
    }
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Linkage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Linkage::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or(Error::InvalidParameter {
                name: "linkage",
                message: "expected one of ward, complete, average, single",
            })
    }
}

/// Check the affinity/linkage pairing.
pub(crate) fn check_pairing(affinity: Affinity, linkage: Linkage) -> Result<()> {
    if linkage == Linkage::Ward && affinity != Affinity::Euclidean {
        return Err(Error::InvalidParameter {
            name: "linkage",
            message: "ward linkage requires euclidean affinity",
        });
    }
    Ok(())
}

/// Agglomerative clustering cut at a fixed number of clusters.
#[derive(Debug, Clone)]
pub struct Agglomerative {
    k: usize,
    affinity: Affinity,
    linkage: Linkage,
}

impl Agglomerative {
    /// Create a clusterer for `k` clusters with Euclidean affinity and Ward linkage.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            affinity: Affinity::default(),
            linkage: Linkage::default(),
        }
    }

    /// Set the point-to-point distance.
    pub fn with_affinity(mut self, affinity: Affinity) -> Self {
        self.affinity = affinity;
        self
    }

    /// Set the merge criterion.
    pub fn with_linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }

    /// Merges `(a, b, height)` of the full dendrogram, sorted by height.
    ///
    /// `a` and `b` are representative point indices of the two merged clusters.
    pub fn merges(&self, data: &[Vec<f32>]) -> Result<Vec<(usize, usize, f32)>> {
        util::check_rows(data)?;
        check_pairing(self.affinity, self.linkage)?;

        let n = data.len();
        let mut merges = match self.linkage {
            Linkage::Single => util::prim_mst(n, |i, j| self.affinity.distance(&data[i], &data[j])),
            _ => self.nn_chain(data),
        };
        merges.sort_by(|a, b| a.2.total_cmp(&b.2));
        Ok(merges)
    }

    fn nn_chain(&self, data: &[Vec<f32>]) -> Vec<(usize, usize, f32)> {
        let n = data.len();
        let mut dist = vec![0.0f64; n * n];
        for i in 0..n {
            for j in (i + 1)..n {
                let d = match self.linkage {
                    Linkage::Ward => f64::from(util::squared_euclidean(&data[i], &data[j])),
                    _ => f64::from(self.affinity.distance(&data[i], &data[j])),
                };
                dist[i * n + j] = d;
                dist[j * n + i] = d;
            }
        }

        let mut active = vec![true; n];
        let mut size = vec![1usize; n];
        let mut chain: Vec<usize> = Vec::with_capacity(n);
        let mut merges: Vec<(usize, usize, f32)> = Vec::with_capacity(n.saturating_sub(1));

        while merges.len() + 1 < n {
            if chain.is_empty() {
                // At least two clusters are still active here.
                let first = active.iter().position(|&a| a).unwrap_or(0);
                chain.push(first);
            }

            let (a, b) = loop {
                let a = chain[chain.len() - 1];
                let prev = chain.len().checked_sub(2).map(|i| chain[i]);

                // Nearest active neighbor; ties prefer the previous chain element.
                let mut b = usize::MAX;
                let mut best = f64::INFINITY;
                if let Some(p) = prev {
                    b = p;
                    best = dist[a * n + p];
                }
                for x in 0..n {
                    if x == a || !active[x] {
                        continue;
                    }
                    let d = dist[a * n + x];
                    if d < best || b == usize::MAX {
                        best = d;
                        b = x;
                    }
                }

                if Some(b) == prev {
                    break (a, b);
                }
                chain.push(b);
            };
            chain.pop();
            chain.pop();

            let d_ab = dist[a * n + b];
            let (na, nb) = (size[a] as f64, size[b] as f64);
            for x in 0..n {
                if !active[x] || x == a || x == b {
                    continue;
                }
                let (dax, dbx) = (dist[a * n + x], dist[b * n + x]);
                let nx = size[x] as f64;
                let updated = match self.linkage {
                    Linkage::Ward => ((na + nx) * dax + (nb + nx) * dbx - nx * d_ab) / (na + nb + nx),
                    Linkage::Complete => dax.max(dbx),
                    Linkage::Average => (na * dax + nb * dbx) / (na + nb),
                    Linkage::Single => dax.min(dbx),
                };
                dist[a * n + x] = updated;
                dist[x * n + a] = updated;
            }

            active[b] = false;
            size[a] += size[b];
            merges.push((a, b, d_ab as f32));
        }

        merges
    }
}

impl Clustering for Agglomerative {
    fn fit_predict(&self, data: &[Vec<f32>]) -> Result<Vec<usize>> {
        if data.is_empty() {
            return Err(Error::EmptyInput);
        }
        if self.k == 0 {
            return Err(Error::InvalidParameter {
                name: "k",
                message: "must be at least 1",
            });
        }
        let n = data.len();
        if self.k > n {
            return Err(Error::InvalidClusterCount {
                requested: self.k,
                n_items: n,
            });
        }

        let merges = self.merges(data)?;
        let mut uf = UnionFind::new(n);
        for &(a, b, _) in merges.iter().take(n - self.k) {
            uf.union(a, b);
        }
        Ok(uf.labels())
    }

    fn n_clusters(&self) -> usize {
        self.k
    }
}
