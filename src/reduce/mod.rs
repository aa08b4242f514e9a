//! Dimensionality reduction from embedding vectors to 2-D coordinates.
//!
//! Two stages:
//!
//! 1. [`Pca`] to at most 50 dimensions, keeping the directions of dominant variance
//!    and discarding most of the noise in the raw embeddings.
//! 2. [`Tsne`] to exactly 2 dimensions, preserving local neighborhoods. Inputs above
//!    1000 images use the Barnes-Hut approximation by default.
//!
//! The output is meant for clustering (and, incidentally, plotting). Because t-SNE
//! only preserves neighborhoods, compare outputs by who-is-near-whom rather than by
//! raw coordinates.

mod linalg;
mod pca;
mod tsne;

pub use pca::Pca;
pub use tsne::{Tsne, TsneInit, TsneMethod};

use crate::error::Result;
use tracing::debug;

/// Number of PCA components kept before t-SNE.
pub const PCA_COMPONENTS: usize = 50;

/// PCA followed by t-SNE.
#[derive(Debug, Clone)]
pub struct Reducer {
    pca: Pca,
    tsne: Tsne,
}

impl Reducer {
    /// Reducer with [`PCA_COMPONENTS`] components and default t-SNE settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the PCA stage.
    pub fn with_pca(mut self, pca: Pca) -> Self {
        self.pca = pca;
        self
    }

    /// Replace the t-SNE stage.
    pub fn with_tsne(mut self, tsne: Tsne) -> Self {
        self.tsne = tsne;
        self
    }

    /// The PCA stage.
    pub fn pca(&self) -> &Pca {
        &self.pca
    }

    /// The t-SNE stage.
    pub fn tsne(&self) -> &Tsne {
        &self.tsne
    }

    /// Reduce `matrix` (one embedding per row) to 2-D coordinates, row-aligned.
    pub fn reduce(&self, matrix: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        let projected = self.pca.fit_transform(matrix)?;
        let coords = self.tsne.fit_transform(&projected)?;
        debug!(
            samples = matrix.len(),
            features = matrix.first().map_or(0, Vec::len),
            components = projected.first().map_or(0, Vec::len),
            "reduced to 2-D"
        );
        Ok(coords)
    }
}

impl Default for Reducer {
    fn default() -> Self {
        Self {
            pca: Pca::new(PCA_COMPONENTS),
            tsne: Tsne::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn reduces_high_dimensional_groups() {
        // Two groups in 200-D that differ in which half of the vector is lit.
        let mut data = Vec::new();
        for g in 0..2 {
            for i in 0..6 {
                let mut v = vec![0.0f32; 200];
                for x in &mut v[g * 100..(g + 1) * 100] {
                    *x = 1.0;
                }
                v[i] += 0.1;
                data.push(v);
            }
        }
        let coords = Reducer::new().reduce(&data).unwrap();
        assert_eq!(coords.len(), 12);
        assert!(coords.iter().all(|c| c.len() == 2));

        // Each point is closer to its own group's centroid than to the other one.
        let centroid = |g: usize| -> [f32; 2] {
            let pts = &coords[g * 6..(g + 1) * 6];
            let sx: f32 = pts.iter().map(|c| c[0]).sum();
            let sy: f32 = pts.iter().map(|c| c[1]).sum();
            [sx / 6.0, sy / 6.0]
        };
        let dist = |a: &[f32], b: &[f32]| ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt();
        for (i, c) in coords.iter().enumerate() {
            let own = centroid(i / 6);
            let other = centroid(1 - i / 6);
            assert!(dist(c, &own) < dist(c, &other));
        }
    }

    #[test]
    fn single_row_maps_to_origin() {
        let coords = Reducer::new().reduce(&[vec![1.0; 8]]).unwrap();
        assert_eq!(coords, vec![vec![0.0, 0.0]]);
    }

    #[test]
    fn empty_matrix_is_an_error() {
        assert!(matches!(Reducer::new().reduce(&[]), Err(Error::EmptyInput)));
    }
}
