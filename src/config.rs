//! Run settings, loadable from TOML.
//!
//! ```toml
//! embedder = "resnet50"
//! algorithm = "agglomerative"
//! n_clusters = 5
//! affinity = "cosine"
//! linkage = "average"
//! resample_size = 96
//! seed = 7
//! ```
//!
//! Every key is optional; missing keys take the defaults of [`Settings::default`].
//! Unknown keys are rejected so typos do not silently fall back to defaults.

use crate::cluster::{Affinity, AlgorithmConfig, Linkage};
use crate::error::{Error, Result};
use crate::features::{Embedder, FeatureExtractor, MIN_RESAMPLE_SIZE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// User-facing knobs for one clustering run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Cluster count for k-means and agglomerative clustering.
    pub n_clusters: usize,
    /// Feature extractor.
    pub embedder: Embedder,
    /// Where pretrained weights are cached; the runtime's default when unset.
    pub model_cache: Option<PathBuf>,
    /// Side length images are resized to by the `filters` embedder.
    pub resample_size: u32,
    /// One of [`AlgorithmConfig::NAMES`].
    pub algorithm: String,
    /// DBSCAN neighborhood radius, in reduced-coordinate units.
    pub eps: f32,
    /// DBSCAN minimum neighborhood size.
    pub min_samples: usize,
    /// Agglomerative point distance.
    pub affinity: Affinity,
    /// Agglomerative merge criterion.
    pub linkage: Linkage,
    /// Seed for k-means and random t-SNE initialisation.
    pub seed: Option<u64>,
    /// Extraction worker count; all logical CPUs when unset.
    pub threads: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            n_clusters: 3,
            embedder: Embedder::default(),
            model_cache: None,
            resample_size: 128,
            algorithm: "kmeans".to_string(),
            eps: 0.5,
            min_samples: 5,
            affinity: Affinity::Euclidean,
            linkage: Linkage::Ward,
            seed: None,
            threads: None,
        }
    }
}

impl Settings {
    /// Read settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse settings from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check the settings that are not covered by [`Settings::algorithm_config`].
    pub fn validate(&self) -> Result<()> {
        if self.resample_size < MIN_RESAMPLE_SIZE {
            return Err(Error::InvalidParameter {
                name: "resample_size",
                message: "must be at least 8",
            });
        }
        if self.threads == Some(0) {
            return Err(Error::InvalidParameter {
                name: "threads",
                message: "must be at least 1",
            });
        }
        Ok(())
    }

    /// Construct the selected extractor. Pretrained weights are downloaded on first use.
    pub fn extractor(&self) -> Result<Box<dyn FeatureExtractor>> {
        self.embedder
            .build(self.resample_size, self.model_cache.as_deref())
    }

    /// The clustering configuration selected by `algorithm`.
    ///
    /// The name is matched case-insensitively. Only the parameters of the selected
    /// algorithm are validated.
    pub fn algorithm_config(&self) -> Result<AlgorithmConfig> {
        match self.algorithm.trim().to_ascii_lowercase().as_str() {
            "kmeans" => AlgorithmConfig::kmeans(self.n_clusters),
            "dbscan" => AlgorithmConfig::dbscan(self.eps, self.min_samples),
            "agglomerative" => {
                AlgorithmConfig::agglomerative(self.n_clusters, self.affinity, self.linkage)
            }
            _ => Err(Error::UnsupportedAlgorithm(self.algorithm.clone())),
        }
    }
}
