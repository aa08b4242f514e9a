//! Unsupervised grouping of images by visual similarity.
//!
//! `imgclump` takes a batch of image files and assigns each one a cluster label:
//!
//! 1. [`features`]: every image is embedded into a fixed-length vector by a pretrained
//!    network, in parallel. Unreadable images are reported and dropped.
//! 2. [`reduce`]: the embeddings are projected with PCA and then t-SNE to 2-D.
//! 3. [`cluster`]: the 2-D points are clustered with k-means, DBSCAN or agglomerative
//!    clustering.
//!
//! [`Pipeline`] runs the three stages and reports progress to an [`Observer`]. Placing
//! the images into per-cluster folders is a separate step, see [`sort`].
//!
//! ```no_run
//! use imgclump::{sort, Disposition, LogObserver, Pipeline, Settings};
//! use std::path::{Path, PathBuf};
//!
//! # fn main() -> imgclump::Result<()> {
//! let settings = Settings::load("imgclump.toml")?;
//! let (pipeline, algorithm) = Pipeline::from_settings(&settings)?;
//! let paths: Vec<PathBuf> = vec!["photos/a.jpg".into(), "photos/b.jpg".into()];
//! let observer = LogObserver::new();
//! let report = pipeline.run(&paths, &algorithm, &observer)?;
//! sort::dispose(&report, Path::new("sorted"), Disposition::Copy, &observer)?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod features;
pub mod observe;
pub mod pipeline;
pub mod reduce;
pub mod sort;

pub use cluster::{
    cluster, Affinity, Agglomerative, AlgorithmConfig, ClusterAssignment, Clustering, Dbscan,
    DbscanExt, Kmeans, KmeansFit, Linkage, NOISE,
};
pub use config::Settings;
pub use error::{Error, Result};
pub use features::{
    ConvEmbedder, Embedder, FeatureCollector, FeatureExtractor, Features, ModelEmbedder,
    PretrainedModel,
};
pub use observe::{Event, LogObserver, NoopObserver, Observer, Severity};
pub use pipeline::{CancelToken, ClusterReport, Pipeline};
pub use reduce::{Pca, Reducer, Tsne, TsneInit, TsneMethod};
pub use sort::{dispose, Disposition, DisposeSummary};
