//! End-to-end orchestration: extract, reduce, cluster.

use crate::cluster::{self, AlgorithmConfig, ClusterAssignment};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::features::{FeatureCollector, FeatureExtractor, ModelEmbedder, PretrainedModel};
use crate::observe::{NoopObserver, Observer, ProgressTracker, Severity};
use crate::reduce::Reducer;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Progress reached when feature extraction completes.
const EXTRACTION_END: u8 = 90;
/// Progress reached when dimensionality reduction completes.
const REDUCTION_END: u8 = 95;

/// Shared flag for stopping a run from another thread.
///
/// Clones observe the same flag. Once cancelled, a token stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, not-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Outcome of a run. All three fields are index-aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterReport {
    /// Images that were read successfully, in input order.
    pub paths: Vec<PathBuf>,
    /// 2-D embedding of each image.
    pub coordinates: Vec<Vec<f32>>,
    /// Cluster label of each image.
    pub assignment: ClusterAssignment,
}

impl ClusterReport {
    /// Number of clustered images.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether the report is empty.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// `(path, label)` pairs, `None` for noise.
    pub fn iter(&self) -> impl Iterator<Item = (&Path, Option<usize>)> + '_ {
        self.paths
            .iter()
            .zip(self.assignment.iter())
            .map(|(p, (_, label))| (p.as_path(), label))
    }
}

/// Image clustering pipeline.
///
/// The extractor is constructed once, before the run, and shared by every worker.
///
/// ```no_run
/// use imgclump::{AlgorithmConfig, Pipeline, PretrainedModel};
/// use std::path::PathBuf;
///
/// # fn main() -> imgclump::Result<()> {
/// let paths: Vec<PathBuf> = vec!["a.jpg".into(), "b.jpg".into(), "c.jpg".into()];
/// let report = Pipeline::pretrained(PretrainedModel::Resnet50)?
///     .with_seed(1)
///     .run_headless(&paths, &AlgorithmConfig::kmeans(2)?)?;
/// for (path, label) in report.iter() {
///     println!("{} -> {label:?}", path.display());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Pipeline<E = Box<dyn FeatureExtractor>> {
    extractor: E,
    reducer: Reducer,
    threads: Option<usize>,
    seed: Option<u64>,
    cancel: CancelToken,
}

impl Pipeline<ModelEmbedder> {
    /// Pipeline embedding images with `model`, loaded (and downloaded if needed) now.
    pub fn pretrained(model: PretrainedModel) -> Result<Self> {
        Ok(Self::new(ModelEmbedder::new(model)?))
    }
}

impl Pipeline<Box<dyn FeatureExtractor>> {
    /// Pipeline configured from `settings`, together with the selected algorithm.
    ///
    /// Settings and algorithm are validated before the extractor is built, so a bad
    /// configuration never triggers a model download.
    pub fn from_settings(settings: &Settings) -> Result<(Self, AlgorithmConfig)> {
        settings.validate()?;
        let algorithm = settings.algorithm_config()?;
        let mut pipeline = Self::new(settings.extractor()?);
        pipeline.threads = settings.threads;
        if let Some(seed) = settings.seed {
            pipeline = pipeline.with_seed(seed);
        }
        Ok((pipeline, algorithm))
    }
}

impl<E: FeatureExtractor> Pipeline<E> {
    /// Pipeline with a custom extractor and default reducer.
    pub fn new(extractor: E) -> Self {
        Self {
            extractor,
            reducer: Reducer::default(),
            threads: None,
            seed: None,
            cancel: CancelToken::new(),
        }
    }

    /// Use `threads` extraction workers.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Replace the reducer.
    pub fn with_reducer(mut self, reducer: Reducer) -> Self {
        self.reducer = reducer;
        self
    }

    /// Seed k-means and the t-SNE random initialisation.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A handle that cancels runs of this pipeline.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The extractor.
    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    /// Cluster `paths` without notifications.
    pub fn run_headless(&self, paths: &[PathBuf], config: &AlgorithmConfig) -> Result<ClusterReport> {
        self.run(paths, config, &NoopObserver)
    }

    /// Cluster `paths`, reporting progress and messages to `observer`.
    ///
    /// Unreadable images are reported as warnings and left out of the report. The run
    /// fails if the configuration is invalid, no image could be read, reduction or
    /// clustering fails, or the run is cancelled.
    pub fn run(
        &self,
        paths: &[PathBuf],
        config: &AlgorithmConfig,
        observer: &dyn Observer,
    ) -> Result<ClusterReport> {
        config.validate()?;
        self.cancel.check()?;
        let tracker = ProgressTracker::new(observer);

        let collector = FeatureCollector::new(&self.extractor, self.threads)?;
        info!(images = paths.len(), threads = collector.threads(), "extracting features");
        let features =
            collector.collect_tracked(paths, observer, &self.cancel, &tracker, EXTRACTION_END)?;
        tracker.set(EXTRACTION_END);
        let skipped = paths.len() - features.len();
        let text = if skipped == 0 {
            format!("extracted features from {} images", features.len())
        } else {
            format!(
                "extracted features from {} images, skipped {skipped}",
                features.len()
            )
        };
        debug!(extracted = features.len(), skipped, "features ready");
        observer.message(Severity::Info, &text);

        self.cancel.check()?;
        let reducer = match self.seed {
            Some(seed) => {
                let tsne = self.reducer.tsne().clone().with_seed(seed);
                self.reducer.clone().with_tsne(tsne)
            }
            None => self.reducer.clone(),
        };
        let coordinates = reducer.reduce(&features.matrix)?;
        tracker.set(REDUCTION_END);

        self.cancel.check()?;
        let assignment = cluster::cluster(&coordinates, config, self.seed)?;
        tracker.set(100);

        let mut text = format!("{config}: {} clusters", assignment.n_clusters());
        if assignment.noise_count() > 0 {
            text.push_str(&format!(", {} noise images", assignment.noise_count()));
        }
        debug!(
            clusters = assignment.n_clusters(),
            noise = assignment.noise_count(),
            "run finished"
        );
        observer.message(Severity::Info, &text);

        Ok(ClusterReport {
            paths: features.paths,
            coordinates,
            assignment,
        })
    }
}
