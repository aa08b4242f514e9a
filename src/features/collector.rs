//! Parallel feature extraction over a batch of images.

use super::extractor::{file_name, FeatureExtractor};
use crate::error::{Error, Result};
use crate::observe::{Observer, ProgressTracker, Severity};
use crate::pipeline::CancelToken;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Feature vectors of the images that were read successfully.
///
/// `matrix[i]` is the embedding of `paths[i]`; failed images are absent from both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Features {
    /// Surviving image paths, in input order.
    pub paths: Vec<PathBuf>,
    /// One embedding per surviving path.
    pub matrix: Vec<Vec<f32>>,
}

impl Features {
    /// Number of surviving images.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether no image survived.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Runs a [`FeatureExtractor`] over many images on a dedicated rayon pool.
pub struct FeatureCollector<E> {
    extractor: E,
    pool: ThreadPool,
}

impl<E: FeatureExtractor> FeatureCollector<E> {
    /// Create a collector with `threads` workers, or one per logical CPU when `None`.
    pub fn new(extractor: E, threads: Option<usize>) -> Result<Self> {
        if threads == Some(0) {
            return Err(Error::InvalidParameter {
                name: "threads",
                message: "must be at least 1",
            });
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.unwrap_or(0))
            .thread_name(|i| format!("imgclump-extract-{i}"))
            .build()?;
        Ok(Self { extractor, pool })
    }

    /// The wrapped extractor.
    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Extract features for every path, reporting progress over `0..=100`.
    pub fn collect(
        &self,
        paths: &[PathBuf],
        observer: &dyn Observer,
        cancel: &CancelToken,
    ) -> Result<Features> {
        let tracker = ProgressTracker::new(observer);
        self.collect_tracked(paths, observer, cancel, &tracker, 100)
    }

    /// Extract features, mapping progress onto `0..=progress_end` of `tracker`.
    pub(crate) fn collect_tracked(
        &self,
        paths: &[PathBuf],
        observer: &dyn Observer,
        cancel: &CancelToken,
        tracker: &ProgressTracker<'_>,
        progress_end: u8,
    ) -> Result<Features> {
        let total = paths.len();
        let done = AtomicUsize::new(0);

        let results: Vec<Option<Result<Vec<f32>>>> = self.pool.install(|| {
            paths
                .par_iter()
                .map(|path| {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    let result = self.extract_isolated(path);
                    let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                    tracker.stage(0, progress_end, finished, total);
                    Some(result)
                })
                .collect()
        });

        if cancel.is_cancelled() {
            debug!(finished = done.load(Ordering::Relaxed), total, "extraction cancelled");
            return Err(Error::Cancelled);
        }

        let mut features = Features::default();
        for (path, result) in paths.iter().zip(results) {
            match result {
                Some(Ok(vector)) => {
                    features.paths.push(path.clone());
                    features.matrix.push(vector);
                }
                Some(Err(err)) => {
                    let text = if err.is_per_image() {
                        err.to_string()
                    } else {
                        format!("error reading image '{}': {err}", file_name(path))
                    };
                    debug!(path = %path.display(), error = %err, "image skipped");
                    observer.message(Severity::Warning, &text);
                }
                // Only produced after cancellation, handled above.
                None => return Err(Error::Cancelled),
            }
        }

        if features.is_empty() {
            return Err(Error::NoValidFeatures);
        }
        debug!(
            extracted = features.len(),
            failed = total - features.len(),
            dim = self.extractor.dim(),
            "feature extraction finished"
        );
        Ok(features)
    }

    /// Run the extractor on one image, turning a panic into a per-image error.
    fn extract_isolated(&self, path: &Path) -> Result<Vec<f32>> {
        panic::catch_unwind(AssertUnwindSafe(|| self.extractor.extract(path))).unwrap_or_else(
            |payload| {
                Err(Error::ImageRead {
                    name: file_name(path),
                    source: format!("extractor panicked: {}", panic_message(&*payload)).into(),
                })
            },
        )
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::{Event, NoopObserver};
    use std::sync::mpsc;

    /// Embeds the digits of the file stem; fails on names starting with "bad".
    struct StemExtractor;

    impl FeatureExtractor for StemExtractor {
        fn extract(&self, path: &Path) -> Result<Vec<f32>> {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if stem.starts_with("bad") {
                return Err(Error::InvalidParameter {
                    name: "image",
                    message: "undecodable",
                });
            }
            let n: f32 = stem.trim_start_matches("img").parse().unwrap_or(0.0);
            Ok(vec![n, 2.0 * n])
        }

        fn dim(&self) -> usize {
            2
        }
    }

    /// Panics on names starting with "bad", like a decoder bug would.
    struct PanickingExtractor;

    impl FeatureExtractor for PanickingExtractor {
        fn extract(&self, path: &Path) -> Result<Vec<f32>> {
            if file_name(path).starts_with("bad") {
                panic!("corrupt header in {}", path.display());
            }
            StemExtractor.extract(path)
        }

        fn dim(&self) -> usize {
            2
        }
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from(format!("/photos/{n}"))).collect()
    }

    #[test]
    fn preserves_input_order() {
        let collector = FeatureCollector::new(StemExtractor, Some(4)).unwrap();
        let input: Vec<String> = (0..50).map(|i| format!("img{i}.png")).collect();
        let input = paths(&input.iter().map(String::as_str).collect::<Vec<_>>());
        let out = collector.collect(&input, &NoopObserver, &CancelToken::new()).unwrap();
        assert_eq!(out.paths, input);
        for (i, row) in out.matrix.iter().enumerate() {
            assert_eq!(row, &vec![i as f32, 2.0 * i as f32]);
        }
    }

    #[test]
    fn failures_are_skipped_and_reported() {
        let collector = FeatureCollector::new(StemExtractor, Some(2)).unwrap();
        let input = paths(&["img1.png", "bad.png", "img3.png"]);
        let (tx, rx) = mpsc::channel();
        let out = collector.collect(&input, &tx, &CancelToken::new()).unwrap();
        drop(tx);

        assert_eq!(out.paths, paths(&["img1.png", "img3.png"]));
        assert_eq!(out.matrix.len(), 2);

        let events: Vec<Event> = rx.iter().collect();
        let warnings: Vec<&String> = events
            .iter()
            .filter_map(|e| match e {
                Event::Message(Severity::Warning, text) => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("'bad.png'"));
        assert_eq!(events.iter().filter(|e| **e == Event::Progress(100)).count(), 1);
    }

    #[test]
    fn panicking_image_is_isolated() {
        let collector = FeatureCollector::new(PanickingExtractor, Some(2)).unwrap();
        let input = paths(&["img1.png", "img2.png", "bad.png", "img4.png"]);
        let (tx, rx) = mpsc::channel();
        let out = collector.collect(&input, &tx, &CancelToken::new()).unwrap();
        drop(tx);

        assert_eq!(out.paths, paths(&["img1.png", "img2.png", "img4.png"]));
        let warnings: Vec<String> = rx
            .iter()
            .filter_map(|e| match e {
                Event::Message(Severity::Warning, text) => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(
            warnings,
            vec!["error reading image 'bad.png': extractor panicked: corrupt header in /photos/bad.png"]
        );
    }

    #[test]
    fn all_failed_is_an_error() {
        let collector = FeatureCollector::new(StemExtractor, Some(1)).unwrap();
        let input = paths(&["bad1.png", "bad2.png"]);
        let err = collector.collect(&input, &NoopObserver, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, Error::NoValidFeatures));
    }

    #[test]
    fn empty_batch_has_no_features() {
        let collector = FeatureCollector::new(StemExtractor, Some(1)).unwrap();
        let err = collector.collect(&[], &NoopObserver, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, Error::NoValidFeatures));
    }

    #[test]
    fn cancelled_before_start() {
        let collector = FeatureCollector::new(StemExtractor, Some(2)).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = collector
            .collect(&paths(&["img1.png"]), &NoopObserver, &cancel)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn zero_threads_rejected() {
        assert!(FeatureCollector::new(StemExtractor, Some(0)).is_err());
        let c = FeatureCollector::new(StemExtractor, Some(3)).unwrap();
        assert_eq!(c.threads(), 3);
    }
}
