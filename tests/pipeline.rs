//! End-to-end runs on generated image folders.

use image::{Rgb, RgbImage};
use imgclump::{
    dispose, AlgorithmConfig, CancelToken, ConvEmbedder, Disposition, Error, Event, Observer,
    Pipeline, PretrainedModel, Settings, Severity,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

const RED: [u8; 3] = [210, 30, 30];
const GREEN: [u8; 3] = [30, 190, 40];
const BLUE: [u8; 3] = [25, 40, 200];

fn write_image(dir: &Path, name: &str, color: [u8; 3], shade: u8) -> PathBuf {
    let [r, g, b] = color;
    let mut img = RgbImage::from_pixel(32, 32, Rgb([r.saturating_add(shade), g, b]));
    // A small dark square so the images are not perfectly flat.
    for y in 4..8 {
        for x in 4..8 {
            img.put_pixel(x, y, Rgb([0, 0, 0]));
        }
    }
    let path = dir.join(name);
    img.save(&path).unwrap();
    path
}

/// Three colour groups of three images each, interleaved.
fn three_groups(dir: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for i in 0..3u8 {
        paths.push(write_image(dir, &format!("red{i}.png"), RED, i * 4));
        paths.push(write_image(dir, &format!("green{i}.png"), GREEN, i * 4));
        paths.push(write_image(dir, &format!("blue{i}.png"), BLUE, i * 4));
    }
    paths
}

/// Pipeline on the filter-bank embedder, which needs no model download.
fn offline() -> Pipeline<ConvEmbedder> {
    Pipeline::new(ConvEmbedder::default())
}

fn group_of(path: &Path) -> String {
    let name = path.file_stem().unwrap().to_string_lossy();
    name.trim_end_matches(char::is_numeric).to_string()
}

#[test]
fn groups_images_by_colour() {
    let dir = tempfile::tempdir().unwrap();
    let paths = three_groups(dir.path());

    let pipeline = offline().with_threads(2).with_seed(11);
    let report = pipeline
        .run_headless(&paths, &AlgorithmConfig::kmeans(3).unwrap())
        .unwrap();

    assert_eq!(report.len(), 9);
    assert_eq!(report.paths, paths);
    assert_eq!(report.assignment.n_clusters(), 3);
    for (a, la) in report.iter() {
        for (b, lb) in report.iter() {
            assert_eq!(group_of(a) == group_of(b), la == lb, "{a:?} vs {b:?}");
        }
    }
}

#[test]
fn seeded_runs_repeat() {
    let dir = tempfile::tempdir().unwrap();
    let paths = three_groups(dir.path());
    let config = AlgorithmConfig::kmeans(3).unwrap();

    let a = offline().with_seed(5).run_headless(&paths, &config).unwrap();
    let b = offline().with_seed(5).run_headless(&paths, &config).unwrap();
    assert_eq!(a.assignment, b.assignment);
    assert_eq!(a.coordinates, b.coordinates);
}

#[test]
fn unreadable_image_is_skipped_with_one_warning() {
    let dir = tempfile::tempdir().unwrap();
    let mut paths = vec![
        write_image(dir.path(), "red0.png", RED, 0),
        write_image(dir.path(), "red1.png", RED, 6),
        write_image(dir.path(), "blue0.png", BLUE, 0),
    ];
    let broken = dir.path().join("broken.png");
    fs::write(&broken, b"definitely not a png").unwrap();
    paths.insert(1, broken.clone());
    paths.push(write_image(dir.path(), "blue1.png", BLUE, 6));

    let (tx, rx) = mpsc::channel();
    let report = offline()
        .with_seed(1)
        .run(&paths, &AlgorithmConfig::kmeans(2).unwrap(), &tx)
        .unwrap();
    drop(tx);

    assert_eq!(report.len(), 4);
    assert_eq!(report.assignment.len(), 4);
    assert!(!report.paths.contains(&broken));

    let events: Vec<Event> = rx.iter().collect();
    let warnings: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            Event::Message(Severity::Warning, text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].starts_with("error reading image 'broken.png'"));

    let progress: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            Event::Progress(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(progress.last(), Some(&100));
}

#[test]
fn all_unreadable_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let paths: Vec<PathBuf> = (0..3)
        .map(|i| {
            let p = dir.path().join(format!("junk{i}.jpg"));
            fs::write(&p, b"junk").unwrap();
            p
        })
        .collect();
    let err = offline()
        .run_headless(&paths, &AlgorithmConfig::kmeans(1).unwrap())
        .unwrap_err();
    assert!(matches!(err, Error::NoValidFeatures));
}

struct CancelOnProgress(CancelToken);

impl Observer for CancelOnProgress {
    fn progress(&self, _percent: u8) {
        self.0.cancel();
    }
}

#[test]
fn cancellation_from_observer() {
    let dir = tempfile::tempdir().unwrap();
    let paths = three_groups(dir.path());
    let pipeline = offline().with_threads(1);
    let observer = CancelOnProgress(pipeline.cancel_token());

    let err = pipeline
        .run(&paths, &AlgorithmConfig::kmeans(3).unwrap(), &observer)
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[test]
fn settings_drive_the_run_and_sorting() {
    let dir = tempfile::tempdir().unwrap();
    let paths = three_groups(dir.path());
    let dest = tempfile::tempdir().unwrap();

    let settings = Settings::from_toml_str(
        r#"
        embedder = "filters"
        algorithm = "agglomerative"
        n_clusters = 3
        affinity = "euclidean"
        linkage = "average"
        resample_size = 32
        threads = 2
        "#,
    )
    .unwrap();
    let (pipeline, algorithm) = Pipeline::from_settings(&settings).unwrap();
    let report = pipeline
        .run_headless(&paths, &algorithm)
        .unwrap();
    let summary = dispose(&report, dest.path(), Disposition::Copy, &imgclump::NoopObserver).unwrap();

    assert_eq!(summary.placed, 9);
    assert_eq!(summary.noise_skipped, 0);
    assert_eq!(summary.folders.len(), 3);
    for folder in &summary.folders {
        let names: Vec<PathBuf> = fs::read_dir(folder)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(names.len(), 3);
        let group = group_of(&names[0]);
        assert!(names.iter().all(|n| group_of(n) == group));
    }
    // Copies leave the originals alone.
    assert!(paths.iter().all(|p| p.is_file()));
}

/// Downloads the ResNet-50 weights; run with `--ignored` when online.
#[test]
#[ignore]
fn pretrained_model_groups_images() {
    let dir = tempfile::tempdir().unwrap();
    let paths = three_groups(dir.path());
    let broken = dir.path().join("broken.jpg");
    fs::write(&broken, b"not a jpeg").unwrap();
    let mut with_broken = paths.clone();
    with_broken.push(broken);

    let report = Pipeline::pretrained(PretrainedModel::Resnet50)
        .unwrap()
        .with_seed(3)
        .run_headless(&with_broken, &AlgorithmConfig::kmeans(3).unwrap())
        .unwrap();
    assert_eq!(report.paths, paths);
    assert_eq!(report.assignment.n_clusters(), 3);
}
