//! `imgclump` command-line entry point.
//!
//! Clusters the images at the top level of a folder and copies (or moves) them into
//! numbered cluster folders.

use anyhow::{bail, Context, Result};
use clap::Parser;
use imgclump::sort::{self, Disposition};
use imgclump::{Affinity, Embedder, Linkage, LogObserver, Pipeline, Settings};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "bmp", "gif", "tif", "tiff", "webp"];

/// Group the images of a folder by visual similarity.
#[derive(Debug, Parser)]
#[command(name = "imgclump", version, about)]
struct Cli {
    /// Folder containing the images.
    folder: PathBuf,

    /// Settings file (TOML). Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where cluster folders are created. Defaults to the image folder.
    #[arg(long)]
    dest: Option<PathBuf>,

    /// Clustering algorithm: kmeans, dbscan or agglomerative.
    #[arg(long)]
    algorithm: Option<String>,

    /// Number of clusters (kmeans, agglomerative).
    #[arg(short = 'k', long = "clusters")]
    n_clusters: Option<usize>,

    /// Feature extractor: resnet50, clip-vit-b32 or filters (no model download).
    #[arg(long)]
    embedder: Option<String>,

    /// Directory for downloaded model weights.
    #[arg(long)]
    model_cache: Option<PathBuf>,

    /// Side length images are resized to by the filters embedder.
    #[arg(long)]
    resample_size: Option<u32>,

    /// DBSCAN neighborhood radius.
    #[arg(long)]
    eps: Option<f32>,

    /// DBSCAN minimum neighborhood size.
    #[arg(long)]
    min_samples: Option<usize>,

    /// Agglomerative affinity: euclidean, l1, l2, manhattan or cosine.
    #[arg(long)]
    affinity: Option<String>,

    /// Agglomerative linkage: ward, complete, average or single.
    #[arg(long)]
    linkage: Option<String>,

    /// Seed for repeatable runs.
    #[arg(long)]
    seed: Option<u64>,

    /// Extraction worker threads. Defaults to one per CPU.
    #[arg(long)]
    threads: Option<usize>,

    /// Move images instead of copying them.
    #[arg(long = "move")]
    move_files: bool,

    /// Print the planned placement without touching any file.
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path)
                .with_context(|| format!("failed to load settings from {}", path.display()))?,
            None => Settings::default(),
        };
        if let Some(algorithm) = &self.algorithm {
            settings.algorithm = algorithm.clone();
        }
        if let Some(k) = self.n_clusters {
            settings.n_clusters = k;
        }
        if let Some(embedder) = &self.embedder {
            settings.embedder = embedder.parse::<Embedder>()?;
        }
        if self.model_cache.is_some() {
            settings.model_cache.clone_from(&self.model_cache);
        }
        if let Some(size) = self.resample_size {
            settings.resample_size = size;
        }
        if let Some(eps) = self.eps {
            settings.eps = eps;
        }
        if let Some(min_samples) = self.min_samples {
            settings.min_samples = min_samples;
        }
        if let Some(affinity) = &self.affinity {
            settings.affinity = affinity.parse::<Affinity>()?;
        }
        if let Some(linkage) = &self.linkage {
            settings.linkage = linkage.parse::<Linkage>()?;
        }
        if self.seed.is_some() {
            settings.seed = self.seed;
        }
        if self.threads.is_some() {
            settings.threads = self.threads;
        }
        settings.validate()?;
        Ok(settings)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = cli.settings()?;

    let paths = list_images(&cli.folder)?;
    if paths.is_empty() {
        bail!("no images found in {}", cli.folder.display());
    }
    let (pipeline, algorithm) = Pipeline::from_settings(&settings)
        .with_context(|| format!("failed to set up the {} embedder", settings.embedder))?;
    tracing::info!(images = paths.len(), %algorithm, "clustering {}", cli.folder.display());

    let observer = LogObserver::new();
    let report = pipeline
        .run(&paths, &algorithm, &observer)
        .context("clustering failed")?;

    let dest = cli.dest.as_deref().unwrap_or(&cli.folder);
    if cli.dry_run {
        for placement in sort::plan(&report, dest) {
            println!(
                "{} -> {}",
                placement.source.display(),
                placement.target.display()
            );
        }
        let noise = report.assignment.noise_count();
        if noise > 0 {
            println!("{noise} noise images left in place");
        }
        return Ok(());
    }

    let disposition = if cli.move_files {
        Disposition::Move
    } else {
        Disposition::Copy
    };
    let summary = sort::dispose(&report, dest, disposition, &observer)
        .with_context(|| format!("failed to sort images into {}", dest.display()))?;
    println!(
        "{} images in {} clusters, {} noise",
        summary.placed,
        summary.folders.len(),
        summary.noise_skipped
    );
    Ok(())
}

/// Image files directly inside `folder`, sorted by name.
fn list_images(folder: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(folder).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("failed to list {}", folder.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_image = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)));
        if is_image {
            paths.push(entry.into_path());
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_only_top_level_images() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.PNG", "a.jpg", "notes.txt", "c.webp"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/d.png"), b"x").unwrap();

        let names: Vec<String> = list_images(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.PNG", "c.webp"]);
    }

    #[test]
    fn flags_override_settings() {
        let cli = Cli::parse_from([
            "imgclump",
            "photos",
            "--algorithm",
            "agglomerative",
            "-k",
            "6",
            "--affinity",
            "cosine",
            "--linkage",
            "average",
            "--embedder",
            "filters",
            "--model-cache",
            "/var/cache/models",
        ]);
        let settings = cli.settings().unwrap();
        assert_eq!(settings.embedder, Embedder::Filters);
        assert_eq!(settings.model_cache, Some(PathBuf::from("/var/cache/models")));
        assert_eq!(settings.n_clusters, 6);
        assert_eq!(settings.affinity, Affinity::Cosine);
        assert_eq!(settings.linkage, Linkage::Average);
    }

    #[test]
    fn rejects_unknown_embedder() {
        let cli = Cli::parse_from(["imgclump", "photos", "--embedder", "vgg16"]);
        assert!(cli.settings().is_err());
        let cli = Cli::parse_from(["imgclump", "photos"]);
        assert_eq!(cli.settings().unwrap().embedder, Embedder::Resnet50);
    }
}
