//! Placing clustered images into one folder per cluster.
//!
//! Folders are named by the 1-based cluster number, zero-padded to the width of the
//! cluster count (`1..9`, `01..12`, `001..150`). Noise images stay where they are.

use crate::error::Result;
use crate::features::file_name;
use crate::observe::{Observer, Severity};
use crate::pipeline::ClusterReport;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// How images are placed into their cluster folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    /// Copy, leaving the original in place.
    #[default]
    Copy,
    /// Move the original.
    Move,
}

/// One planned file operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Image to place.
    pub source: PathBuf,
    /// Target path inside the cluster folder.
    pub target: PathBuf,
    /// 0-based cluster label.
    pub cluster: usize,
}

/// What [`dispose`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisposeSummary {
    /// Cluster folders, in cluster order.
    pub folders: Vec<PathBuf>,
    /// Number of images copied or moved.
    pub placed: usize,
    /// Number of noise images left untouched.
    pub noise_skipped: usize,
}

/// Folder name of the 0-based `label` among `n_clusters` clusters.
pub fn folder_name(label: usize, n_clusters: usize) -> String {
    let width = n_clusters.max(1).to_string().len();
    format!("{:0width$}", label + 1)
}

/// Where each non-noise image of `report` would go under `dest`.
pub fn plan(report: &ClusterReport, dest: &Path) -> Vec<Placement> {
    let n_clusters = report.assignment.n_clusters();
    report
        .iter()
        .filter_map(|(path, label)| {
            label.map(|cluster| placement(path, cluster, n_clusters, dest))
        })
        .collect()
}

fn placement(path: &Path, cluster: usize, n_clusters: usize, dest: &Path) -> Placement {
    let target = dest
        .join(folder_name(cluster, n_clusters))
        .join(path.file_name().unwrap_or(path.as_os_str()));
    Placement {
        source: path.to_path_buf(),
        target,
        cluster,
    }
}

/// Copy or move every clustered image of `report` into its folder under `dest`.
///
/// Existing folders are reused with a warning. Progress is reported per image over the
/// whole report, noise included. The first filesystem error aborts the operation.
pub fn dispose(
    report: &ClusterReport,
    dest: &Path,
    disposition: Disposition,
    observer: &dyn Observer,
) -> Result<DisposeSummary> {
    let n_clusters = report.assignment.n_clusters();
    let mut summary = DisposeSummary::default();

    for label in 0..n_clusters {
        let folder = dest.join(folder_name(label, n_clusters));
        if folder.is_dir() {
            let text = format!("folder '{}' already exists", folder.display());
            debug!(folder = %folder.display(), "reusing existing folder");
            observer.message(Severity::Warning, &text);
        } else {
            fs::create_dir_all(&folder)?;
        }
        summary.folders.push(folder);
    }

    let total = report.len();
    for (i, (path, label)) in report.iter().enumerate() {
        match label {
            Some(cluster) => {
                place(&placement(path, cluster, n_clusters, dest), disposition)?;
                summary.placed += 1;
            }
            None => {
                summary.noise_skipped += 1;
                debug!(image = %file_name(path), "noise image left in place");
            }
        }
        observer.progress(((i + 1) * 100 / total) as u8);
    }

    if summary.noise_skipped > 0 {
        let text = format!("{} noise images left in place", summary.noise_skipped);
        observer.message(Severity::Info, &text);
    }
    info!(
        folders = summary.folders.len(),
        placed = summary.placed,
        noise = summary.noise_skipped,
        "images sorted"
    );
    Ok(summary)
}

fn place(placement: &Placement, disposition: Disposition) -> Result<()> {
    match disposition {
        Disposition::Copy => {
            fs::copy(&placement.source, &placement.target)?;
        }
        Disposition::Move => {
            // rename fails across filesystems; fall back to copy and delete.
            if fs::rename(&placement.source, &placement.target).is_err() {
                fs::copy(&placement.source, &placement.target)?;
                fs::remove_file(&placement.source)?;
            }
        }
    }
    Ok(())
}
