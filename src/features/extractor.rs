//! Per-image embedding.

use crate::error::{Error, Result};
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use std::path::Path;

/// Turns one image file into a fixed-length feature vector.
///
/// One instance is shared by all extraction workers, so implementations must not keep
/// per-image state.
pub trait FeatureExtractor: Send + Sync {
    /// Embed the image at `path`.
    ///
    /// Returns [`Error::ImageRead`] if the file cannot be opened or decoded.
    fn extract(&self, path: &Path) -> Result<Vec<f32>>;

    /// Length of every vector returned by [`extract`](Self::extract).
    fn dim(&self) -> usize;
}

impl<T: FeatureExtractor + ?Sized> FeatureExtractor for &T {
    fn extract(&self, path: &Path) -> Result<Vec<f32>> {
        (**self).extract(path)
    }

    fn dim(&self) -> usize {
        (**self).dim()
    }
}

impl<T: FeatureExtractor + ?Sized> FeatureExtractor for Box<T> {
    fn extract(&self, path: &Path) -> Result<Vec<f32>> {
        (**self).extract(path)
    }

    fn dim(&self) -> usize {
        (**self).dim()
    }
}

/// Side of the pooled response grid.
pub const POOL_GRID: usize = 7;
/// Smallest accepted input side; every pooling cell must cover at least one pixel.
pub const MIN_RESAMPLE_SIZE: u32 = 8;

const CHANNELS: usize = 3;
const MEAN: [f32; CHANNELS] = [0.485, 0.456, 0.406];
const STD: [f32; CHANNELS] = [0.229, 0.224, 0.225];

/// A 3x3 kernel, row-major.
type Kernel = [f32; 9];

/// Fixed convolutional embedder, for offline use and tests.
///
/// Similarity under this embedder follows colour and coarse edge structure; it has no
/// learned weights. [`ModelEmbedder`](super::ModelEmbedder) is the content-aware default.
///
/// Each image is resized to `resample_size x resample_size`, normalized per channel with
/// the ImageNet mean and standard deviation, and filtered with a small fixed bank:
///
/// | filter      | kernel                    | response       |
/// |-------------|---------------------------|----------------|
/// | smoothing   | 3x3 box                   | signed         |
/// | gradient x  | Sobel, horizontal         | magnitude      |
/// | gradient y  | Sobel, vertical           | magnitude      |
/// | laplacian   | 4-neighbour Laplacian     | magnitude      |
///
/// Every response map is average-pooled to a 7x7 grid, so the vector length is
/// `3 * 4 * 49 = 588` whatever the input resolution.
#[derive(Debug, Clone)]
pub struct ConvEmbedder {
    resample_size: u32,
    bank: Vec<(Kernel, bool)>,
}

impl ConvEmbedder {
    /// Create an embedder that resizes inputs to `resample_size` pixels square.
    pub fn new(resample_size: u32) -> Result<Self> {
        if resample_size < MIN_RESAMPLE_SIZE {
            return Err(Error::InvalidParameter {
                name: "resample_size",
                message: "must be at least 8",
            });
        }
        Ok(Self {
            resample_size,
            bank: filter_bank(),
        })
    }

    /// Input side length.
    pub fn resample_size(&self) -> u32 {
        self.resample_size
    }

    /// Embed an already decoded image.
    pub fn embed(&self, img: &DynamicImage) -> Vec<f32> {
        let side = self.resample_size;
        let rgb = img.resize_exact(side, side, FilterType::Triangle).to_rgb8();
        let mut out = Vec::with_capacity(self.dim());
        for c in 0..CHANNELS {
            let plane = normalized_plane(&rgb, c);
            for (kernel, rectify) in &self.bank {
                let response = convolve(&plane, side as usize, kernel, *rectify);
                pool(&response, side as usize, &mut out);
            }
        }
        out
    }
}

impl Default for ConvEmbedder {
    fn default() -> Self {
        Self {
            resample_size: 128,
            bank: filter_bank(),
        }
    }
}

impl FeatureExtractor for ConvEmbedder {
    fn extract(&self, path: &Path) -> Result<Vec<f32>> {
        let img = image::open(path).map_err(|source| Error::ImageRead {
            name: file_name(path),
            source: source.into(),
        })?;
        Ok(self.embed(&img))
    }

    fn dim(&self) -> usize {
        CHANNELS * self.bank.len() * POOL_GRID * POOL_GRID
    }
}

/// Base name of `path` for messages, falling back to the full path.
pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Kernels paired with whether their response is rectified.
fn filter_bank() -> Vec<(Kernel, bool)> {
    #[rustfmt::skip]
    let bank = vec![
        ([1.0 / 9.0; 9], false),
        ([-1.0, 0.0, 1.0,
          -2.0, 0.0, 2.0,
          -1.0, 0.0, 1.0], true),
        ([-1.0, -2.0, -1.0,
           0.0,  0.0,  0.0,
           1.0,  2.0,  1.0], true),
        ([0.0,  1.0, 0.0,
          1.0, -4.0, 1.0,
          0.0,  1.0, 0.0], true),
    ];
    bank
}

fn normalized_plane(rgb: &RgbImage, channel: usize) -> Vec<f32> {
    rgb.pixels()
        .map(|p| (f32::from(p.0[channel]) / 255.0 - MEAN[channel]) / STD[channel])
        .collect()
}

/// Same-size 3x3 convolution with edge clamping.
fn convolve(plane: &[f32], side: usize, kernel: &Kernel, rectify: bool) -> Vec<f32> {
    let last = side - 1;
    let mut out = vec![0.0f32; side * side];
    for y in 0..side {
        for x in 0..side {
            let mut acc = 0.0f32;
            for ky in 0..3 {
                let sy = (y + ky).saturating_sub(1).min(last);
                for kx in 0..3 {
                    let sx = (x + kx).saturating_sub(1).min(last);
                    acc += kernel[ky * 3 + kx] * plane[sy * side + sx];
                }
            }
            out[y * side + x] = if rectify { acc.abs() } else { acc };
        }
    }
    out
}

/// Adaptive average pooling to a `POOL_GRID x POOL_GRID` grid, appended to `out`.
fn pool(map: &[f32], side: usize, out: &mut Vec<f32>) {
    let bounds = |i: usize| (i * side / POOL_GRID, ((i + 1) * side).div_ceil(POOL_GRID));
    for gy in 0..POOL_GRID {
        let (y0, y1) = bounds(gy);
        for gx in 0..POOL_GRID {
            let (x0, x1) = bounds(gx);
            let mut sum = 0.0f32;
            for y in y0..y1 {
                sum += map[y * side + x0..y * side + x1].iter().sum::<f32>();
            }
            out.push(sum / ((y1 - y0) * (x1 - x0)) as f32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(w: u32, h: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb(color)))
    }

    #[test]
    fn vector_length_is_independent_of_size() {
        for side in [8, 32, 128, 200] {
            let e = ConvEmbedder::new(side).unwrap();
            assert_eq!(e.dim(), 588);
            assert_eq!(e.embed(&solid(50, 30, [10, 200, 30])).len(), 588);
        }
    }

    #[test]
    fn flat_image_has_no_edges() {
        let e = ConvEmbedder::new(16).unwrap();
        let v = e.embed(&solid(16, 16, [128, 128, 128]));
        let cell = POOL_GRID * POOL_GRID;
        for c in 0..CHANNELS {
            let base = c * 4 * cell;
            // Gradient and Laplacian responses vanish on a constant image.
            assert!(v[base + cell..base + 4 * cell].iter().all(|x| x.abs() < 1e-5));
            let expected = (128.0 / 255.0 - MEAN[c]) / STD[c];
            assert!(v[base..base + cell].iter().all(|x| (x - expected).abs() < 1e-4));
        }
    }

    #[test]
    fn vertical_edge_lights_horizontal_gradient() {
        let mut img = RgbImage::from_pixel(32, 32, Rgb([0, 0, 0]));
        for y in 0..32 {
            for x in 16..32 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let v = ConvEmbedder::new(32).unwrap().embed(&DynamicImage::ImageRgb8(img));
        let cell = POOL_GRID * POOL_GRID;
        let gx: f32 = v[cell..2 * cell].iter().sum();
        let gy: f32 = v[2 * cell..3 * cell].iter().sum();
        assert!(gx > 1.0);
        assert!(gy.abs() < 1e-4);
    }

    #[test]
    fn similar_images_are_closer() {
        let e = ConvEmbedder::default();
        let red = e.embed(&solid(40, 40, [220, 20, 20]));
        let red2 = e.embed(&solid(60, 20, [200, 30, 25]));
        let blue = e.embed(&solid(40, 40, [20, 20, 220]));
        let d = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum() };
        assert!(d(&red, &red2) < d(&red, &blue));
    }

    #[test]
    fn missing_file_reports_base_name() {
        let e = ConvEmbedder::default();
        let err = e.extract(Path::new("/no/such/dir/holiday.jpg")).unwrap_err();
        assert!(err.is_per_image());
        assert!(err.to_string().starts_with("error reading image 'holiday.jpg'"));
    }

    #[test]
    fn rejects_tiny_resample_size() {
        assert!(matches!(
            ConvEmbedder::new(4),
            Err(Error::InvalidParameter { name: "resample_size", .. })
        ));
    }
}
