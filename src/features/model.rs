//! Pretrained image embeddings.
//!
//! [`ModelEmbedder`] runs a pretrained network with its classification head removed
//! through ONNX Runtime (via `fastembed`). Weights are downloaded on first use and
//! cached; later runs load them from the cache directory.
//!
//! The ONNX session is loaded once and shared by every extraction worker. Inference
//! is serialized behind a lock; the runtime parallelizes each forward pass itself.

use super::extractor::{file_name, ConvEmbedder, FeatureExtractor};
use crate::error::{BoxError, Error, Result};
use fastembed::{ImageEmbedding, ImageEmbeddingModel, ImageInitOptions};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use tracing::info;

/// Pretrained networks available to [`ModelEmbedder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PretrainedModel {
    /// ResNet-50 trained on ImageNet; 2048 pooled features.
    #[default]
    Resnet50,
    /// Image tower of CLIP ViT-B/32; 512 features.
    ClipVitB32,
}

impl PretrainedModel {
    /// Name as accepted in settings files.
    pub fn as_str(self) -> &'static str {
        match self {
            PretrainedModel::Resnet50 => "resnet50",
            PretrainedModel::ClipVitB32 => "clip-vit-b32",
        }
    }

    /// Embedding length.
    pub fn dim(self) -> usize {
        match self {
            PretrainedModel::Resnet50 => 2048,
            PretrainedModel::ClipVitB32 => 512,
        }
    }

    fn runtime_model(self) -> ImageEmbeddingModel {
        match self {
            PretrainedModel::Resnet50 => ImageEmbeddingModel::Resnet50,
            PretrainedModel::ClipVitB32 => ImageEmbeddingModel::ClipVitB32,
        }
    }
}

impl fmt::Display for PretrainedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Embeds images with a pretrained network.
pub struct ModelEmbedder {
    model: PretrainedModel,
    session: Mutex<ImageEmbedding>,
}

impl ModelEmbedder {
    /// Load `model`, downloading it into the default cache on first use.
    pub fn new(model: PretrainedModel) -> Result<Self> {
        Self::load(model, None)
    }

    /// Load `model`, caching weights under `cache_dir` when given.
    pub fn load(model: PretrainedModel, cache_dir: Option<&Path>) -> Result<Self> {
        let mut options =
            ImageInitOptions::new(model.runtime_model()).with_show_download_progress(true);
        if let Some(dir) = cache_dir {
            options = options.with_cache_dir(dir.to_path_buf());
        }
        info!(%model, "loading embedding model");
        let session = ImageEmbedding::try_new(options).map_err(|err| Error::ModelLoad {
            model: model.as_str(),
            source: boxed(err),
        })?;
        Ok(Self {
            model,
            session: Mutex::new(session),
        })
    }

    /// The loaded network.
    pub fn model(&self) -> PretrainedModel {
        self.model
    }
}

impl fmt::Debug for ModelEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelEmbedder")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl FeatureExtractor for ModelEmbedder {
    fn extract(&self, path: &Path) -> Result<Vec<f32>> {
        // The session holds no per-image state, so a poisoned lock is still usable.
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let embeddings = session
            .embed(vec![path], None)
            .map_err(|err| read_error(path, boxed(err)))?;
        drop(session);
        single_embedding(path, embeddings, self.dim())
    }

    fn dim(&self) -> usize {
        self.model.dim()
    }
}

/// The one vector of a single-image batch, checked against the model's length.
fn single_embedding(path: &Path, embeddings: Vec<Vec<f32>>, dim: usize) -> Result<Vec<f32>> {
    let count = embeddings.len();
    match embeddings.into_iter().next() {
        Some(vector) if count == 1 && vector.len() == dim => Ok(vector),
        Some(vector) if count == 1 => Err(read_error(
            path,
            format!("model returned {} values, expected {dim}", vector.len()).into(),
        )),
        _ => Err(read_error(
            path,
            format!("model returned {count} embeddings for one image").into(),
        )),
    }
}

fn read_error(path: &Path, source: BoxError) -> Error {
    Error::ImageRead {
        name: file_name(path),
        source,
    }
}

fn boxed(err: impl fmt::Display) -> BoxError {
    format!("{err:#}").into()
}

/// Which extractor a run uses, as named in settings files and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Embedder {
    /// [`PretrainedModel::Resnet50`].
    #[default]
    Resnet50,
    /// [`PretrainedModel::ClipVitB32`].
    ClipVitB32,
    /// The offline [`ConvEmbedder`] filter bank.
    Filters,
}

impl Embedder {
    /// All embedders, in display order.
    pub const ALL: [Embedder; 3] = [Embedder::Resnet50, Embedder::ClipVitB32, Embedder::Filters];

    /// Name as accepted by [`FromStr`] and settings files.
    pub fn as_str(self) -> &'static str {
        match self {
            Embedder::Resnet50 => "resnet50",
            Embedder::ClipVitB32 => "clip-vit-b32",
            Embedder::Filters => "filters",
        }
    }

    /// The pretrained network behind this embedder, if any.
    pub fn pretrained(self) -> Option<PretrainedModel> {
        match self {
            Embedder::Resnet50 => Some(PretrainedModel::Resnet50),
            Embedder::ClipVitB32 => Some(PretrainedModel::ClipVitB32),
            Embedder::Filters => None,
        }
    }

    /// Construct the extractor. `resample_size` only affects [`Embedder::Filters`];
    /// pretrained models resize to their own input resolution.
    pub fn build(
        self,
        resample_size: u32,
        cache_dir: Option<&Path>,
    ) -> Result<Box<dyn FeatureExtractor>> {
        Ok(match self.pretrained() {
            Some(model) => Box::new(ModelEmbedder::load(model, cache_dir)?),
            None => Box::new(ConvEmbedder::new(resample_size)?),
        })
    }
}

impl fmt::Display for Embedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Embedder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Embedder::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or(Error::InvalidParameter {
                name: "embedder",
                message: "expected one of resnet50, clip-vit-b32, filters",
            })
    }
}
