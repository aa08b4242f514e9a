//! Image feature extraction.
//!
//! A [`FeatureExtractor`] maps one image to a fixed-length vector; the
//! [`FeatureCollector`] runs it over a batch in parallel, dropping unreadable images and
//! keeping the survivors in input order.
//!
//! The default extractor is [`ModelEmbedder`], a pretrained network. [`ConvEmbedder`]
//! is a fixed filter bank that needs no model download. [`Embedder`] names either one
//! in settings files.

mod collector;
mod extractor;
mod model;

pub use collector::{FeatureCollector, Features};
pub use extractor::{ConvEmbedder, FeatureExtractor, MIN_RESAMPLE_SIZE, POOL_GRID};
pub(crate) use extractor::file_name;
pub use model::{Embedder, ModelEmbedder, PretrainedModel};
