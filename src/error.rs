use thiserror::Error;

/// Errors returned by the clustering pipeline and its components.
#[derive(Debug, Error)]
pub enum Error {
    /// Input slice is empty.
    #[error("empty input")]
    EmptyInput,

    /// Invalid parameter value.
    #[error("invalid parameter {name}: {message}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Human-readable explanation.
        message: &'static str,
    },

    /// Requested cluster count is incompatible with the dataset.
    #[error("invalid cluster count: requested {requested}, but dataset has {n_items} items")]
    InvalidClusterCount {
        /// Requested number of clusters.
        requested: usize,
        /// Number of items in the dataset.
        n_items: usize,
    },

    /// Points in a dataset have inconsistent dimensionality.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Expected dimensionality.
        expected: usize,
        /// Found dimensionality.
        found: usize,
    },

    /// A single image could not be opened, decoded or embedded.
    ///
    /// The collector recovers from this error: the image is reported and left out of the batch.
    #[error("error reading image '{name}': {source}")]
    ImageRead {
        /// Base file name of the image.
        name: String,
        /// Decoder or model error.
        #[source]
        source: BoxError,
    },

    /// The embedding model could not be downloaded or initialised.
    #[error("failed to load embedding model {model}: {source}")]
    ModelLoad {
        /// Model name.
        model: &'static str,
        /// Runtime error.
        #[source]
        source: BoxError,
    },

    /// Every image in the batch failed feature extraction.
    #[error("no valid features extracted from images")]
    NoValidFeatures,

    /// Algorithm selector names no known clustering algorithm.
    #[error("unsupported clustering algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The run was cancelled through its [`CancelToken`](crate::pipeline::CancelToken).
    #[error("cancelled")]
    Cancelled,

    /// The extraction worker pool could not be started.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Settings file could not be parsed.
    #[error("invalid settings: {0}")]
    Config(#[from] toml::de::Error),

    /// Filesystem error while loading settings or placing files.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error only affects a single image and leaves the batch intact.
    pub fn is_per_image(&self) -> bool {
        matches!(self, Error::ImageRead { .. })
    }
}

/// Boxed error from a decoder, model runtime or third-party extractor.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;
