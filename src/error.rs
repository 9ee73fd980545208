//! Error types shared across the pipeline.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Data path does not exist: {0}")]
    DataRootMissing(PathBuf),
    #[error("No valid rows survived verification and caching for split '{0}', check the manifest")]
    NoValidRows(String),
    #[error("Unknown species label '{0}' (not present in the training split)")]
    UnknownLabel(String),
    #[error("Failed to retrieve clip for '{file}' (row {index}): {source}")]
    ClipRetrieval {
        file: String,
        index: usize,
        #[source]
        source: Box<Error>,
    },
    #[error("Gave up after {attempts} consecutive non-finite items (last row {last_index})")]
    RetriesExhausted { attempts: usize, last_index: usize },
    #[error("Index {index} out of range for dataset of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Missing column: {0}")]
    MissingColumn(String),
    #[error("Invalid value '{value}' in column {column}")]
    InvalidValue { column: String, value: String },
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Tensor store error: {0}")]
    Store(#[from] safetensors::SafeTensorError),
    #[error("Cached tensor {0} is malformed")]
    MalformedTensor(PathBuf),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Symphonia error: {0}")]
    Symphonia(#[from] symphonia::core::errors::Error),
    #[error("Resampler construction failed: {0}")]
    ResamplerConstruction(#[from] rubato::ResamplerConstructionError),
    #[error("Resampling failed: {0}")]
    Resample(#[from] rubato::ResampleError),
    #[error("No audio track found")]
    NoAudioTrack,
    #[error("Unsupported codec")]
    UnsupportedCodec,
}

impl Error {
    /// Wrap a lower-level failure as a clip retrieval error for `file` at row `index`.
    pub fn clip(file: impl Into<String>, index: usize, source: Error) -> Self {
        Error::ClipRetrieval {
            file: file.into(),
            index,
            source: Box::new(source),
        }
    }
}
