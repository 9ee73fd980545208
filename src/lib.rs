//! Clip preparation for bird call classification.
//!
//! Turns a labeled manifest of field recordings into `(image, label)` pairs:
//! - File verification against the data directory
//! - One-time conversion to canonical mono tensors (symphonia + rubato)
//! - Fixed-length clip extraction with a per-clip cache
//! - Train-time augmentation (shift, noise, mixup, masking)
//! - 3-channel normalized mel spectrogram images
//! - Parallel batch loading and optional Python bindings

pub mod augment;
pub mod cache;
pub mod clip;
pub mod config;
pub mod dataset;
pub mod decode;
pub mod error;
pub mod labels;
pub mod loader;
pub mod spectrogram;
pub mod split;
pub mod store;
pub mod table;
pub mod verify;

#[cfg(feature = "python")]
mod python;

pub use config::Config;
pub use dataset::{BadEntry, Dataset, Item, Mode};
pub use error::{Error, Result};
pub use labels::ClassIndex;
pub use loader::{Batch, Loader};
pub use split::{build_datasets, split_by_species, Split};
pub use table::{Row, SampleTable};
