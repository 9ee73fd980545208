//! Fixed-length clip extraction with a per-clip cache.

use std::path::Path;

use crate::cache::canonical_key;
use crate::error::{Error, Result};
use crate::store::{TensorStore, Waveform};
use crate::table::Row;

/// Store key for the clip of `file_reference` starting at `offset_seconds`.
pub fn clip_key(file_reference: &str, offset_seconds: Option<f64>) -> String {
    let stem = Path::new(file_reference).with_extension("");
    let offset = match offset_seconds {
        Some(o) => format!("{o}"),
        None => "full".to_string(),
    };
    format!("clips/{}_{}", stem.to_string_lossy(), offset)
}

/// Slice `[offset, offset + duration)` out of `canonical` and zero-pad or
/// truncate to exactly `num_samples`. A missing offset starts at zero and a
/// missing duration runs to the end.
pub fn extract(
    canonical: &[f32],
    sample_rate: u32,
    offset_seconds: Option<f64>,
    duration_seconds: Option<f64>,
    num_samples: usize,
) -> Vec<f32> {
    let sr = sample_rate as f64;
    let start = offset_seconds
        .map(|o| (o * sr) as usize)
        .unwrap_or(0)
        .min(canonical.len());
    let end = duration_seconds
        .map(|d| start.saturating_add((d * sr) as usize))
        .unwrap_or(canonical.len())
        .min(canonical.len());

    let window = &canonical[start..end];
    let mut clip = Vec::with_capacity(num_samples);
    clip.extend_from_slice(&window[..window.len().min(num_samples)]);
    clip.resize(num_samples, 0.0);
    clip
}

pub struct ClipExtractor {
    store: TensorStore,
    sample_rate: u32,
    num_samples: usize,
}

impl ClipExtractor {
    pub fn new(store: TensorStore, sample_rate: u32, num_samples: usize) -> Self {
        Self {
            store,
            sample_rate,
            num_samples,
        }
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Clip for `row` (at dataset position `index`), served from the clip
    /// cache when present. Concurrent misses on the same key both compute and
    /// write identical bytes.
    pub fn get_clip(&self, row: &Row, index: usize) -> Result<Waveform> {
        let key = clip_key(&row.file_reference, row.offset_seconds);
        let num_samples = self.num_samples;

        let lookup = self.store.get_or_compute_where(
            &key,
            |cached| cached.len() == num_samples,
            || {
                let source = row
                    .cache_key
                    .clone()
                    .unwrap_or_else(|| canonical_key(&row.file_reference));
                let canonical = self.store.load(&source)?;
                let samples = extract(
                    &canonical.samples,
                    canonical.sample_rate,
                    row.offset_seconds,
                    row.duration_seconds,
                    num_samples,
                );
                Ok(Waveform::new(samples, self.sample_rate))
            },
        );

        match lookup {
            Ok((clip, _)) => Ok(clip),
            Err(e) => Err(Error::clip(row.file_reference.clone(), index, e)),
        }
    }
}
