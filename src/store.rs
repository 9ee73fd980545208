//! Content-addressed waveform store on the local filesystem.
//!
//! Each entry is a single-tensor safetensors file named from its key. A
//! correctly named file is the only hit signal. Writes go to a temporary file
//! in the destination directory and are renamed into place, so concurrent
//! writers of the same key never expose a torn file. The last rename wins.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};

use crate::error::{Error, Result};

const TENSOR_NAME: &str = "waveform";
const EXTENSION: &str = "safetensors";

/// Mono samples at a known rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Whether a lookup was served from disk or computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Hit,
    Computed,
}

#[derive(Debug, Clone)]
pub struct TensorStore {
    root: PathBuf,
}

impl TensorStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path backing `key`. Keys may contain `/` separators; parent
    /// references are neutralized so entries stay under the root.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for component in Path::new(key).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::ParentDir => path.push("__"),
                _ => {}
            }
        }
        let mut name = path.into_os_string();
        name.push(".");
        name.push(EXTENSION);
        PathBuf::from(name)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }

    pub fn load(&self, key: &str) -> Result<Waveform> {
        let path = self.path_for(key);
        let bytes = std::fs::read(&path)?;
        decode_entry(&bytes, &path)
    }

    pub fn save(&self, key: &str, waveform: &Waveform) -> Result<()> {
        let path = self.path_for(key);
        let dir = path.parent().unwrap_or(self.root.as_path());
        std::fs::create_dir_all(dir)?;

        let bytes = encode_entry(waveform)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Return the stored entry for `key`, or compute, persist and return it.
    pub fn get_or_compute<F>(&self, key: &str, compute: F) -> Result<(Waveform, Lookup)>
    where
        F: FnOnce() -> Result<Waveform>,
    {
        self.get_or_compute_where(key, |_| true, compute)
    }

    /// Like [`get_or_compute`](Self::get_or_compute), but a stored entry
    /// rejected by `is_fresh` is recomputed and overwritten.
    pub fn get_or_compute_where<P, F>(
        &self,
        key: &str,
        is_fresh: P,
        compute: F,
    ) -> Result<(Waveform, Lookup)>
    where
        P: FnOnce(&Waveform) -> bool,
        F: FnOnce() -> Result<Waveform>,
    {
        if self.contains(key) {
            let found = self.load(key)?;
            if is_fresh(&found) {
                return Ok((found, Lookup::Hit));
            }
            log::warn!("Stale cache entry {}, recomputing", key);
        }
        let computed = compute()?;
        self.save(key, &computed)?;
        Ok((computed, Lookup::Computed))
    }
}

fn encode_entry(waveform: &Waveform) -> Result<Vec<u8>> {
    let data: Vec<u8> = waveform
        .samples
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect();
    let view = TensorView::new(Dtype::F32, vec![waveform.samples.len()], &data)?;
    let metadata = HashMap::from([(
        "sample_rate".to_string(),
        waveform.sample_rate.to_string(),
    )]);
    Ok(safetensors::serialize([(TENSOR_NAME, &view)], &Some(metadata))?)
}

fn decode_entry(bytes: &[u8], path: &Path) -> Result<Waveform> {
    let malformed = || Error::MalformedTensor(path.to_path_buf());

    let (_, metadata) = SafeTensors::read_metadata(bytes)?;
    let sample_rate = metadata
        .metadata()
        .as_ref()
        .and_then(|m| m.get("sample_rate"))
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(malformed)?;

    let tensors = SafeTensors::deserialize(bytes)?;
    let view = tensors.tensor(TENSOR_NAME)?;
    if view.dtype() != Dtype::F32 || view.shape().len() != 1 {
        return Err(malformed());
    }
    let samples = view
        .data()
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok(Waveform::new(samples, sample_rate))
}
