//! One-time conversion of raw recordings into canonical mono tensors.
//!
//! Every distinct file referenced by a table is decoded, downmixed and
//! resampled once, then stored under a key derived from its reference.
//! Files that fail anywhere along the way are reported as bad and their rows
//! dropped; one broken recording never stops the pass.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};

use crate::decode::load_audio_file;
use crate::error::{Error, Result};
use crate::store::{Lookup, TensorStore};
use crate::table::SampleTable;

/// Store key for the canonical tensor of `file_reference`.
pub fn canonical_key(file_reference: &str) -> String {
    format!("audio/{file_reference}")
}

/// Outcome of caching one file.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheStatus {
    Cached(String),
    Bad(String),
}

/// Summary of a bulk caching pass.
#[derive(Debug, Default)]
pub struct CacheReport {
    pub converted: usize,
    pub already_cached: usize,
    /// `(file_reference, reason)` for every file that failed.
    pub bad_files: Vec<(String, String)>,
    pub rows_dropped: usize,
}

pub struct AudioCache {
    store: TensorStore,
    data_path: PathBuf,
    sample_rate: u32,
    show_progress: bool,
}

impl AudioCache {
    pub fn new(store: TensorStore, data_path: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            store,
            data_path: data_path.into(),
            sample_rate,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn store(&self) -> &TensorStore {
        &self.store
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Make sure `file_reference` has a canonical tensor. Never fails: any
    /// error (or decoder panic) is logged and reported as [`CacheStatus::Bad`].
    pub fn ensure_cached(&self, file_reference: &str) -> CacheStatus {
        self.ensure_cached_inner(file_reference).0
    }

    fn ensure_cached_inner(&self, file_reference: &str) -> (CacheStatus, Option<Lookup>) {
        let key = canonical_key(file_reference);
        // A correctly named entry is a hit; it is not opened here.
        if self.store.contains(&key) {
            return (CacheStatus::Cached(key), Some(Lookup::Hit));
        }
        let path = self.data_path.join(file_reference);

        let attempt = panic::catch_unwind(AssertUnwindSafe(|| -> Result<()> {
            let decoded = load_audio_file(&path)?;
            let canonical = decoded.into_canonical(self.sample_rate)?;
            self.store.save(&key, &canonical)
        }));

        match attempt {
            Ok(Ok(())) => (CacheStatus::Cached(key), Some(Lookup::Computed)),
            Ok(Err(e)) => {
                log::warn!("{} is bad: {}", file_reference, e);
                (CacheStatus::Bad(e.to_string()), None)
            }
            Err(_) => {
                log::warn!("{} is bad: decoder panicked", file_reference);
                (CacheStatus::Bad("decoder panicked".to_string()), None)
            }
        }
    }

    /// Cache every distinct file in `table`, record each row's cache key and
    /// drop rows whose file is bad. Zero surviving rows is fatal.
    pub fn cache_table(&self, table: &mut SampleTable, split: &str) -> Result<CacheReport> {
        let files = table.distinct_files();
        let progress = if self.show_progress {
            ProgressBar::new(files.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::with_template("{prefix} [{bar:40}] {pos}/{len} {msg}") {
            progress.set_style(style.progress_chars("=> "));
        }
        progress.set_prefix(format!("caching {split}"));

        let mut report = CacheReport::default();
        let mut keys: HashMap<String, String> = HashMap::with_capacity(files.len());
        for file in files {
            progress.set_message(file.clone());
            match self.ensure_cached_inner(&file) {
                (CacheStatus::Cached(key), lookup) => {
                    match lookup {
                        Some(Lookup::Computed) => report.converted += 1,
                        _ => report.already_cached += 1,
                    }
                    keys.insert(file, key);
                }
                (CacheStatus::Bad(reason), _) => report.bad_files.push((file, reason)),
            }
            progress.inc(1);
        }
        progress.finish_and_clear();

        report.rows_dropped = table.retain(|row| keys.contains_key(&row.file_reference));
        for row in table.rows_mut() {
            row.cache_key = keys.get(&row.file_reference).cloned();
        }

        log::info!(
            "{}: {} files converted, {} already cached, {} bad ({} rows dropped)",
            split,
            report.converted,
            report.already_cached,
            report.bad_files.len(),
            report.rows_dropped
        );

        if table.is_empty() {
            return Err(Error::NoValidRows(split.to_string()));
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Row;

    fn write_wav(path: &Path, rate: u32, channels: u16, frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames * channels as usize {
            writer.write_sample(((i % 100) as i16 - 50) * 100).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn setup() -> (tempfile::TempDir, AudioCache) {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        write_wav(&data.join("good.wav"), 8000, 2, 4000);
        std::fs::write(data.join("corrupt.wav"), b"RIFF garbage").unwrap();
        let store = TensorStore::open(dir.path().join("cache")).unwrap();
        let cache = AudioCache::new(store, data, 8000);
        (dir, cache)
    }

    #[test]
    fn test_ensure_cached_converts_to_mono() {
        let (_dir, cache) = setup();
        let status = cache.ensure_cached("good.wav");
        assert_eq!(status, CacheStatus::Cached(canonical_key("good.wav")));
        let wave = cache.store().load(&canonical_key("good.wav")).unwrap();
        assert_eq!(wave.len(), 4000);
        assert_eq!(wave.sample_rate, 8000);
    }

    #[test]
    fn test_corrupt_file_is_bad_not_fatal() {
        let (_dir, cache) = setup();
        assert!(matches!(cache.ensure_cached("corrupt.wav"), CacheStatus::Bad(_)));
        assert!(matches!(cache.ensure_cached("absent.wav"), CacheStatus::Bad(_)));
    }

    #[test]
    fn test_cache_table_drops_bad_rows() {
        let (_dir, cache) = setup();
        let mut table = SampleTable::from_rows(vec![
            Row::new("good.wav", "a", Some(0.0), Some(0.2)),
            Row::new("corrupt.wav", "a", None, None),
            Row::new("good.wav", "b", Some(0.2), Some(0.2)),
            Row::new("corrupt.wav", "b", Some(1.0), None),
        ]);
        let report = cache.cache_table(&mut table, "train").unwrap();
        assert_eq!(report.converted, 1);
        assert_eq!(report.bad_files.len(), 1);
        assert_eq!(report.bad_files[0].0, "corrupt.wav");
        assert_eq!(report.rows_dropped, 2);
        assert_eq!(table.len(), 2);
        assert!(table
            .rows()
            .iter()
            .all(|r| r.cache_key.as_deref() == Some("audio/good.wav")));
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let (_dir, cache) = setup();
        let rows = vec![Row::new("good.wav", "a", None, None)];

        let mut first = SampleTable::from_rows(rows.clone());
        cache.cache_table(&mut first, "train").unwrap();
        let path = cache.store().path_for(&canonical_key("good.wav"));
        let before = std::fs::read(&path).unwrap();

        let mut second = SampleTable::from_rows(rows);
        let report = cache.cache_table(&mut second, "train").unwrap();
        assert_eq!(report.converted, 0);
        assert_eq!(report.already_cached, 1);
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_existing_entry_is_a_hit_without_reading() {
        let (_dir, cache) = setup();
        let path = cache.store().path_for(&canonical_key("x.wav"));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"present but not parsed").unwrap();

        assert_eq!(
            cache.ensure_cached("x.wav"),
            CacheStatus::Cached(canonical_key("x.wav"))
        );
        let mut table = SampleTable::from_rows(vec![Row::new("x.wav", "a", None, None)]);
        let report = cache.cache_table(&mut table, "train").unwrap();
        assert_eq!(report.already_cached, 1);
        assert_eq!(report.converted, 0);
        assert_eq!(std::fs::read(&path).unwrap(), b"present but not parsed");
    }

    #[test]
    fn test_all_bad_is_fatal() {
        let (_dir, cache) = setup();
        let mut table = SampleTable::from_rows(vec![Row::new("corrupt.wav", "a", None, None)]);
        let err = cache.cache_table(&mut table, "valid").unwrap_err();
        assert!(matches!(err, Error::NoValidRows(s) if s == "valid"));
    }
}
