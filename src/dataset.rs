//! Dataset over one split: verified, cached rows rendered as labeled images.
//!
//! Construction runs the eager part of the pipeline (file verification,
//! bulk audio caching, formatted manifest). Item access runs the lazy part:
//!
//! FETCH_CLIP -> AUGMENT_WAVEFORM -> RENDER -> AUGMENT_IMAGE -> VALIDATE
//!
//! Items that render to non-finite values are logged as bad and the access
//! moves to another row, up to `max_retries` times.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ndarray::{Array1, Array3};
use rand::Rng;

use crate::augment::Augmenter;
use crate::cache::AudioCache;
use crate::clip::ClipExtractor;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::labels::ClassIndex;
use crate::spectrogram::{MelConfig, MelSpectrogram};
use crate::store::TensorStore;
use crate::table::SampleTable;
use crate::verify::{ensure_data_root, verify_files};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Augmentations on.
    Train,
    /// Deterministic access, no augmentation.
    Eval,
}

/// Why a row was excluded or skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum BadEntry {
    /// Audio could not be loaded during caching.
    Unreadable { file: String, reason: String },
    /// Row rendered to non-finite values during access.
    NonFinite { index: usize },
}

/// One rendered example.
#[derive(Debug, Clone)]
pub struct Item {
    /// `[3, n_mels, n_frames]`
    pub image: Array3<f32>,
    /// `[num_classes]`, sums to one.
    pub label: Array1<f32>,
    /// Row actually served; differs from the requested index after a retry.
    pub index: usize,
}

pub struct Dataset {
    name: String,
    mode: Mode,
    table: SampleTable,
    classes: ClassIndex,
    clips: ClipExtractor,
    mel: Arc<MelSpectrogram>,
    augmenter: Augmenter,
    max_retries: usize,
    bad_files: Mutex<Vec<BadEntry>>,
    formatted_csv: PathBuf,
}

impl Dataset {
    /// Verify and cache `table`, then write `<cache_dir>/<name>.formatted.csv`.
    ///
    /// Pass `classes = None` for the training split to build the class index
    /// from its labels; pass the training index for every other split.
    pub fn new(
        mut table: SampleTable,
        config: &Config,
        name: &str,
        mode: Mode,
        classes: Option<ClassIndex>,
    ) -> Result<Self> {
        config.validate()?;
        ensure_data_root(&config.data_path)?;
        let store = TensorStore::open(config.cache_dir())?;

        verify_files(&mut table, &config.data_path, &store)?;

        let cache = AudioCache::new(store.clone(), &config.data_path, config.sample_rate)
            .with_progress(config.verbose);
        let report = cache.cache_table(&mut table, name)?;
        let bad_files = report
            .bad_files
            .into_iter()
            .map(|(file, reason)| BadEntry::Unreadable { file, reason })
            .collect();

        let classes = match classes {
            Some(classes) => classes,
            None => ClassIndex::build(table.distinct_species()),
        };
        for species in table.distinct_species() {
            classes.index_of(&species)?;
        }

        let formatted_csv = config.cache_dir().join(format!("{name}.formatted.csv"));
        table.write_formatted_csv(&formatted_csv)?;
        log::info!(
            "{}: {} rows, {} classes, formatted manifest at {:?}",
            name,
            table.len(),
            classes.num_classes(),
            formatted_csv
        );

        Ok(Self {
            name: name.to_string(),
            mode,
            table,
            classes,
            clips: ClipExtractor::new(store, config.sample_rate, config.num_samples()),
            mel: Arc::new(MelSpectrogram::new(MelConfig::from(config))),
            augmenter: Augmenter::new(config.augment.clone()),
            max_retries: config.max_retries,
            bad_files: Mutex::new(bad_files),
            formatted_csv,
        })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn table(&self) -> &SampleTable {
        &self.table
    }

    /// Class list and label-to-index map.
    pub fn classes(&self) -> (&[String], &HashMap<String, usize>) {
        (self.classes.classes(), self.classes.class_to_idx())
    }

    pub fn class_index(&self) -> &ClassIndex {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.num_classes()
    }

    pub fn num_samples(&self) -> usize {
        self.clips.num_samples()
    }

    pub fn spectrogram(&self) -> &MelSpectrogram {
        &self.mel
    }

    pub fn formatted_csv(&self) -> &Path {
        &self.formatted_csv
    }

    /// Snapshot of the bad-file log.
    pub fn bad_files(&self) -> Vec<BadEntry> {
        self.bad_files
            .lock()
            .map(|log| log.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn record_bad(&self, entry: BadEntry) {
        match self.bad_files.lock() {
            Ok(mut log) => log.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }

    /// Fixed-length waveform and one-hot label for row `index`.
    pub fn get_clip(&self, index: usize) -> Result<(Vec<f32>, Array1<f32>)> {
        let row = self.table.get(index).ok_or(Error::IndexOutOfRange {
            index,
            len: self.len(),
        })?;
        let clip = self.clips.get_clip(row, index)?;
        let label = self.classes.encode(&row.species)?;
        Ok((clip.samples, label))
    }

    /// Render row `index` using the thread-local RNG.
    pub fn get_item(&self, index: usize) -> Result<Item> {
        self.get_item_with(index, &mut rand::thread_rng())
    }

    /// Render row `index`, drawing all randomness from `rng`.
    pub fn get_item_with<R: Rng + ?Sized>(&self, index: usize, rng: &mut R) -> Result<Item> {
        let len = self.len();
        if index >= len {
            return Err(Error::IndexOutOfRange { index, len });
        }

        let mut current = index;
        let mut failures = 0;
        loop {
            let (mut wave, mut label) = self.get_clip(current)?;

            if self.mode == Mode::Train {
                self.augmenter
                    .augment_waveform(&mut wave, &mut label, rng, |rng| {
                        self.get_clip(rng.gen_range(0..len))
                    })?;
            }

            let mut image = self.mel.render(&wave);

            if self.mode == Mode::Train {
                self.augmenter.augment_image(&mut image, rng);
            }

            if image.iter().all(|v| v.is_finite()) && label.iter().all(|v| v.is_finite()) {
                return Ok(Item {
                    image,
                    label,
                    index: current,
                });
            }

            log::error!("Error in annotation #{} of {}: non-finite values", current, self.name);
            self.record_bad(BadEntry::NonFinite { index: current });
            failures += 1;
            if failures > self.max_retries {
                return Err(Error::RetriesExhausted {
                    attempts: failures,
                    last_index: current,
                });
            }

            current = match self.mode {
                Mode::Train => rng.gen_range(0..len),
                Mode::Eval => (current + 1) % len,
            };
        }
    }
}
