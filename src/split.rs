//! Stratified train/validation split and construction of both datasets.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::Config;
use crate::dataset::{Dataset, Mode};
use crate::error::Result;
use crate::table::SampleTable;

/// Disjoint row sets drawn from one manifest.
#[derive(Debug, Clone)]
pub struct Split {
    pub train: SampleTable,
    pub valid: SampleTable,
}

/// For each species, send a `train_fraction` share of its distinct files
/// (at least one) to training. Every row whose file was picked for any
/// species goes to training; all other rows go to validation. Recordings
/// therefore never straddle the split. Row order within each side follows
/// the manifest.
pub fn split_by_species(table: &SampleTable, train_fraction: f64, seed: u64) -> Split {
    let mut rng = StdRng::seed_from_u64(seed);

    let mut files_by_species: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    for row in table.rows() {
        if seen.insert((row.species.as_str(), row.file_reference.as_str())) {
            files_by_species
                .entry(row.species.as_str())
                .or_default()
                .push(row.file_reference.as_str());
        }
    }

    let mut train_files: HashSet<&str> = HashSet::new();
    for species in table.distinct_species() {
        let Some(files) = files_by_species.get_mut(species.as_str()) else {
            continue;
        };
        files.shuffle(&mut rng);
        let n = files.len();
        let n_train = ((train_fraction * n as f64).round() as usize).clamp(1, n);
        train_files.extend(files.iter().take(n_train).copied());
    }

    let (train_idx, valid_idx): (Vec<usize>, Vec<usize>) = (0..table.len())
        .partition(|&i| train_files.contains(table.rows()[i].file_reference.as_str()));

    log::info!(
        "Split {} rows into {} train / {} valid",
        table.len(),
        train_idx.len(),
        valid_idx.len()
    );

    Split {
        train: table.select(&train_idx),
        valid: table.select(&valid_idx),
    }
}

/// Read the manifest, split it, and build the training dataset followed by
/// the validation dataset with the training class index.
pub fn build_datasets(config: &Config) -> Result<(Dataset, Dataset)> {
    config.validate()?;
    let manifest = SampleTable::read_csv(&config.manifest, &config.columns)?;
    let split = split_by_species(&manifest, config.train_test_split, config.seed);

    let train = Dataset::new(split.train, config, "train", Mode::Train, None)?;
    let classes = train.class_index().clone();
    let valid = Dataset::new(split.valid, config, "valid", Mode::Eval, Some(classes))?;
    Ok((train, valid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Row;

    fn key(row: &Row) -> (String, String, Option<u64>) {
        (
            row.file_reference.clone(),
            row.species.clone(),
            row.offset_seconds.map(f64::to_bits),
        )
    }

    #[test]
    fn test_small_manifest_scenario() {
        let table = SampleTable::from_rows(vec![
            Row::new("a1.wav", "A", Some(0.0), Some(1.0)),
            Row::new("a2.wav", "A", Some(0.0), Some(1.0)),
            Row::new("a3.wav", "A", Some(0.0), Some(1.0)),
            Row::new("b1.wav", "B", Some(0.0), Some(1.0)),
            Row::new("b2.wav", "B", Some(0.0), Some(1.0)),
        ]);
        for seed in 0..20 {
            let split = split_by_species(&table, 0.6, seed);
            assert_eq!(split.train.len() + split.valid.len(), 5);

            let train: HashSet<_> = split.train.rows().iter().map(key).collect();
            let valid: HashSet<_> = split.valid.rows().iter().map(key).collect();
            assert!(train.is_disjoint(&valid));

            for species in ["A", "B"] {
                let n_valid = split.valid.rows().iter().filter(|r| r.species == species).count();
                assert!((1..=2).contains(&n_valid), "seed {seed}: {species} has {n_valid} valid rows");
            }
        }
    }

    #[test]
    fn test_split_is_reproducible() {
        let rows: Vec<Row> = (0..40)
            .map(|i| Row::new(format!("f{i}.wav"), format!("s{}", i % 4), None, None))
            .collect();
        let table = SampleTable::from_rows(rows);
        let a = split_by_species(&table, 0.75, 9);
        let b = split_by_species(&table, 0.75, 9);
        assert_eq!(a.train.rows(), b.train.rows());

        // 10 files per species -> round(7.5) = 8 train each
        for s in 0..4 {
            let species = format!("s{s}");
            let n = a.train.rows().iter().filter(|r| r.species == species).count();
            assert_eq!(n, 8);
        }
    }

    #[test]
    fn test_rows_of_one_recording_stay_together() {
        let table = SampleTable::from_rows(vec![
            Row::new("x.wav", "A", Some(0.0), Some(1.0)),
            Row::new("x.wav", "A", Some(5.0), Some(1.0)),
            Row::new("y.wav", "A", Some(0.0), Some(1.0)),
            Row::new("y.wav", "A", Some(2.0), Some(1.0)),
        ]);
        let split = split_by_species(&table, 0.5, 3);
        assert_eq!(split.train.len(), 2);
        assert_eq!(split.train.distinct_files().len(), 1);
        assert_eq!(split.valid.distinct_files().len(), 1);
    }

    #[test]
    fn test_singleton_species_goes_to_train() {
        let table = SampleTable::from_rows(vec![
            Row::new("only.wav", "rare", None, None),
            Row::new("c1.wav", "common", None, None),
            Row::new("c2.wav", "common", None, None),
        ]);
        let split = split_by_species(&table, 0.2, 0);
        assert!(split.train.rows().iter().any(|r| r.species == "rare"));
    }
}
