//! Drops manifest rows whose audio cannot be found.

use std::collections::HashSet;
use std::path::Path;

use crate::cache::canonical_key;
use crate::error::{Error, Result};
use crate::store::TensorStore;
use crate::table::SampleTable;

/// Fail fast when the data root itself is absent.
pub fn ensure_data_root(data_path: &Path) -> Result<()> {
    if !data_path.is_dir() {
        return Err(Error::DataRootMissing(data_path.to_path_buf()));
    }
    Ok(())
}

/// Restrict `table` to rows whose file exists under `data_path`, or whose
/// canonical tensor is already in `store`. Returns the number of rows dropped.
pub fn verify_files(table: &mut SampleTable, data_path: &Path, store: &TensorStore) -> Result<usize> {
    ensure_data_root(data_path)?;

    let missing: HashSet<String> = table
        .distinct_files()
        .into_iter()
        .filter(|file| !data_path.join(file).is_file() && !store.contains(&canonical_key(file)))
        .collect();

    for file in &missing {
        log::debug!("Missing audio file {}", file);
    }
    log::info!("Ignoring {} missing files", missing.len());

    let dropped = table.retain(|row| !missing.contains(&row.file_reference));
    if dropped > 0 {
        log::info!("Dropped {} rows referencing missing files", dropped);
    }
    Ok(dropped)
}
