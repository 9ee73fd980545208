//! Manifest reading and writing.
//!
//! A [`SampleTable`] holds one [`Row`] per labeled clip reference. Rows keep
//! their full original record so extra manifest columns survive to the
//! formatted CSV written after caching.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::config::ColumnConfig;
use crate::error::{Error, Result};

/// Column appended to formatted manifests holding the raw file reference.
pub const ORIGINAL_FILE_COLUMN: &str = "original_file_path";

/// One manifest entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub file_reference: String,
    pub species: String,
    pub offset_seconds: Option<f64>,
    pub duration_seconds: Option<f64>,
    /// Canonical cache key, set once the audio cache has resolved this file.
    pub cache_key: Option<String>,
    /// Full manifest record, in header order.
    record: Vec<String>,
}

impl Row {
    /// Build a row without an underlying manifest record.
    pub fn new(
        file_reference: impl Into<String>,
        species: impl Into<String>,
        offset_seconds: Option<f64>,
        duration_seconds: Option<f64>,
    ) -> Self {
        let file_reference = file_reference.into();
        let species = species.into();
        let record = vec![
            file_reference.clone(),
            species.clone(),
            offset_seconds.map(|o| o.to_string()).unwrap_or_default(),
            duration_seconds.map(|d| d.to_string()).unwrap_or_default(),
        ];
        Self {
            file_reference,
            species,
            offset_seconds,
            duration_seconds,
            cache_key: None,
            record,
        }
    }
}

/// Header layout shared by every table split from the same manifest.
#[derive(Debug, Clone)]
struct Layout {
    headers: Vec<String>,
    file_col: usize,
}

/// Ordered set of manifest rows.
#[derive(Debug, Clone)]
pub struct SampleTable {
    layout: Arc<Layout>,
    rows: Vec<Row>,
}

impl SampleTable {
    /// Build a table from rows constructed with [`Row::new`].
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let columns = ColumnConfig::default();
        let layout = Layout {
            headers: vec![
                columns.file_name,
                columns.manual_id,
                columns.offset,
                columns.duration,
            ],
            file_col: 0,
        };
        Self {
            layout: Arc::new(layout),
            rows,
        }
    }

    /// Read a manifest CSV. Rows with an empty file reference are skipped.
    pub fn read_csv(path: &Path, columns: &ColumnConfig) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, columns)
    }

    pub fn from_reader<R: std::io::Read>(reader: R, columns: &ColumnConfig) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| Error::MissingColumn(name.to_string()))
        };
        let file_col = find(&columns.file_name)?;
        let label_col = find(&columns.manual_id)?;
        let offset_col = find(&columns.offset)?;
        let duration_col = find(&columns.duration)?;

        let mut rows = Vec::new();
        let mut skipped = 0usize;
        for record in reader.records() {
            let record = record?;
            let field = |i: usize| record.get(i).unwrap_or("").trim();

            let file_reference = field(file_col);
            if file_reference.is_empty() {
                skipped += 1;
                continue;
            }

            let offset = parse_seconds(field(offset_col), &columns.offset)?;
            if offset.is_some_and(|o| o < 0.0) {
                return Err(invalid(&columns.offset, field(offset_col)));
            }
            let duration = parse_seconds(field(duration_col), &columns.duration)?;
            if duration.is_some_and(|d| d <= 0.0) {
                return Err(invalid(&columns.duration, field(duration_col)));
            }

            rows.push(Row {
                file_reference: file_reference.to_string(),
                species: field(label_col).to_string(),
                offset_seconds: offset,
                duration_seconds: duration,
                cache_key: None,
                record: record.iter().map(str::to_string).collect(),
            });
        }

        if skipped > 0 {
            log::info!("Skipped {} manifest rows without a file reference", skipped);
        }

        Ok(Self {
            layout: Arc::new(Layout { headers, file_col }),
            rows,
        })
    }

    /// Write the table with cache keys substituted into the file column and
    /// the raw reference kept in [`ORIGINAL_FILE_COLUMN`].
    pub fn write_formatted_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;

        let mut headers = self.layout.headers.clone();
        headers.push(ORIGINAL_FILE_COLUMN.to_string());
        writer.write_record(&headers)?;

        for row in &self.rows {
            let mut record = row.record.clone();
            record.resize(self.layout.headers.len(), String::new());
            if let Some(key) = &row.cache_key {
                record[self.layout.file_col] = key.clone();
            }
            record.push(row.file_reference.clone());
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// New table over the rows at `indices`, sharing this table's header layout.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            layout: Arc::clone(&self.layout),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    /// Keep only rows for which `keep` returns true. Returns the number dropped.
    pub fn retain(&mut self, keep: impl FnMut(&Row) -> bool) -> usize {
        let before = self.rows.len();
        self.rows.retain(keep);
        before - self.rows.len()
    }

    /// Distinct file references in first-seen order.
    pub fn distinct_files(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter(|r| seen.insert(r.file_reference.as_str()))
            .map(|r| r.file_reference.clone())
            .collect()
    }

    /// Distinct species labels in first-seen order.
    pub fn distinct_species(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter(|r| seen.insert(r.species.as_str()))
            .map(|r| r.species.clone())
            .collect()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows
    }

    pub fn get(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn parse_seconds(value: &str, column: &str) -> Result<Option<f64>> {
    if value.is_empty() || value.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    value
        .parse::<f64>()
        .map(Some)
        .map_err(|_| invalid(column, value))
}

fn invalid(column: &str, value: &str) -> Error {
    Error::InvalidValue {
        column: column.to_string(),
        value: value.to_string(),
    }
}
