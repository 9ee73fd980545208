//! Python bindings exposing datasets to a PyTorch-style training loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use numpy::{IntoPyArray, PyArray1, PyArray3};
use pyo3::exceptions::{PyIndexError, PyRuntimeError};
use pyo3::types::{PyModule, PyModuleMethods};
use pyo3::{pyclass, pyfunction, pymethods, wrap_pyfunction, Bound, PyErr, PyResult, Python};

use crate::config::Config;
use crate::dataset::{BadEntry, Dataset};
use crate::error::Error;
use crate::split;

fn to_py_err(e: Error) -> PyErr {
    match e {
        Error::IndexOutOfRange { .. } => PyIndexError::new_err(e.to_string()),
        other => PyRuntimeError::new_err(other.to_string()),
    }
}

/// Map-style dataset yielding `(image, label)` NumPy pairs.
#[pyclass(name = "Dataset", frozen)]
pub struct PyDataset {
    inner: Arc<Dataset>,
}

#[pymethods]
impl PyDataset {
    fn __len__(&self) -> usize {
        self.inner.len()
    }

    /// Returns `(image[3, n_mels, n_frames], label[num_classes])`.
    fn __getitem__<'py>(
        &self,
        py: Python<'py>,
        index: usize,
    ) -> PyResult<(Bound<'py, PyArray3<f32>>, Bound<'py, PyArray1<f32>>)> {
        let dataset = Arc::clone(&self.inner);
        // Release the GIL while decoding and rendering
        let item = py.detach(move || dataset.get_item(index)).map_err(to_py_err)?;
        Ok((item.image.into_pyarray(py), item.label.into_pyarray(py)))
    }

    fn classes(&self) -> (Vec<String>, HashMap<String, usize>) {
        let (classes, class_to_idx) = self.inner.classes();
        (classes.to_vec(), class_to_idx.clone())
    }

    fn num_classes(&self) -> usize {
        self.inner.num_classes()
    }

    /// Bad-file log as human-readable strings.
    fn bad_files(&self) -> Vec<String> {
        self.inner
            .bad_files()
            .into_iter()
            .map(|entry| match entry {
                BadEntry::Unreadable { file, reason } => format!("{file}: {reason}"),
                BadEntry::NonFinite { index } => format!("row {index}: non-finite values"),
            })
            .collect()
    }

    #[getter]
    fn formatted_csv(&self) -> PathBuf {
        self.inner.formatted_csv().to_path_buf()
    }
}

/// Build `(train, valid)` datasets from a TOML config file.
#[pyfunction]
fn build_datasets(py: Python<'_>, config_path: PathBuf) -> PyResult<(PyDataset, PyDataset)> {
    let (train, valid) = py
        .detach(move || {
            let config = Config::load(&config_path)?;
            split::build_datasets(&config)
        })
        .map_err(to_py_err)?;
    Ok((
        PyDataset {
            inner: Arc::new(train),
        },
        PyDataset {
            inner: Arc::new(valid),
        },
    ))
}

#[pyo3::pymodule]
fn birdclips(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyDataset>()?;
    m.add_function(wrap_pyfunction!(build_datasets, m)?)?;
    Ok(())
}
