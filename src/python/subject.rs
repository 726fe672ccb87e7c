//! Subject and Patch classes for Python bindings.

use std::collections::HashMap;

use numpy::{PyArray4, PyReadonlyArrayDyn};
use pyo3::exceptions::PyKeyError;
use pyo3::prelude::*;

use super::validation::{parse_kind, to_py_err, volume_from_numpy, volume_to_numpy};
use crate::patch::Patch;
use crate::volume::Subject;

/// One case made of co-registered volumes.
#[pyclass(name = "Subject")]
#[derive(Clone)]
pub struct PySubject {
    pub(crate) inner: Subject,
}

#[pymethods]
impl PySubject {
    /// Create a subject.
    ///
    /// Args:
    ///     name: Subject name
    ///     volumes: Mapping of key to 3D or channel-first 4D float32 array
    ///     labels: Keys to mark as label maps
    ///     affine: 4x4 voxel-to-world matrix shared by all volumes
    ///
    /// Example:
    ///     ```python
    ///     subject = medpatch.Subject("case01", {"t1": t1, "seg": seg}, labels=["seg"])
    ///     ```
    #[new]
    #[pyo3(signature = (name, volumes, labels=None, affine=None))]
    fn new(
        name: String,
        volumes: HashMap<String, PyReadonlyArrayDyn<'_, f32>>,
        labels: Option<Vec<String>>,
        affine: Option<[[f32; 4]; 4]>,
    ) -> PyResult<Self> {
        let labels = labels.unwrap_or_default();
        let mut converted = Vec::with_capacity(volumes.len());
        for (key, array) in &volumes {
            let kind = parse_kind(if labels.contains(key) {
                "label"
            } else {
                "intensity"
            })?;
            converted.push((key.clone(), volume_from_numpy(array.as_array(), affine, kind)?));
        }
        let inner = Subject::new(name, converted).map_err(|e| to_py_err(e, "Subject"))?;
        Ok(Self { inner })
    }

    #[getter]
    fn name(&self) -> &str {
        self.inner.name()
    }

    #[getter]
    fn spatial_shape(&self) -> [usize; 3] {
        self.inner.spatial_shape()
    }

    fn keys(&self) -> Vec<String> {
        self.inner.keys().map(str::to_string).collect()
    }

    /// Voxels of volume `key` as a `[c, x, y, z]` array.
    fn get<'py>(&self, py: Python<'py>, key: &str) -> PyResult<Bound<'py, PyArray4<f32>>> {
        let volume = self
            .inner
            .get(key)
            .ok_or_else(|| PyKeyError::new_err(key.to_string()))?;
        Ok(volume_to_numpy(py, volume))
    }

    fn __len__(&self) -> usize {
        self.inner.len()
    }

    fn __repr__(&self) -> String {
        format!(
            "Subject(name='{}', shape={:?}, keys={:?})",
            self.inner.name(),
            self.inner.spatial_shape(),
            self.keys()
        )
    }
}

/// A subject cropped to a patch location.
#[pyclass(name = "Patch")]
pub struct PyPatch {
    pub(crate) inner: Patch,
}

#[pymethods]
impl PyPatch {
    /// `[x0, y0, z0, x1, y1, z1]` in the source subject.
    #[getter]
    fn location(&self) -> [usize; 6] {
        self.inner.location().to_array()
    }

    #[getter]
    fn subject_name(&self) -> &str {
        self.inner.subject_name()
    }

    /// Cropped volumes as a Subject.
    fn subject(&self) -> PySubject {
        PySubject {
            inner: self.inner.subject().clone(),
        }
    }

    fn get<'py>(&self, py: Python<'py>, key: &str) -> PyResult<Bound<'py, PyArray4<f32>>> {
        let volume = self
            .inner
            .get(key)
            .ok_or_else(|| PyKeyError::new_err(key.to_string()))?;
        Ok(volume_to_numpy(py, volume))
    }

    fn __repr__(&self) -> String {
        format!(
            "Patch(subject='{}', location={})",
            self.inner.subject_name(),
            self.inner.location()
        )
    }
}
