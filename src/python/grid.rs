//! Grid sampling and aggregation for Python bindings.

use numpy::{PyArray4, PyReadonlyArrayDyn};
use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;

use super::subject::{PyPatch, PySubject};
use super::validation::{parse_kind, parse_location, to_py_err, volume_from_numpy, volume_to_numpy};
use crate::aggregator::GridAggregator;
use crate::sampler::GridSampler;

/// Exhaustive tiling of a volume with overlapping patches.
#[pyclass(name = "GridSampler")]
pub struct PyGridSampler {
    inner: GridSampler,
}

#[pymethods]
impl PyGridSampler {
    #[new]
    #[pyo3(signature = (patch_size, patch_overlap=[0, 0, 0]))]
    fn new(patch_size: [usize; 3], patch_overlap: [usize; 3]) -> PyResult<Self> {
        let inner =
            GridSampler::new(patch_size, patch_overlap).map_err(|e| to_py_err(e, "GridSampler"))?;
        Ok(Self { inner })
    }

    /// Number of patches for a volume of `spatial_shape`.
    fn count(&self, spatial_shape: [usize; 3]) -> PyResult<usize> {
        self.inner
            .len_for(spatial_shape)
            .map_err(|e| to_py_err(e, "count"))
    }

    /// Every location as `[x0, y0, z0, x1, y1, z1]`, Z outermost.
    fn locations(&self, spatial_shape: [usize; 3]) -> PyResult<Vec<[usize; 6]>> {
        let locations = self
            .inner
            .locations_for(spatial_shape)
            .map_err(|e| to_py_err(e, "locations"))?;
        Ok(locations.map(|l| l.to_array()).collect())
    }

    /// Crop `subject` at every grid location.
    fn patches(&self, subject: PyRef<'_, PySubject>) -> PyResult<Vec<PyPatch>> {
        let patches = self
            .inner
            .iter(&subject.inner)
            .map_err(|e| to_py_err(e, "patches"))?;
        Ok(patches.map(|inner| PyPatch { inner }).collect())
    }
}

/// Reassembles grid patch predictions into one volume.
#[pyclass(name = "GridAggregator")]
pub struct PyGridAggregator {
    inner: Option<GridAggregator>,
}

impl PyGridAggregator {
    fn aggregator(&mut self) -> PyResult<&mut GridAggregator> {
        self.inner
            .as_mut()
            .ok_or_else(|| PyRuntimeError::new_err("GridAggregator already finalized"))
    }
}

#[pymethods]
impl PyGridAggregator {
    #[new]
    #[pyo3(signature = (target_shape, patch_size, patch_overlap=[0, 0, 0], affine=None, kind="intensity"))]
    fn new(
        target_shape: [usize; 3],
        patch_size: [usize; 3],
        patch_overlap: [usize; 3],
        affine: Option<[[f32; 4]; 4]>,
        kind: &str,
    ) -> PyResult<Self> {
        let mut aggregator = GridAggregator::new(target_shape, patch_size, patch_overlap)
            .map_err(|e| to_py_err(e, "GridAggregator"))?
            .with_kind(parse_kind(kind)?);
        if let Some(affine) = affine {
            aggregator = aggregator.with_affine(affine);
        }
        Ok(Self {
            inner: Some(aggregator),
        })
    }

    /// Add the prediction for `location` (`[x0, y0, z0, x1, y1, z1]`).
    fn add(&mut self, location: [usize; 6], prediction: PyReadonlyArrayDyn<'_, f32>) -> PyResult<()> {
        let location = parse_location(location)?;
        let prediction = volume_from_numpy(prediction.as_array(), None, Default::default())?;
        self.aggregator()?
            .add(location, &prediction)
            .map_err(|e| to_py_err(e, "add"))
    }

    #[getter]
    fn progress(&self) -> f64 {
        self.inner.as_ref().map_or(1.0, GridAggregator::progress)
    }

    fn is_complete(&self) -> bool {
        self.inner.as_ref().is_some_and(GridAggregator::is_complete)
    }

    /// Return the assembled `[c, x, y, z]` array.
    ///
    /// Fails without consuming the aggregator while voxels are missing.
    fn finalize<'py>(&mut self, py: Python<'py>) -> PyResult<Bound<'py, PyArray4<f32>>> {
        let aggregator = self.aggregator()?;
        if !aggregator.is_complete() {
            return Err(to_py_err(
                crate::error::Error::IncompleteCoverage {
                    missing: aggregator.missing_voxels(),
                    total: aggregator.target_shape().iter().product(),
                },
                "finalize",
            ));
        }
        let volume = self
            .inner
            .take()
            .ok_or_else(|| PyRuntimeError::new_err("GridAggregator already finalized"))?
            .finalize()
            .map_err(|e| to_py_err(e, "finalize"))?;
        Ok(volume_to_numpy(py, &volume))
    }
}
