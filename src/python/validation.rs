//! Conversion and validation helpers for the Python boundary.

use ndarray::{ArrayViewD, Axis, Ix4};
use numpy::PyArray4;
use pyo3::exceptions::{PyIOError, PyRuntimeError, PyStopIteration, PyValueError};
use pyo3::prelude::*;

use crate::error::Error as MedpatchError;
use crate::patch::PatchLocation;
use crate::volume::{Volume, VolumeKind, IDENTITY_AFFINE};

/// Convert a medpatch Error to the appropriate Python exception.
pub fn to_py_err(e: MedpatchError, context: &str) -> PyErr {
    match &e {
        MedpatchError::Io(io_err) => PyIOError::new_err(format!("{}: {}", context, io_err)),
        MedpatchError::Exhausted(msg) => PyStopIteration::new_err(format!("{}: {}", context, msg)),
        MedpatchError::QueueClosed
        | MedpatchError::SubjectFailed { .. }
        | MedpatchError::ProducerPanicked(_) => {
            PyRuntimeError::new_err(format!("{}: {}", context, e))
        }
        MedpatchError::InvalidConfiguration(_)
        | MedpatchError::InvalidPatchShape(_)
        | MedpatchError::InvalidCropRegion(_)
        | MedpatchError::ShapeMismatch(_)
        | MedpatchError::NoForegroundFound(_)
        | MedpatchError::IncompleteCoverage { .. }
        | MedpatchError::UnreadableFormat(_) => PyValueError::new_err(format!("{}: {}", context, e)),
    }
}

/// Parse a volume kind name.
pub fn parse_kind(kind: &str) -> PyResult<VolumeKind> {
    match kind {
        "intensity" => Ok(VolumeKind::Intensity),
        "label" => Ok(VolumeKind::Label),
        other => Err(PyValueError::new_err(format!(
            "kind must be 'intensity' or 'label' (got '{}')",
            other
        ))),
    }
}

/// Parse `[x0, y0, z0, x1, y1, z1]` into a location.
pub fn parse_location(values: [usize; 6]) -> PyResult<PatchLocation> {
    PatchLocation::new(
        [values[0], values[1], values[2]],
        [values[3], values[4], values[5]],
    )
    .map_err(|e| to_py_err(e, "location"))
}

/// Build a volume from a 3D `[x, y, z]` or channel-first 4D `[c, x, y, z]` array.
pub fn volume_from_numpy(
    data: ArrayViewD<'_, f32>,
    affine: Option<[[f32; 4]; 4]>,
    kind: VolumeKind,
) -> PyResult<Volume> {
    let data = match data.ndim() {
        3 => data.insert_axis(Axis(0)),
        4 => data,
        n => {
            return Err(PyValueError::new_err(format!(
                "volume must be 3D or channel-first 4D (got {} dimensions)",
                n
            )))
        }
    };
    let data = data
        .into_dimensionality::<Ix4>()
        .map_err(|e| PyValueError::new_err(format!("volume: {}", e)))?
        .to_owned();
    Volume::new(data, affine.unwrap_or(IDENTITY_AFFINE), kind).map_err(|e| to_py_err(e, "volume"))
}

/// Copy a volume's voxels into a new numpy array.
pub fn volume_to_numpy<'py>(py: Python<'py>, volume: &Volume) -> Bound<'py, PyArray4<f32>> {
    PyArray4::from_array(py, &volume.data())
}
