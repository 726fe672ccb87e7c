//! Python module definition.

use pyo3::prelude::*;

use super::{grid, queue, subject};

#[pymodule]
fn _medpatch(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<subject::PySubject>()?;
    m.add_class::<subject::PyPatch>()?;
    m.add_class::<queue::PyPatchQueue>()?;
    m.add_class::<grid::PyGridSampler>()?;
    m.add_class::<grid::PyGridAggregator>()?;
    Ok(())
}
