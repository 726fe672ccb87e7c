//! Patch queue for Python bindings.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use super::subject::{PyPatch, PySubject};
use super::validation::to_py_err;
use crate::queue::{FailurePolicy, PatchQueue, QueueConfig};
use crate::sampler::{NoForegroundPolicy, SamplerKind};

fn parse_sampler(
    sampler: &str,
    label_key: Option<String>,
    uniform_fallback: bool,
    overlap: [usize; 3],
) -> PyResult<SamplerKind> {
    match sampler {
        "uniform" => Ok(SamplerKind::Uniform),
        "label" => Ok(SamplerKind::Label {
            label_key,
            on_empty: if uniform_fallback {
                NoForegroundPolicy::Uniform
            } else {
                NoForegroundPolicy::Error
            },
        }),
        "grid" => Ok(SamplerKind::Grid { overlap }),
        other => Err(PyValueError::new_err(format!(
            "sampler must be 'uniform', 'label' or 'grid' (got '{}')",
            other
        ))),
    }
}

/// Bounded buffer of training patches filled by background threads.
///
/// Blocking calls release the GIL while waiting for patches.
#[pyclass(name = "PatchQueue")]
pub struct PyPatchQueue {
    queue: PatchQueue,
}

#[pymethods]
impl PyPatchQueue {
    /// Create a patch queue.
    ///
    /// Args:
    ///     subjects: List of Subject
    ///     patch_size: Patch size [x, y, z]
    ///     capacity: Maximum number of buffered patches
    ///     samples_per_volume: Patches drawn per subject per pass
    ///     sampler: 'uniform', 'label' or 'grid'
    ///     workers: Producer threads (None = one per core, 0 = synchronous)
    ///     shuffle: Shuffle subjects and patches
    ///     seed: Random seed
    ///     label_key: Label volume for the 'label' sampler
    ///     uniform_fallback: Sample uniformly when a label map is empty
    ///     patch_overlap: Overlap for the 'grid' sampler
    ///     abort_on_error: Stop at the first failing subject instead of skipping it
    ///     max_passes: Stop after this many passes over the subjects
    ///
    /// Example:
    ///     ```python
    ///     queue = medpatch.PatchQueue(subjects, [64, 64, 64], capacity=128,
    ///                                 samples_per_volume=8, sampler="label")
    ///     for patch in queue:
    ///         image = patch.get("t1")
    ///     ```
    #[new]
    #[pyo3(signature = (
        subjects,
        patch_size,
        capacity=64,
        samples_per_volume=4,
        sampler="uniform",
        workers=None,
        shuffle=true,
        seed=None,
        label_key=None,
        uniform_fallback=false,
        patch_overlap=[0, 0, 0],
        abort_on_error=false,
        max_passes=None
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        subjects: Vec<PyRef<'_, PySubject>>,
        patch_size: [usize; 3],
        capacity: usize,
        samples_per_volume: usize,
        sampler: &str,
        workers: Option<usize>,
        shuffle: bool,
        seed: Option<u64>,
        label_key: Option<String>,
        uniform_fallback: bool,
        patch_overlap: [usize; 3],
        abort_on_error: bool,
        max_passes: Option<usize>,
    ) -> PyResult<Self> {
        let sampler = parse_sampler(sampler, label_key, uniform_fallback, patch_overlap)?
            .build(patch_size)
            .map_err(|e| to_py_err(e, "PatchQueue"))?;

        let mut config = QueueConfig::new(capacity)
            .samples_per_volume(samples_per_volume)
            .shuffle(shuffle)
            .failure_policy(if abort_on_error {
                FailurePolicy::Abort
            } else {
                FailurePolicy::Skip
            });
        if let Some(w) = workers {
            config = config.workers(w);
        }
        if let Some(s) = seed {
            config = config.seed(s);
        }
        if let Some(p) = max_passes {
            config = config.max_passes(p);
        }

        let subjects: Vec<_> = subjects.iter().map(|s| s.inner.clone()).collect();
        let queue =
            PatchQueue::new(subjects, sampler, config).map_err(|e| to_py_err(e, "PatchQueue"))?;
        Ok(Self { queue })
    }

    /// Next patch, waiting for producers if the buffer is empty.
    fn next_patch(&mut self, py: Python<'_>) -> PyResult<PyPatch> {
        let queue = &mut self.queue;
        py.allow_threads(|| queue.next())
            .map(|inner| PyPatch { inner })
            .map_err(|e| to_py_err(e, "next_patch"))
    }

    /// Up to `batch_size` patches.
    fn next_batch(&mut self, py: Python<'_>, batch_size: usize) -> PyResult<Vec<PyPatch>> {
        let queue = &mut self.queue;
        let batch = py
            .allow_threads(|| queue.next_batch(batch_size))
            .map_err(|e| to_py_err(e, "next_batch"))?;
        Ok(batch
            .patches
            .into_iter()
            .map(|inner| PyPatch { inner })
            .collect())
    }

    fn __iter__(slf: PyRef<'_, Self>) -> PyRef<'_, Self> {
        slf
    }

    fn __next__(&mut self, py: Python<'_>) -> PyResult<Option<PyPatch>> {
        let queue = &mut self.queue;
        match py.allow_threads(|| queue.next()) {
            Ok(inner) => Ok(Some(PyPatch { inner })),
            Err(e) if e.is_terminal() => Ok(None),
            Err(e) => Err(to_py_err(e, "iterator")),
        }
    }

    /// Stop producers; buffered patches remain available.
    fn close(&mut self, py: Python<'_>) {
        let queue = &mut self.queue;
        py.allow_threads(|| queue.close());
    }

    /// Number of buffered patches.
    fn __len__(&self) -> usize {
        self.queue.len()
    }

    #[getter]
    fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    #[getter]
    fn iterations_per_pass(&self) -> usize {
        self.queue.iterations_per_pass()
    }

    #[getter]
    fn patch_shape(&self) -> [usize; 3] {
        self.queue.patch_shape()
    }

    /// Upper bound on patch memory for subjects shaped like `subject`.
    fn max_memory_bytes(&self, subject: PyRef<'_, PySubject>) -> usize {
        self.queue.max_memory_bytes(&subject.inner)
    }

    /// Get performance statistics.
    fn stats(&self) -> String {
        format!("{}", self.queue.stats())
    }

    fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}
