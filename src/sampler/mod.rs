//! Patch sampling strategies.
//!
//! A sampler turns a [`Subject`] into patch locations:
//! - [`UniformSampler`]: independent uniformly random locations
//! - [`LabelSampler`]: random locations centred on foreground label voxels
//! - [`GridSampler`]: exhaustive, deterministic tiling with overlap

mod grid;
mod label;
mod uniform;

use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::error::{Error, Result};
use crate::patch::{Patch, PatchLocation};
use crate::volume::Subject;

pub use grid::{GridLocations, GridPatches, GridSampler};
pub use label::{LabelSampler, NoForegroundPolicy};
pub use uniform::UniformSampler;

/// Random number generator with optional seeding for reproducibility.
#[allow(clippy::option_if_let_else)] // match is clearer than map_or_else here
pub(crate) fn get_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(s) => ChaCha8Rng::seed_from_u64(s),
        None => ChaCha8Rng::from_entropy(),
    }
}

/// A strategy producing patch locations for a subject.
///
/// Implementations must be shareable across the queue's worker threads.
pub trait PatchSampler: Send + Sync {
    /// Spatial shape of the patches this sampler produces.
    fn patch_shape(&self) -> [usize; 3];

    /// Draw `count` locations inside `subject`.
    fn locations(
        &self,
        subject: &Subject,
        count: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<Vec<PatchLocation>>;

    /// Draw `count` locations and crop the subject at each of them.
    fn sample(&self, subject: &Subject, count: usize, rng: &mut ChaCha8Rng) -> Result<Vec<Patch>> {
        let locations = self.locations(subject, count, rng)?;
        let shape = subject.spatial_shape();
        locations
            .into_iter()
            .map(|location| {
                location.validate_within(shape)?;
                Ok(Patch::extract_unchecked(subject, location))
            })
            .collect()
    }
}

impl<S: PatchSampler + ?Sized> PatchSampler for Arc<S> {
    fn patch_shape(&self) -> [usize; 3] {
        (**self).patch_shape()
    }

    fn locations(
        &self,
        subject: &Subject,
        count: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<Vec<PatchLocation>> {
        (**self).locations(subject, count, rng)
    }

    fn sample(&self, subject: &Subject, count: usize, rng: &mut ChaCha8Rng) -> Result<Vec<Patch>> {
        (**self).sample(subject, count, rng)
    }
}

/// Selectable sampling strategy.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SamplerKind {
    /// Uniformly random patches.
    #[default]
    Uniform,
    /// Patches centred on foreground voxels of a label volume.
    Label {
        /// Label volume key; `None` picks the first label-kind volume.
        label_key: Option<String>,
        /// What to do when the label volume is all background.
        on_empty: NoForegroundPolicy,
    },
    /// Exhaustive grid with the given overlap.
    Grid {
        /// Overlap between neighbouring patches per axis.
        overlap: [usize; 3],
    },
}

impl SamplerKind {
    /// Build a sampler of this kind for `patch_shape`.
    pub fn build(&self, patch_shape: [usize; 3]) -> Result<Arc<dyn PatchSampler>> {
        Ok(match self {
            Self::Uniform => Arc::new(UniformSampler::new(patch_shape)?),
            Self::Label {
                label_key,
                on_empty,
            } => {
                let mut sampler = LabelSampler::new(patch_shape)?.on_empty(*on_empty);
                if let Some(key) = label_key {
                    sampler = sampler.label_key(key.clone());
                }
                Arc::new(sampler)
            }
            Self::Grid { overlap } => Arc::new(GridSampler::new(patch_shape, *overlap)?),
        })
    }
}

/// Reject zero-sized patch dimensions.
pub(crate) fn validate_patch_config(patch_shape: [usize; 3]) -> Result<()> {
    for (i, &dim) in patch_shape.iter().enumerate() {
        if dim == 0 {
            return Err(Error::InvalidConfiguration(format!(
                "patch_size[{}] must be positive",
                i
            )));
        }
    }
    Ok(())
}

/// Largest valid start per axis for `patch_shape` inside `spatial_shape`.
pub(crate) fn max_starts(spatial_shape: [usize; 3], patch_shape: [usize; 3]) -> Result<[usize; 3]> {
    let mut max = [0usize; 3];
    for axis in 0..3 {
        if patch_shape[axis] > spatial_shape[axis] {
            return Err(Error::InvalidPatchShape(format!(
                "patch_size[{}]={} cannot exceed image dimension[{}]={}",
                axis, patch_shape[axis], axis, spatial_shape[axis]
            )));
        }
        max[axis] = spatial_shape[axis] - patch_shape[axis];
    }
    Ok(max)
}
