//! Uniformly random patch sampling.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use super::{max_starts, validate_patch_config, PatchSampler};
use crate::error::Result;
use crate::patch::PatchLocation;
use crate::volume::Subject;

/// Draws each patch start independently from `[0, size - patch]` per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformSampler {
    patch_shape: [usize; 3],
}

impl UniformSampler {
    /// Create a uniform sampler for the given patch shape.
    pub fn new(patch_shape: [usize; 3]) -> Result<Self> {
        validate_patch_config(patch_shape)?;
        Ok(Self { patch_shape })
    }

    /// Draw `count` random locations inside a volume of `spatial_shape`.
    pub fn locations_for<R: Rng>(
        &self,
        spatial_shape: [usize; 3],
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<PatchLocation>> {
        let [max_x, max_y, max_z] = max_starts(spatial_shape, self.patch_shape)?;

        let mut locations = Vec::with_capacity(count);
        for _ in 0..count {
            let start = [
                rng.gen_range(0..=max_x),
                rng.gen_range(0..=max_y),
                rng.gen_range(0..=max_z),
            ];
            locations.push(PatchLocation::from_start_and_shape(start, self.patch_shape)?);
        }
        Ok(locations)
    }
}

impl PatchSampler for UniformSampler {
    fn patch_shape(&self) -> [usize; 3] {
        self.patch_shape
    }

    fn locations(
        &self,
        subject: &Subject,
        count: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<Vec<PatchLocation>> {
        self.locations_for(subject.spatial_shape(), count, rng)
    }
}
