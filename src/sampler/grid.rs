//! Exhaustive grid sampling.
//!
//! Locations step by `patch - overlap` on every axis. The last start on an
//! axis is clamped to `size - patch`, so the final patch may overlap its
//! predecessor by more than the nominal overlap. Locations are ordered with
//! the Z axis outermost and X innermost.

use std::iter::FusedIterator;

use rand_chacha::ChaCha8Rng;

use super::{max_starts, validate_patch_config, PatchSampler};
use crate::error::{Error, Result};
use crate::patch::{Patch, PatchLocation};
use crate::volume::Subject;

/// Deterministic tiling of a volume with overlapping patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSampler {
    patch_shape: [usize; 3],
    overlap: [usize; 3],
}

impl GridSampler {
    /// Create a grid sampler; overlap must be smaller than the patch on every axis.
    pub fn new(patch_shape: [usize; 3], overlap: [usize; 3]) -> Result<Self> {
        validate_patch_config(patch_shape)?;
        for axis in 0..3 {
            if overlap[axis] >= patch_shape[axis] {
                return Err(Error::InvalidConfiguration(format!(
                    "patch_overlap[{}]={} must be smaller than patch_size[{}]={}",
                    axis, overlap[axis], axis, patch_shape[axis]
                )));
            }
        }
        Ok(Self {
            patch_shape,
            overlap,
        })
    }

    /// Overlap between neighbouring patches.
    pub fn overlap(&self) -> [usize; 3] {
        self.overlap
    }

    /// Distance between consecutive starts (before clamping).
    pub fn stride(&self) -> [usize; 3] {
        [
            self.patch_shape[0] - self.overlap[0],
            self.patch_shape[1] - self.overlap[1],
            self.patch_shape[2] - self.overlap[2],
        ]
    }

    /// Number of locations for a volume, without generating them.
    pub fn len_for(&self, spatial_shape: [usize; 3]) -> Result<usize> {
        Ok(self.axis_counts(spatial_shape)?.iter().product())
    }

    /// Lazily enumerate every location for a volume of `spatial_shape`.
    pub fn locations_for(&self, spatial_shape: [usize; 3]) -> Result<GridLocations> {
        let counts = self.axis_counts(spatial_shape)?;
        Ok(GridLocations {
            spatial_shape,
            patch_shape: self.patch_shape,
            stride: self.stride(),
            counts,
            front: 0,
            back: counts.iter().product(),
        })
    }

    /// Lazily crop `subject` at every grid location.
    pub fn iter<'a>(&self, subject: &'a Subject) -> Result<GridPatches<'a>> {
        Ok(GridPatches {
            subject,
            locations: self.locations_for(subject.spatial_shape())?,
        })
    }

    fn axis_counts(&self, spatial_shape: [usize; 3]) -> Result<[usize; 3]> {
        let span = max_starts(spatial_shape, self.patch_shape)?;
        let stride = self.stride();
        let mut counts = [0usize; 3];
        for axis in 0..3 {
            counts[axis] = span[axis] / stride[axis] + 1 + usize::from(span[axis] % stride[axis] != 0);
        }
        Ok(counts)
    }

    /// Core region of a grid location: the voxels this patch alone owns.
    ///
    /// Per axis the core starts `overlap / 2` voxels inside the patch unless
    /// the patch touches the volume's lower edge, and ends where the next
    /// grid patch's core starts unless the patch touches the upper edge. The
    /// next start is derived from the location itself (`start + stride`,
    /// clamped to `size - patch`), so cores of consecutive patches meet
    /// exactly, including around the clamped last patch.
    pub(crate) fn core_region(
        &self,
        location: &PatchLocation,
        spatial_shape: [usize; 3],
    ) -> Result<[(usize, usize); 3]> {
        location.validate_within(spatial_shape)?;
        let start = location.start();
        let end = location.end();
        let stride = self.stride();
        let mut core = [(0usize, 0usize); 3];

        for axis in 0..3 {
            let size = spatial_shape[axis];
            let patch = self.patch_shape[axis];
            if end[axis] - start[axis] != patch {
                return Err(Error::InvalidCropRegion(format!(
                    "location {} has extent {} on axis {}, grid patch size is {}",
                    location,
                    end[axis] - start[axis],
                    axis,
                    patch
                )));
            }
            let last_start = size - patch;
            if start[axis] % stride[axis] != 0 && start[axis] != last_start {
                return Err(Error::InvalidCropRegion(format!(
                    "location {} is not on the grid (stride {} on axis {})",
                    location, stride[axis], axis
                )));
            }

            let half = self.overlap[axis] / 2;
            let lo = if start[axis] == 0 { 0 } else { start[axis] + half };
            let hi = if end[axis] == size {
                size
            } else {
                (start[axis] + stride[axis]).min(last_start) + half
            };
            core[axis] = (lo, hi);
        }
        Ok(core)
    }
}

impl PatchSampler for GridSampler {
    fn patch_shape(&self) -> [usize; 3] {
        self.patch_shape
    }

    /// Grid locations in order, cycled when `count` exceeds the grid size.
    fn locations(
        &self,
        subject: &Subject,
        count: usize,
        _rng: &mut ChaCha8Rng,
    ) -> Result<Vec<PatchLocation>> {
        Ok(self
            .locations_for(subject.spatial_shape())?
            .cycle()
            .take(count)
            .collect())
    }
}

/// Iterator over grid locations.
#[derive(Debug, Clone)]
pub struct GridLocations {
    spatial_shape: [usize; 3],
    patch_shape: [usize; 3],
    stride: [usize; 3],
    counts: [usize; 3],
    front: usize,
    back: usize,
}

impl GridLocations {
    /// Spatial shape being tiled.
    pub fn spatial_shape(&self) -> [usize; 3] {
        self.spatial_shape
    }

    fn location_at(&self, index: usize) -> PatchLocation {
        let [nx, ny, _] = self.counts;
        let indices = [index % nx, (index / nx) % ny, index / (nx * ny)];
        let mut start = [0usize; 3];
        let mut end = [0usize; 3];
        for axis in 0..3 {
            let last_start = self.spatial_shape[axis] - self.patch_shape[axis];
            start[axis] = (indices[axis] * self.stride[axis]).min(last_start);
            end[axis] = start[axis] + self.patch_shape[axis];
        }
        PatchLocation::from_parts(start, end)
    }
}

impl Iterator for GridLocations {
    type Item = PatchLocation;

    fn next(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        let location = self.location_at(self.front);
        self.front += 1;
        Some(location)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.back - self.front;
        (remaining, Some(remaining))
    }
}

impl DoubleEndedIterator for GridLocations {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        self.back -= 1;
        Some(self.location_at(self.back))
    }
}

impl ExactSizeIterator for GridLocations {}
impl FusedIterator for GridLocations {}

/// Iterator over patches cropped at grid locations.
#[derive(Debug, Clone)]
pub struct GridPatches<'a> {
    subject: &'a Subject,
    locations: GridLocations,
}

impl Iterator for GridPatches<'_> {
    type Item = Patch;

    fn next(&mut self) -> Option<Self::Item> {
        self.locations
            .next()
            .map(|location| Patch::extract_unchecked(self.subject, location))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.locations.size_hint()
    }
}

impl ExactSizeIterator for GridPatches<'_> {}
