//! Patch locations and cropped patches.

use std::fmt;

use crate::error::{Error, Result};
use crate::volume::{Subject, Volume};

/// Half-open region `[start, end)` of a volume's index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatchLocation {
    start: [usize; 3],
    end: [usize; 3],
}

impl PatchLocation {
    /// Create a location; every axis must satisfy `start < end`.
    pub fn new(start: [usize; 3], end: [usize; 3]) -> Result<Self> {
        for axis in 0..3 {
            if start[axis] >= end[axis] {
                return Err(Error::InvalidCropRegion(format!(
                    "start[{}]={} must be smaller than end[{}]={}",
                    axis, start[axis], axis, end[axis]
                )));
            }
        }
        Ok(Self { start, end })
    }

    /// Build a location whose `start < end` invariant the caller guarantees.
    pub(crate) const fn from_parts(start: [usize; 3], end: [usize; 3]) -> Self {
        Self { start, end }
    }

    /// Create a location from its start corner and extent.
    pub fn from_start_and_shape(start: [usize; 3], shape: [usize; 3]) -> Result<Self> {
        let mut end = [0usize; 3];
        for axis in 0..3 {
            end[axis] = start[axis].checked_add(shape[axis]).ok_or_else(|| {
                Error::InvalidCropRegion("location end would overflow".to_string())
            })?;
        }
        Self::new(start, end)
    }

    /// First voxel index on each axis.
    pub fn start(&self) -> [usize; 3] {
        self.start
    }

    /// One past the last voxel index on each axis.
    pub fn end(&self) -> [usize; 3] {
        self.end
    }

    /// Extent on each axis.
    pub fn shape(&self) -> [usize; 3] {
        [
            self.end[0] - self.start[0],
            self.end[1] - self.start[1],
            self.end[2] - self.start[2],
        ]
    }

    /// Number of voxels covered.
    pub fn num_voxels(&self) -> usize {
        self.shape().iter().product()
    }

    /// Flat `[x0, y0, z0, x1, y1, z1]` form.
    pub fn to_array(&self) -> [usize; 6] {
        [
            self.start[0],
            self.start[1],
            self.start[2],
            self.end[0],
            self.end[1],
            self.end[2],
        ]
    }

    /// Check that the location lies inside a volume of `spatial_shape`.
    pub fn validate_within(&self, spatial_shape: [usize; 3]) -> Result<()> {
        for axis in 0..3 {
            if self.end[axis] > spatial_shape[axis] {
                return Err(Error::InvalidCropRegion(format!(
                    "location {} exceeds volume shape {:?} on axis {}",
                    self, spatial_shape, axis
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for PatchLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}:{}, {}:{}, {}:{}]",
            self.start[0], self.end[0], self.start[1], self.end[1], self.start[2], self.end[2]
        )
    }
}

/// A subject cropped to a location.
///
/// The cropped subject keeps the source subject's name, so a patch can be
/// traced back to the case it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    subject: Subject,
    location: PatchLocation,
}

impl Patch {
    /// Crop `subject` to `location`.
    pub fn extract(subject: &Subject, location: PatchLocation) -> Result<Self> {
        Ok(Self {
            subject: subject.crop(&location)?,
            location,
        })
    }

    pub(crate) fn extract_unchecked(subject: &Subject, location: PatchLocation) -> Self {
        Self {
            subject: subject.crop_unchecked(&location),
            location,
        }
    }

    /// Location in the source subject.
    pub fn location(&self) -> PatchLocation {
        self.location
    }

    /// Name of the source subject.
    pub fn subject_name(&self) -> &str {
        self.subject.name()
    }

    /// Cropped volumes.
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// Cropped volume by key.
    pub fn get(&self, key: &str) -> Option<&Volume> {
        self.subject.get(key)
    }

    /// Consume the patch.
    pub fn into_parts(self) -> (Subject, PatchLocation) {
        (self.subject, self.location)
    }
}

/// Fixed-size group of patches with their locations.
#[derive(Debug, Clone, Default)]
pub struct PatchBatch {
    /// Patches in emission order.
    pub patches: Vec<Patch>,
    /// `locations[i]` is the location of `patches[i]`.
    pub locations: Vec<PatchLocation>,
}

impl PatchBatch {
    /// Empty batch with room for `capacity` patches.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            patches: Vec::with_capacity(capacity),
            locations: Vec::with_capacity(capacity),
        }
    }

    /// Append a patch.
    pub fn push(&mut self, patch: Patch) {
        self.locations.push(patch.location());
        self.patches.push(patch);
    }

    /// Number of patches.
    pub fn len(&self) -> usize {
        self.patches.len()
    }

    /// Whether the batch holds no patches.
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}
