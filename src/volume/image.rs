//! Dense voxel volume with spatial metadata.

use std::sync::Arc;

use ndarray::{s, Array3, Array4, ArrayView4, Axis};

use crate::error::{Error, Result};
use crate::patch::PatchLocation;

/// Identity voxel-to-world mapping.
pub const IDENTITY_AFFINE: [[f32; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Semantic kind of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VolumeKind {
    /// Continuous intensities (scans, probability maps)
    #[default]
    Intensity,
    /// Discrete label map (segmentations)
    Label,
}

impl VolumeKind {
    /// Short lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Intensity => "intensity",
            Self::Label => "label",
        }
    }
}

/// A channel-first `[C, X, Y, Z]` volume of `f32` samples.
///
/// Voxel data is shared behind an [`Arc`], so cloning a volume (or the
/// [`Subject`](crate::Subject) that owns it) never copies voxels. Volumes are
/// read-only once constructed: cropping and aggregation always allocate a
/// new array.
#[derive(Debug, Clone)]
pub struct Volume {
    data: Arc<Array4<f32>>,
    affine: [[f32; 4]; 4],
    kind: VolumeKind,
}

impl Volume {
    /// Create a volume from a channel-first 4D array.
    pub fn new(data: Array4<f32>, affine: [[f32; 4]; 4], kind: VolumeKind) -> Result<Self> {
        if data.shape().contains(&0) {
            return Err(Error::InvalidConfiguration(format!(
                "volume dimensions must be positive (got {:?})",
                data.shape()
            )));
        }
        if affine.iter().flatten().any(|v| !v.is_finite()) {
            return Err(Error::InvalidConfiguration(
                "affine must contain only finite values".to_string(),
            ));
        }
        Ok(Self {
            data: Arc::new(data),
            affine,
            kind,
        })
    }

    /// Create a single-channel volume from a 3D array.
    pub fn from_array3(data: Array3<f32>, affine: [[f32; 4]; 4], kind: VolumeKind) -> Result<Self> {
        Self::new(data.insert_axis(Axis(0)), affine, kind)
    }

    /// Single-channel intensity volume with an identity affine.
    pub fn intensity(data: Array3<f32>) -> Result<Self> {
        Self::from_array3(data, IDENTITY_AFFINE, VolumeKind::Intensity)
    }

    /// Single-channel label volume with an identity affine.
    pub fn label(data: Array3<f32>) -> Result<Self> {
        Self::from_array3(data, IDENTITY_AFFINE, VolumeKind::Label)
    }

    /// Replace the affine.
    #[must_use]
    pub fn with_affine(mut self, affine: [[f32; 4]; 4]) -> Self {
        self.affine = affine;
        self
    }

    /// Voxel data as `[C, X, Y, Z]`.
    pub fn data(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    /// Shared handle to the voxel data.
    pub fn shared_data(&self) -> &Arc<Array4<f32>> {
        &self.data
    }

    /// Number of channels.
    pub fn num_channels(&self) -> usize {
        self.data.shape()[0]
    }

    /// Spatial shape `[X, Y, Z]`.
    pub fn spatial_shape(&self) -> [usize; 3] {
        let shape = self.data.shape();
        [shape[1], shape[2], shape[3]]
    }

    /// Number of spatial voxels (channels excluded).
    pub fn num_voxels(&self) -> usize {
        self.spatial_shape().iter().product()
    }

    /// Size of the voxel data in bytes.
    pub fn nbytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// Semantic kind.
    pub fn kind(&self) -> VolumeKind {
        self.kind
    }

    /// 4x4 voxel-to-world affine.
    pub fn affine(&self) -> [[f32; 4]; 4] {
        self.affine
    }

    /// Voxel spacing, the norms of the affine's first three columns.
    pub fn spacing(&self) -> [f32; 3] {
        let mut spacing = [0.0f32; 3];
        for (axis, value) in spacing.iter_mut().enumerate() {
            *value = (0..3)
                .map(|row| self.affine[row][axis] * self.affine[row][axis])
                .sum::<f32>()
                .sqrt();
        }
        spacing
    }

    /// World coordinates of voxel `[0, 0, 0]`.
    pub fn origin(&self) -> [f32; 3] {
        [self.affine[0][3], self.affine[1][3], self.affine[2][3]]
    }

    /// Copy out the region covered by `location`.
    pub fn crop(&self, location: &PatchLocation) -> Result<Self> {
        location.validate_within(self.spatial_shape())?;
        Ok(self.crop_unchecked(location))
    }

    /// Crop a location already validated against this volume's shape.
    pub(crate) fn crop_unchecked(&self, location: &PatchLocation) -> Self {
        let [x0, y0, z0] = location.start();
        let [x1, y1, z1] = location.end();
        let cropped = self.data.slice(s![.., x0..x1, y0..y1, z0..z1]).to_owned();

        // Shift the origin so world coordinates of the cropped voxels are unchanged.
        let mut affine = self.affine;
        let start = location.start();
        for (row, affine_row) in affine.iter_mut().take(3).enumerate() {
            affine_row[3] = self.affine[row][3]
                + (0..3)
                    .map(|axis| self.affine[row][axis] * start[axis] as f32)
                    .sum::<f32>();
        }

        Self {
            data: Arc::new(cropped),
            affine,
            kind: self.kind,
        }
    }
}

impl PartialEq for Volume {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.affine == other.affine && self.data == other.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(shape: [usize; 3]) -> Array3<f32> {
        let n: usize = shape.iter().product();
        Array3::from_shape_vec(shape, (0..n).map(|i| i as f32).collect()).unwrap()
    }

    #[test]
    fn test_from_array3_adds_channel_axis() {
        let vol = Volume::intensity(ramp([4, 5, 6])).unwrap();
        assert_eq!(vol.num_channels(), 1);
        assert_eq!(vol.spatial_shape(), [4, 5, 6]);
        assert_eq!(vol.num_voxels(), 120);
        assert_eq!(vol.nbytes(), 480);
        assert_eq!(vol.kind(), VolumeKind::Intensity);
    }

    #[test]
    fn test_rejects_zero_dimension() {
        let data = Array4::<f32>::zeros((1, 0, 4, 4));
        let result = Volume::new(data, IDENTITY_AFFINE, VolumeKind::Intensity);
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_rejects_non_finite_affine() {
        let mut affine = IDENTITY_AFFINE;
        affine[0][3] = f32::NAN;
        let result = Volume::from_array3(ramp([2, 2, 2]), affine, VolumeKind::Label);
        assert!(result.is_err());
    }

    #[test]
    fn test_spacing_and_origin() {
        let affine = [
            [2.0, 0.0, 0.0, -10.0],
            [0.0, 0.5, 0.0, 4.0],
            [0.0, 0.0, 3.0, 1.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        let vol = Volume::intensity(ramp([2, 2, 2])).unwrap().with_affine(affine);
        assert_eq!(vol.spacing(), [2.0, 0.5, 3.0]);
        assert_eq!(vol.origin(), [-10.0, 4.0, 1.0]);
    }

    #[test]
    fn test_crop_copies_region_and_shifts_origin() {
        let affine = [
            [2.0, 0.0, 0.0, -10.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 5.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        let data = ramp([6, 6, 6]);
        let vol = Volume::intensity(data.clone()).unwrap().with_affine(affine);
        let loc = PatchLocation::new([1, 2, 3], [4, 6, 5]).unwrap();

        let cropped = vol.crop(&loc).unwrap();
        assert_eq!(cropped.spatial_shape(), [3, 4, 2]);
        assert_eq!(cropped.data()[[0, 0, 0, 0]], data[[1, 2, 3]]);
        assert_eq!(cropped.data()[[0, 2, 3, 1]], data[[3, 5, 4]]);
        assert_eq!(cropped.origin(), [-8.0, 2.0, 8.0]);
        assert_eq!(cropped.spacing(), vol.spacing());
    }

    #[test]
    fn test_crop_out_of_bounds() {
        let vol = Volume::label(ramp([4, 4, 4])).unwrap();
        let loc = PatchLocation::new([0, 0, 0], [5, 4, 4]).unwrap();
        assert!(matches!(vol.crop(&loc), Err(Error::InvalidCropRegion(_))));
    }

    #[test]
    fn test_clone_shares_voxels() {
        let vol = Volume::intensity(ramp([3, 3, 3])).unwrap();
        let copy = vol.clone();
        assert!(Arc::ptr_eq(vol.shared_data(), copy.shared_data()));
        assert_eq!(vol, copy);
    }
}
