//! Reconstruction of full volumes from grid patch predictions.
//!
//! Every grid location owns a core region (see [`GridSampler`]); the
//! aggregator copies exactly that region out of each prediction. Cores tile
//! the target volume, so no voxel is averaged or written twice.

use ndarray::{s, Array3, Array4};

use crate::error::{Error, Result};
use crate::patch::PatchLocation;
use crate::sampler::{GridSampler, PatchSampler};
use crate::volume::{Subject, Volume, VolumeKind, IDENTITY_AFFINE};

/// Assembles per-patch predictions into one output volume.
#[derive(Debug, Clone)]
pub struct GridAggregator {
    grid: GridSampler,
    target_shape: [usize; 3],
    affine: [[f32; 4]; 4],
    kind: VolumeKind,
    output: Option<Array4<f32>>,
    written: Array3<bool>,
    num_written: usize,
}

impl GridAggregator {
    /// Create an aggregator for a `target_shape` volume tiled by the given grid.
    pub fn new(target_shape: [usize; 3], patch_shape: [usize; 3], overlap: [usize; 3]) -> Result<Self> {
        if target_shape.contains(&0) {
            return Err(Error::InvalidConfiguration(format!(
                "target shape {:?} has a zero dimension",
                target_shape
            )));
        }
        let grid = GridSampler::new(patch_shape, overlap)?;
        grid.len_for(target_shape)?;

        Ok(Self {
            grid,
            target_shape,
            affine: IDENTITY_AFFINE,
            kind: VolumeKind::Intensity,
            output: None,
            written: Array3::from_elem(target_shape, false),
            num_written: 0,
        })
    }

    /// Aggregator matching `subject` and the grid used to crop it.
    ///
    /// The output inherits the affine of the subject's first volume.
    pub fn for_subject(grid: &GridSampler, subject: &Subject) -> Result<Self> {
        let aggregator = Self::new(subject.spatial_shape(), grid.patch_shape(), grid.overlap())?;
        Ok(match subject.iter().next() {
            Some((_, volume)) => aggregator.with_affine(volume.affine()),
            None => aggregator,
        })
    }

    /// Set the affine of the reconstructed volume.
    #[must_use]
    pub fn with_affine(mut self, affine: [[f32; 4]; 4]) -> Self {
        self.affine = affine;
        self
    }

    /// Set the kind of the reconstructed volume.
    #[must_use]
    pub fn with_kind(mut self, kind: VolumeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Spatial shape of the output.
    pub fn target_shape(&self) -> [usize; 3] {
        self.target_shape
    }

    /// Grid this aggregator expects locations from.
    pub fn grid(&self) -> &GridSampler {
        &self.grid
    }

    /// Write the core region of `prediction`, cropped at `location`, into the output.
    ///
    /// The channel count of the output is fixed by the first prediction.
    /// On error nothing is written.
    pub fn add(&mut self, location: PatchLocation, prediction: &Volume) -> Result<()> {
        if prediction.spatial_shape() != location.shape() {
            return Err(Error::ShapeMismatch(format!(
                "prediction shape {:?} does not match location {} of shape {:?}",
                prediction.spatial_shape(),
                location,
                location.shape()
            )));
        }
        if let Some(output) = &self.output {
            let channels = output.shape()[0];
            if prediction.num_channels() != channels {
                return Err(Error::ShapeMismatch(format!(
                    "prediction has {} channels, earlier predictions had {}",
                    prediction.num_channels(),
                    channels
                )));
            }
        }

        let [(x0, x1), (y0, y1), (z0, z1)] = self.grid.core_region(&location, self.target_shape)?;
        let mut mask = self.written.slice_mut(s![x0..x1, y0..y1, z0..z1]);
        if mask.iter().any(|&w| w) {
            return Err(Error::InvalidCropRegion(format!(
                "core region of location {} was already written",
                location
            )));
        }
        mask.fill(true);
        self.num_written += (x1 - x0) * (y1 - y0) * (z1 - z0);

        let [sx, sy, sz] = location.start();
        let [nx, ny, nz] = self.target_shape;
        let output = self
            .output
            .get_or_insert_with(|| Array4::zeros((prediction.num_channels(), nx, ny, nz)));
        output
            .slice_mut(s![.., x0..x1, y0..y1, z0..z1])
            .assign(&prediction.data().slice(s![
                ..,
                x0 - sx..x1 - sx,
                y0 - sy..y1 - sy,
                z0 - sz..z1 - sz
            ]));
        Ok(())
    }

    /// Add predictions in order; `locations[i]` pairs with `predictions[i]`.
    ///
    /// Stops at the first failing pair. Pairs before it stay written.
    pub fn add_batch(&mut self, locations: &[PatchLocation], predictions: &[Volume]) -> Result<()> {
        if locations.len() != predictions.len() {
            return Err(Error::ShapeMismatch(format!(
                "{} locations but {} predictions",
                locations.len(),
                predictions.len()
            )));
        }
        for (location, prediction) in locations.iter().zip(predictions) {
            self.add(*location, prediction)?;
        }
        Ok(())
    }

    /// Fraction of output voxels written so far, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        self.num_written as f64 / self.written.len() as f64
    }

    /// Number of voxels not yet written.
    pub fn missing_voxels(&self) -> usize {
        self.written.len() - self.num_written
    }

    pub fn is_complete(&self) -> bool {
        self.missing_voxels() == 0
    }

    /// Return the assembled volume, or [`Error::IncompleteCoverage`] if any voxel is unwritten.
    pub fn finalize(self) -> Result<Volume> {
        let total = self.written.len();
        let missing = self.missing_voxels();
        match self.output {
            Some(output) if missing == 0 => Volume::new(output, self.affine, self.kind),
            _ => Err(Error::IncompleteCoverage { missing, total }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn ramp(shape: [usize; 3]) -> Volume {
        let data = Array3::from_shape_fn(shape, |(x, y, z)| (x * 10_000 + y * 100 + z) as f32);
        Volume::intensity(data).unwrap()
    }

    fn reconstruct(shape: [usize; 3], patch: [usize; 3], overlap: [usize; 3]) -> Volume {
        let image = ramp(shape);
        let subject = Subject::new("s", [("image", image)]).unwrap();
        let grid = GridSampler::new(patch, overlap).unwrap();
        let mut aggregator = GridAggregator::for_subject(&grid, &subject).unwrap();
        for patch in grid.iter(&subject).unwrap() {
            aggregator
                .add(patch.location(), patch.get("image").unwrap())
                .unwrap();
        }
        assert!(aggregator.is_complete());
        aggregator.finalize().unwrap()
    }

    #[test]
    fn test_round_trip_exact() {
        for (shape, patch, overlap) in [
            ([10, 10, 10], [4, 4, 4], [0, 0, 0]),
            ([13, 11, 7], [6, 5, 3], [2, 1, 0]),
            ([9, 8, 7], [5, 4, 3], [3, 2, 1]),
            ([4, 4, 4], [4, 4, 4], [1, 1, 1]),
        ] {
            let out = reconstruct(shape, patch, overlap);
            assert_eq!(out, ramp(shape), "shape {:?} patch {:?} overlap {:?}", shape, patch, overlap);
        }
    }

    #[test]
    fn test_each_voxel_from_owning_patch() {
        // Predictions carry their patch index so the source of every voxel is visible.
        let shape = [10, 1, 1];
        let grid = GridSampler::new([4, 1, 1], [2, 0, 0]).unwrap();
        let mut aggregator = GridAggregator::new(shape, [4, 1, 1], [2, 0, 0]).unwrap();
        for (i, location) in grid.locations_for(shape).unwrap().enumerate() {
            let prediction = Volume::intensity(Array3::from_elem((4, 1, 1), i as f32)).unwrap();
            aggregator.add(location, &prediction).unwrap();
        }
        let out = aggregator.finalize().unwrap();
        let values: Vec<f32> = out.data().iter().copied().collect();
        // starts 0, 2, 4, 6; cores 0..3, 3..5, 5..7, 7..10
        assert_eq!(values, vec![0., 0., 0., 1., 1., 2., 2., 3., 3., 3.]);
    }

    #[test]
    fn test_incomplete_coverage() {
        let grid = GridSampler::new([2, 2, 2], [0, 0, 0]).unwrap();
        let mut aggregator = GridAggregator::new([4, 4, 4], [2, 2, 2], [0, 0, 0]).unwrap();
        let first = grid.locations_for([4, 4, 4]).unwrap().next().unwrap();
        let prediction = Volume::intensity(Array3::zeros((2, 2, 2))).unwrap();
        aggregator.add(first, &prediction).unwrap();
        assert!((aggregator.progress() - 0.125).abs() < 1e-12);
        assert!(!aggregator.is_complete());
        match aggregator.finalize() {
            Err(Error::IncompleteCoverage { missing, total }) => {
                assert_eq!(missing, 56);
                assert_eq!(total, 64);
            }
            other => panic!("expected IncompleteCoverage, got {:?}", other),
        }
    }

    #[test]
    fn test_nothing_added_is_incomplete() {
        let aggregator = GridAggregator::new([3, 3, 3], [3, 3, 3], [0, 0, 0]).unwrap();
        assert!(matches!(
            aggregator.finalize(),
            Err(Error::IncompleteCoverage { missing: 27, total: 27 })
        ));
    }

    #[test]
    fn test_shape_mismatch_leaves_state_untouched() {
        let mut aggregator = GridAggregator::new([4, 4, 4], [2, 2, 2], [0, 0, 0]).unwrap();
        let location = PatchLocation::new([0, 0, 0], [2, 2, 2]).unwrap();
        let wrong = Volume::intensity(Array3::zeros((3, 2, 2))).unwrap();
        assert!(matches!(
            aggregator.add(location, &wrong),
            Err(Error::ShapeMismatch(_))
        ));
        assert_eq!(aggregator.missing_voxels(), 64);

        let right = Volume::intensity(Array3::ones((2, 2, 2))).unwrap();
        aggregator.add(location, &right).unwrap();
        assert_eq!(aggregator.missing_voxels(), 56);
    }

    #[test]
    fn test_duplicate_and_channel_mismatch_rejected() {
        let mut aggregator = GridAggregator::new([4, 4, 4], [2, 2, 2], [0, 0, 0]).unwrap();
        let location = PatchLocation::new([2, 0, 0], [4, 2, 2]).unwrap();
        let prediction = Volume::intensity(Array3::ones((2, 2, 2))).unwrap();
        aggregator.add(location, &prediction).unwrap();
        assert!(matches!(
            aggregator.add(location, &prediction),
            Err(Error::InvalidCropRegion(_))
        ));

        let two_channels =
            Volume::new(Array4::zeros((2, 2, 2, 2)), IDENTITY_AFFINE, VolumeKind::Intensity).unwrap();
        let other = PatchLocation::new([0, 0, 0], [2, 2, 2]).unwrap();
        assert!(matches!(
            aggregator.add(other, &two_channels),
            Err(Error::ShapeMismatch(_))
        ));
        assert_eq!(aggregator.missing_voxels(), 56);
    }

    #[test]
    fn test_add_batch_length_mismatch() {
        let mut aggregator = GridAggregator::new([4, 4, 4], [2, 2, 2], [0, 0, 0]).unwrap();
        let location = PatchLocation::new([0, 0, 0], [2, 2, 2]).unwrap();
        assert!(matches!(
            aggregator.add_batch(&[location], &[]),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_multichannel_output_keeps_affine_and_kind() {
        let mut affine = IDENTITY_AFFINE;
        affine[0][0] = 2.0;
        let grid = GridSampler::new([3, 3, 3], [1, 1, 1]).unwrap();
        let mut aggregator = GridAggregator::new([5, 5, 5], [3, 3, 3], [1, 1, 1])
            .unwrap()
            .with_affine(affine)
            .with_kind(VolumeKind::Label);
        let locations: Vec<_> = grid.locations_for([5, 5, 5]).unwrap().collect();
        let predictions: Vec<_> = locations
            .iter()
            .map(|_| {
                Volume::new(Array4::ones((3, 3, 3, 3)), IDENTITY_AFFINE, VolumeKind::Intensity)
                    .unwrap()
            })
            .collect();
        aggregator.add_batch(&locations, &predictions).unwrap();
        let out = aggregator.finalize().unwrap();
        assert_eq!(out.num_channels(), 3);
        assert_eq!(out.affine(), affine);
        assert_eq!(out.kind(), VolumeKind::Label);
    }

    #[test]
    fn test_new_rejects_bad_grid() {
        assert!(matches!(
            GridAggregator::new([4, 4, 4], [2, 2, 2], [2, 0, 0]),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(
            GridAggregator::new([4, 4, 4], [5, 2, 2], [0, 0, 0]),
            Err(Error::InvalidPatchShape(_))
        ));
        assert!(GridAggregator::new([0, 4, 4], [2, 2, 2], [0, 0, 0]).is_err());
    }
}
