//! Label-constrained random patch sampling.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use super::uniform::UniformSampler;
use super::{max_starts, validate_patch_config, PatchSampler};
use crate::error::{Error, Result};
use crate::patch::PatchLocation;
use crate::volume::{Subject, Volume};

/// Behaviour when the label volume holds no foreground voxel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoForegroundPolicy {
    /// Fail with [`Error::NoForegroundFound`].
    #[default]
    Error,
    /// Sample uniformly instead.
    Uniform,
}

/// Centres each patch on a uniformly chosen foreground voxel.
///
/// A voxel is foreground when any channel of the label volume is non-zero.
/// Patches are clamped to stay inside the volume, so a centre near the border
/// ends up off-centre but always inside the patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSampler {
    patch_shape: [usize; 3],
    label_key: Option<String>,
    on_empty: NoForegroundPolicy,
}

impl LabelSampler {
    /// Create a label sampler using the subject's first label volume.
    pub fn new(patch_shape: [usize; 3]) -> Result<Self> {
        validate_patch_config(patch_shape)?;
        Ok(Self {
            patch_shape,
            label_key: None,
            on_empty: NoForegroundPolicy::default(),
        })
    }

    /// Use the volume stored under `key` as the label map.
    #[must_use]
    pub fn label_key(mut self, key: impl Into<String>) -> Self {
        self.label_key = Some(key.into());
        self
    }

    /// Set the policy for all-background label maps.
    #[must_use]
    pub fn on_empty(mut self, policy: NoForegroundPolicy) -> Self {
        self.on_empty = policy;
        self
    }

    /// Coordinates of every foreground voxel, in row-major order.
    pub fn foreground_voxels(label: &Volume) -> Vec<[usize; 3]> {
        let data = label.data();
        let channels = label.num_channels();
        let [_, ny, nz] = label.spatial_shape();

        (0..label.num_voxels())
            .into_par_iter()
            .filter_map(|flat| {
                let x = flat / (ny * nz);
                let y = (flat / nz) % ny;
                let z = flat % nz;
                (0..channels)
                    .any(|c| data[[c, x, y, z]] != 0.0)
                    .then_some([x, y, z])
            })
            .collect()
    }

    fn centred_on(&self, centre: [usize; 3], max_start: [usize; 3]) -> Result<PatchLocation> {
        let mut start = [0usize; 3];
        for axis in 0..3 {
            start[axis] = centre[axis]
                .saturating_sub(self.patch_shape[axis] / 2)
                .min(max_start[axis]);
        }
        PatchLocation::from_start_and_shape(start, self.patch_shape)
    }
}

impl PatchSampler for LabelSampler {
    fn patch_shape(&self) -> [usize; 3] {
        self.patch_shape
    }

    fn locations(
        &self,
        subject: &Subject,
        count: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<Vec<PatchLocation>> {
        let max_start = max_starts(subject.spatial_shape(), self.patch_shape)?;
        let (key, label) = subject.label_volume(self.label_key.as_deref())?;
        let foreground = Self::foreground_voxels(label);

        if foreground.is_empty() {
            return match self.on_empty {
                NoForegroundPolicy::Error => Err(Error::NoForegroundFound(format!(
                    "label volume '{}' of subject '{}' is entirely background",
                    key,
                    subject.name()
                ))),
                NoForegroundPolicy::Uniform => {
                    tracing::debug!(
                        subject = subject.name(),
                        label = key,
                        "no foreground voxels, falling back to uniform sampling"
                    );
                    UniformSampler::new(self.patch_shape)?.locations_for(
                        subject.spatial_shape(),
                        count,
                        rng,
                    )
                }
            };
        }

        (0..count)
            .map(|_| {
                let centre = foreground[rng.gen_range(0..foreground.len())];
                self.centred_on(centre, max_start)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::get_rng;
    use crate::volume::{VolumeKind, IDENTITY_AFFINE};
    use ndarray::{Array3, Array4};

    fn subject_with_label(label: Array3<f32>) -> Subject {
        let image = Volume::intensity(Array3::ones(label.raw_dim())).unwrap();
        let label = Volume::from_array3(label, IDENTITY_AFFINE, VolumeKind::Label).unwrap();
        Subject::new("case", [("image", image), ("label", label)]).unwrap()
    }

    #[test]
    fn test_all_background_fails() {
        let subject = subject_with_label(Array3::zeros((10, 10, 10)));
        let sampler = LabelSampler::new([4, 4, 4]).unwrap();
        let result = sampler.locations(&subject, 1, &mut get_rng(Some(0)));
        assert!(matches!(result, Err(Error::NoForegroundFound(_))));
    }

    #[test]
    fn test_all_background_uniform_fallback() {
        let subject = subject_with_label(Array3::zeros((10, 10, 10)));
        let sampler = LabelSampler::new([4, 4, 4])
            .unwrap()
            .on_empty(NoForegroundPolicy::Uniform);
        let locations = sampler
            .locations(&subject, 5, &mut get_rng(Some(0)))
            .unwrap();
        assert_eq!(locations.len(), 5);
        for loc in locations {
            assert!(loc.validate_within([10, 10, 10]).is_ok());
        }
    }

    #[test]
    fn test_patches_contain_foreground() {
        let mut label = Array3::zeros((12, 12, 12));
        label[[0, 0, 0]] = 1.0;
        label[[11, 6, 3]] = 2.0;
        label[[5, 5, 5]] = 1.0;
        let subject = subject_with_label(label);
        let sampler = LabelSampler::new([4, 4, 4]).unwrap();
        let patches = sampler
            .sample(&subject, 50, &mut get_rng(Some(11)))
            .unwrap();

        for patch in patches {
            let loc = patch.location();
            assert!(loc.validate_within([12, 12, 12]).is_ok());
            let cropped = patch.get("label").unwrap();
            assert!(cropped.data().iter().any(|&v| v != 0.0), "patch {} has no foreground", loc);
        }
    }

    #[test]
    fn test_foreground_voxels_any_channel() {
        let mut data = Array4::zeros((2, 3, 3, 3));
        data[[1, 2, 1, 0]] = 1.0;
        data[[0, 0, 0, 2]] = 5.0;
        let label = Volume::new(data, IDENTITY_AFFINE, VolumeKind::Label).unwrap();
        assert_eq!(
            LabelSampler::foreground_voxels(&label),
            vec![[0, 0, 2], [2, 1, 0]]
        );
    }

    #[test]
    fn test_named_label_key() {
        let mut label = Array3::zeros((6, 6, 6));
        label[[3, 3, 3]] = 1.0;
        let subject = subject_with_label(label);
        let missing = LabelSampler::new([2, 2, 2]).unwrap().label_key("nope");
        assert!(matches!(
            missing.locations(&subject, 1, &mut get_rng(Some(0))),
            Err(Error::InvalidConfiguration(_))
        ));

        let named = LabelSampler::new([2, 2, 2]).unwrap().label_key("label");
        let loc = named.locations(&subject, 1, &mut get_rng(Some(0))).unwrap()[0];
        assert_eq!(loc.start(), [2, 2, 2]);
    }
}
