//! Subject transforms applied between loading and sampling.
//!
//! Any `Fn(Subject) -> Result<Subject>` closure is a [`Transform`]. The
//! numeric work on voxels lives in the caller's `Volume -> Volume`
//! functions; [`PerVolume`] lifts such a function to a whole subject.

use crate::error::Result;
use crate::volume::{Subject, Volume, VolumeKind};

/// A pure step producing a new subject from an old one.
pub trait Transform: Send + Sync {
    fn apply(&self, subject: Subject) -> Result<Subject>;
}

impl<F> Transform for F
where
    F: Fn(Subject) -> Result<Subject> + Send + Sync,
{
    fn apply(&self, subject: Subject) -> Result<Subject> {
        self(subject)
    }
}

/// Transforms applied in insertion order.
#[derive(Default)]
pub struct Compose {
    steps: Vec<Box<dyn Transform>>,
}

impl Compose {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    #[must_use]
    pub fn then<T: Transform + 'static>(mut self, transform: T) -> Self {
        self.steps.push(Box::new(transform));
        self
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Transform for Compose {
    fn apply(&self, subject: Subject) -> Result<Subject> {
        self.steps
            .iter()
            .try_fold(subject, |subject, step| step.apply(subject))
    }
}

/// Applies a volume function to every volume of one kind, or to all volumes.
///
/// The rebuilt subject goes through [`Subject::new`], so a function that
/// changes spatial shapes inconsistently is reported as an error.
pub struct PerVolume<F> {
    func: F,
    kind: Option<VolumeKind>,
}

impl<F> PerVolume<F>
where
    F: Fn(Volume) -> Result<Volume> + Send + Sync,
{
    /// Apply `func` to every volume.
    pub fn all(func: F) -> Self {
        Self { func, kind: None }
    }

    /// Apply `func` only to volumes of `kind`.
    pub fn only(kind: VolumeKind, func: F) -> Self {
        Self {
            func,
            kind: Some(kind),
        }
    }
}

impl<F> Transform for PerVolume<F>
where
    F: Fn(Volume) -> Result<Volume> + Send + Sync,
{
    fn apply(&self, subject: Subject) -> Result<Subject> {
        let name = subject.name().to_string();
        let volumes = subject
            .into_volumes()
            .into_iter()
            .map(|(key, volume)| {
                let volume = match self.kind {
                    Some(kind) if volume.kind() != kind => volume,
                    _ => (self.func)(volume)?,
                };
                Ok((key, volume))
            })
            .collect::<Result<Vec<_>>>()?;
        Subject::new(name, volumes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use ndarray::Array3;

    fn subject() -> Subject {
        let image = Volume::intensity(Array3::from_elem((4, 4, 4), 2.0)).unwrap();
        let label = Volume::label(Array3::from_elem((4, 4, 4), 1.0)).unwrap();
        Subject::new("s", [("image", image), ("label", label)]).unwrap()
    }

    fn scale(factor: f32) -> impl Fn(Volume) -> Result<Volume> + Send + Sync {
        move |volume: Volume| {
            let data = volume.data().mapv(|v| v * factor);
            Volume::new(data, volume.affine(), volume.kind())
        }
    }

    #[test]
    fn test_compose_runs_in_order() {
        let add_suffix = |s: Subject| Subject::new(format!("{}-1", s.name()), s.into_volumes());
        let add_other = |s: Subject| Subject::new(format!("{}-2", s.name()), s.into_volumes());
        let compose = Compose::new().then(add_suffix).then(add_other);
        assert_eq!(compose.len(), 2);
        assert_eq!(compose.apply(subject()).unwrap().name(), "s-1-2");
        assert!(Compose::new().is_empty());
    }

    #[test]
    fn test_per_volume_respects_kind() {
        let transform = PerVolume::only(VolumeKind::Intensity, scale(3.0));
        let out = transform.apply(subject()).unwrap();
        assert_eq!(out.get("image").unwrap().data()[[0, 1, 2, 3]], 6.0);
        assert_eq!(out.get("label").unwrap().data()[[0, 1, 2, 3]], 1.0);

        let out = PerVolume::all(scale(2.0)).apply(subject()).unwrap();
        assert_eq!(out.get("label").unwrap().data()[[0, 0, 0, 0]], 2.0);
    }

    #[test]
    fn test_shape_changing_transform_rejected() {
        let crop_images = PerVolume::only(VolumeKind::Intensity, |volume: Volume| {
            let location = crate::patch::PatchLocation::new([0, 0, 0], [2, 2, 2])?;
            volume.crop(&location)
        });
        assert!(matches!(
            crop_images.apply(subject()),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_error_short_circuits() {
        let fail = |_: Subject| -> Result<Subject> { Err(Error::UnreadableFormat("bad".into())) };
        let never = |_: Subject| -> Result<Subject> { panic!("must not run") };
        let compose = Compose::new().then(fail).then(never);
        assert!(compose.apply(subject()).is_err());
    }
}
