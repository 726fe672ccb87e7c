//! Named collection of co-registered volumes.

use std::collections::BTreeMap;

use super::image::{Volume, VolumeKind};
use crate::error::{Error, Result};
use crate::patch::PatchLocation;

/// One case: several volumes (modalities, label maps) sharing a spatial grid.
///
/// All volumes must have the same spatial shape; channel counts may differ.
/// Volumes are kept ordered by key so iteration is reproducible.
#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    name: String,
    volumes: BTreeMap<String, Volume>,
    spatial_shape: [usize; 3],
}

impl Subject {
    /// Create a subject, checking that every volume shares one spatial shape.
    pub fn new<N, I, K>(name: N, volumes: I) -> Result<Self>
    where
        N: Into<String>,
        I: IntoIterator<Item = (K, Volume)>,
        K: Into<String>,
    {
        let name = name.into();
        let mut map = BTreeMap::new();
        let mut spatial_shape: Option<[usize; 3]> = None;

        for (key, volume) in volumes {
            let key = key.into();
            let shape = volume.spatial_shape();
            match spatial_shape {
                None => spatial_shape = Some(shape),
                Some(expected) if expected != shape => {
                    return Err(Error::InvalidConfiguration(format!(
                        "subject '{}': volume '{}' has spatial shape {:?}, expected {:?}",
                        name, key, shape, expected
                    )));
                }
                Some(_) => {}
            }
            if map.insert(key.clone(), volume).is_some() {
                return Err(Error::InvalidConfiguration(format!(
                    "subject '{}': duplicate volume key '{}'",
                    name, key
                )));
            }
        }

        let spatial_shape = spatial_shape.ok_or_else(|| {
            Error::InvalidConfiguration(format!("subject '{}' has no volumes", name))
        })?;

        Ok(Self {
            name,
            volumes: map,
            spatial_shape,
        })
    }

    /// Subject name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spatial shape shared by all volumes.
    pub fn spatial_shape(&self) -> [usize; 3] {
        self.spatial_shape
    }

    /// Number of volumes.
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    /// Always false; a subject holds at least one volume.
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Look up a volume by key.
    pub fn get(&self, key: &str) -> Option<&Volume> {
        self.volumes.get(key)
    }

    /// Volume keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.volumes.keys().map(String::as_str)
    }

    /// `(key, volume)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Volume)> {
        self.volumes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Consume the subject, returning its volumes.
    pub fn into_volumes(self) -> BTreeMap<String, Volume> {
        self.volumes
    }

    /// Label volume by key, or the first label-kind volume when `key` is `None`.
    pub fn label_volume(&self, key: Option<&str>) -> Result<(&str, &Volume)> {
        match key {
            Some(key) => self
                .volumes
                .get_key_value(key)
                .map(|(k, v)| (k.as_str(), v))
                .ok_or_else(|| {
                    Error::InvalidConfiguration(format!(
                        "subject '{}' has no volume named '{}'",
                        self.name, key
                    ))
                }),
            None => self
                .iter()
                .find(|(_, v)| v.kind() == VolumeKind::Label)
                .ok_or_else(|| {
                    Error::InvalidConfiguration(format!(
                        "subject '{}' has no label volume",
                        self.name
                    ))
                }),
        }
    }

    /// Crop every volume to `location`.
    pub fn crop(&self, location: &PatchLocation) -> Result<Self> {
        location.validate_within(self.spatial_shape)?;
        Ok(self.crop_unchecked(location))
    }

    pub(crate) fn crop_unchecked(&self, location: &PatchLocation) -> Self {
        Self {
            name: self.name.clone(),
            volumes: self
                .volumes
                .iter()
                .map(|(k, v)| (k.clone(), v.crop_unchecked(location)))
                .collect(),
            spatial_shape: location.shape(),
        }
    }
}
