//! Volumes and subjects.
//!
//! A [`Volume`] is a channel-first voxel array with an affine and a semantic
//! kind; a [`Subject`] groups co-registered volumes of one case.

pub(crate) mod image;
pub(crate) mod subject;

pub use image::{Volume, VolumeKind, IDENTITY_AFFINE};
pub use subject::Subject;
