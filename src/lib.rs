//! Patch-based sampling for 3D medical volumes.
//!
//! Training feeds a [`PatchQueue`]: producer threads pull [`Subject`]s from a
//! [`SubjectSource`], crop them with a [`PatchSampler`] and keep a bounded
//! buffer of [`Patch`]es ready for the training loop.
//!
//! Inference tiles a subject with a [`GridSampler`], runs each patch through a
//! model, and reassembles the predictions with a [`GridAggregator`]. Every
//! output voxel is copied from exactly one patch.
//!
//! ```ignore
//! use medpatch::{GridAggregator, GridSampler};
//!
//! let grid = GridSampler::new([96, 96, 96], [16, 16, 16])?;
//! let mut aggregator = GridAggregator::for_subject(&grid, &subject)?;
//! for patch in grid.iter(&subject)? {
//!     let prediction = model(&patch)?;
//!     aggregator.add(patch.location(), &prediction)?;
//! }
//! let segmentation = aggregator.finalize()?;
//! ```

pub mod aggregator;
pub mod dataset;
pub mod error;
pub mod patch;
pub mod queue;
pub mod sampler;
pub mod transforms;
pub mod volume;

#[cfg(feature = "python")]
mod python;

pub use aggregator::GridAggregator;
pub use dataset::{FileConfig, FileSubjects, SubjectSource, Transformed, VolumeLoader};
pub use error::{Error, Result};
pub use patch::{Patch, PatchBatch, PatchLocation};
pub use queue::{Batches, FailurePolicy, PatchQueue, QueueConfig, QueueStats};
pub use sampler::{
    GridLocations, GridPatches, GridSampler, LabelSampler, NoForegroundPolicy, PatchSampler,
    SamplerKind, UniformSampler,
};
pub use transforms::{Compose, PerVolume, Transform};
pub use volume::{Subject, Volume, VolumeKind, IDENTITY_AFFINE};
