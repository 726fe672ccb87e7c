//! Patch queue configuration.

use crate::error::{Error, Result};

/// What the queue does when loading or sampling a subject fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log the failure and move on to the next subject.
    #[default]
    Skip,
    /// Stop producing and report the failure once buffered patches are drained.
    Abort,
}

/// Configuration for a [`PatchQueue`](super::PatchQueue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of buffered patches
    pub capacity: usize,
    /// Patches drawn from each subject per pass
    pub samples_per_volume: usize,
    /// Producer threads; 0 produces on the consumer thread
    pub num_workers: usize,
    /// Reshuffle the subject order at the start of every pass
    pub shuffle_subjects: bool,
    /// Shuffle the patches drawn from one subject before buffering them.
    /// Patches are not mixed across subjects: each subject's patches stay
    /// contiguous in the stream, in pool order
    pub shuffle_patches: bool,
    /// Seed for every random stream the queue owns
    pub seed: Option<u64>,
    /// Reaction to failing subjects
    pub failure_policy: FailurePolicy,
    /// Stop after this many passes over the subjects
    pub max_passes: Option<usize>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            samples_per_volume: 4,
            num_workers: rayon::current_num_threads().max(1),
            shuffle_subjects: true,
            shuffle_patches: true,
            seed: None,
            failure_policy: FailurePolicy::Skip,
            max_passes: None,
        }
    }
}

impl QueueConfig {
    /// Default configuration with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Set the buffer capacity.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set patches per subject per pass.
    pub fn samples_per_volume(mut self, n: usize) -> Self {
        self.samples_per_volume = n;
        self
    }

    /// Set the number of producer threads (0 = produce synchronously).
    pub fn workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    /// Enable or disable both subject and patch shuffling.
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle_subjects = shuffle;
        self.shuffle_patches = shuffle;
        self
    }

    pub fn shuffle_subjects(mut self, shuffle: bool) -> Self {
        self.shuffle_subjects = shuffle;
        self
    }

    pub fn shuffle_patches(mut self, shuffle: bool) -> Self {
        self.shuffle_patches = shuffle;
        self
    }

    /// Set random seed for reproducibility.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Limit production to `passes` full passes over the subjects.
    pub fn max_passes(mut self, passes: usize) -> Self {
        self.max_passes = Some(passes);
        self
    }

    /// Check the configuration for values the queue cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::InvalidConfiguration(
                "capacity must be positive".to_string(),
            ));
        }
        if self.samples_per_volume == 0 {
            return Err(Error::InvalidConfiguration(
                "samples_per_volume must be positive".to_string(),
            ));
        }
        if self.capacity < self.samples_per_volume {
            return Err(Error::InvalidConfiguration(format!(
                "capacity ({}) must be at least samples_per_volume ({})",
                self.capacity, self.samples_per_volume
            )));
        }
        if self.max_passes == Some(0) {
            return Err(Error::InvalidConfiguration(
                "max_passes must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Seed for sampling subject `index` during pass `pass` (1-based).
    pub(crate) fn unit_seed(&self, pass: usize, index: usize) -> Option<u64> {
        self.seed.map(|seed| {
            let unit = ((pass as u64) << 32) ^ index as u64;
            seed ^ unit.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        })
    }
}
