//! Error types for medpatch.

use thiserror::Error;

/// Result type alias for medpatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while sampling, queueing or aggregating patches.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration (capacities, shapes, overlaps, subject layout).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Patch shape does not fit inside the volume.
    #[error("invalid patch shape: {0}")]
    InvalidPatchShape(String),

    /// Location outside the volume or not on the sampling grid.
    #[error("invalid crop region: {0}")]
    InvalidCropRegion(String),

    /// Array shapes disagree.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Label volume contains only background.
    #[error("no foreground voxels found: {0}")]
    NoForegroundFound(String),

    /// Aggregation finalized before every voxel was written.
    #[error("incomplete coverage: {missing} of {total} voxels were never written")]
    IncompleteCoverage {
        /// Voxels with no contributing patch.
        missing: usize,
        /// Voxels in the output volume.
        total: usize,
    },

    /// Queue accessed after `close()` and drain.
    #[error("patch queue is closed")]
    QueueClosed,

    /// No further patches will be produced (passes consumed or every subject failed).
    #[error("exhausted: {0}")]
    Exhausted(String),

    /// Loader could not decode a volume.
    #[error("unreadable volume format: {0}")]
    UnreadableFormat(String),

    /// Loading, transforming or sampling a subject panicked.
    #[error("producer panicked: {0}")]
    ProducerPanicked(String),

    /// A subject failed to load, transform or sample inside the queue.
    #[error("subject {index} failed: {source}")]
    SubjectFailed {
        /// Index of the subject in its source.
        index: usize,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a consumer loop should stop iterating after this error.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::QueueClosed | Self::Exhausted(_))
    }

    pub(crate) fn subject_failed(index: usize, source: Error) -> Self {
        Self::SubjectFailed {
            index,
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_coverage_message() {
        let err = Error::IncompleteCoverage {
            missing: 3,
            total: 1000,
        };
        assert_eq!(
            err.to_string(),
            "incomplete coverage: 3 of 1000 voxels were never written"
        );
    }

    #[test]
    fn test_subject_failed_keeps_source() {
        let err = Error::subject_failed(2, Error::UnreadableFormat("bad magic".into()));
        assert!(err.to_string().contains("subject 2 failed"));
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("bad magic"));
    }

    #[test]
    fn test_terminal_errors() {
        assert!(Error::QueueClosed.is_terminal());
        assert!(Error::Exhausted("done".into()).is_terminal());
        assert!(!Error::ShapeMismatch("x".into()).is_terminal());
    }
}
