//! Subject sources feeding the patch queue.
//!
//! A [`SubjectSource`] hands out subjects by index. Sources are shared by
//! every producer thread, so loading happens lazily and concurrently.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::transforms::Transform;
use crate::volume::{Subject, Volume, VolumeKind};

/// Decodes one volume from disk.
///
/// Decoding failures are reported as [`Error::UnreadableFormat`] or [`Error::Io`].
pub trait VolumeLoader: Send + Sync {
    fn load(&self, path: &Path, kind: VolumeKind) -> Result<Volume>;
}

impl<F> VolumeLoader for F
where
    F: Fn(&Path, VolumeKind) -> Result<Volume> + Send + Sync,
{
    fn load(&self, path: &Path, kind: VolumeKind) -> Result<Volume> {
        self(path, kind)
    }
}

/// Indexed, fallible access to subjects.
pub trait SubjectSource: Send + Sync {
    /// Number of subjects.
    fn len(&self) -> usize;

    /// Whether the source holds no subjects.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load subject `index`.
    fn subject(&self, index: usize) -> Result<Subject>;
}

impl SubjectSource for Vec<Subject> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn subject(&self, index: usize) -> Result<Subject> {
        self.get(index).cloned().ok_or_else(|| out_of_range(index, self.as_slice().len()))
    }
}

impl<S: SubjectSource + ?Sized> SubjectSource for Arc<S> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn subject(&self, index: usize) -> Result<Subject> {
        (**self).subject(index)
    }
}

fn out_of_range(index: usize, len: usize) -> Error {
    Error::InvalidConfiguration(format!(
        "subject index {} out of range for {} subjects",
        index, len
    ))
}

/// One file of a subject: where it lives, the key it is stored under and its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileConfig {
    pub path: PathBuf,
    pub key: String,
    pub kind: VolumeKind,
}

impl FileConfig {
    /// Intensity image stored under key `"image"`.
    pub fn image<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            key: "image".to_string(),
            kind: VolumeKind::Intensity,
        }
    }

    /// Label map stored under key `"label"`.
    pub fn label<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            key: "label".to_string(),
            kind: VolumeKind::Label,
        }
    }

    /// Store the volume under a different key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

/// Subjects described by file lists, decoded on demand by a [`VolumeLoader`].
pub struct FileSubjects<L> {
    loader: L,
    subjects: Vec<(String, Vec<FileConfig>)>,
}

impl<L: VolumeLoader> FileSubjects<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            subjects: Vec::new(),
        }
    }

    /// Register a subject made of `files`.
    ///
    /// Files must be non-empty and use distinct keys. Shapes are only
    /// checked when the subject is loaded.
    pub fn add_subject(mut self, name: impl Into<String>, files: Vec<FileConfig>) -> Result<Self> {
        let name = name.into();
        if files.is_empty() {
            return Err(Error::InvalidConfiguration(format!(
                "subject '{}' has no files",
                name
            )));
        }
        for (i, file) in files.iter().enumerate() {
            if files[..i].iter().any(|other| other.key == file.key) {
                return Err(Error::InvalidConfiguration(format!(
                    "subject '{}' uses key '{}' twice",
                    name, file.key
                )));
            }
        }
        self.subjects.push((name, files));
        Ok(self)
    }

    /// Name of subject `index`.
    pub fn name(&self, index: usize) -> Option<&str> {
        self.subjects.get(index).map(|(name, _)| name.as_str())
    }
}

impl<L: VolumeLoader> SubjectSource for FileSubjects<L> {
    fn len(&self) -> usize {
        self.subjects.len()
    }

    fn subject(&self, index: usize) -> Result<Subject> {
        let (name, files) = self
            .subjects
            .get(index)
            .ok_or_else(|| out_of_range(index, self.subjects.len()))?;

        tracing::debug!(subject = name.as_str(), files = files.len(), "loading subject");
        let volumes = files
            .iter()
            .map(|file| Ok((file.key.clone(), self.loader.load(&file.path, file.kind)?)))
            .collect::<Result<Vec<_>>>()?;
        Subject::new(name.clone(), volumes)
    }
}

/// A source whose subjects pass through a transform when loaded.
pub struct Transformed<S, T> {
    source: S,
    transform: T,
}

impl<S: SubjectSource, T: Transform> Transformed<S, T> {
    pub fn new(source: S, transform: T) -> Self {
        Self { source, transform }
    }

    /// Wrapped source.
    pub fn inner(&self) -> &S {
        &self.source
    }
}

impl<S: SubjectSource, T: Transform> SubjectSource for Transformed<S, T> {
    fn len(&self) -> usize {
        self.source.len()
    }

    fn subject(&self, index: usize) -> Result<Subject> {
        self.transform.apply(self.source.subject(index)?)
    }
}
