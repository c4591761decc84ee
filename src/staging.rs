//! Staging directories for file-bearing transfers.
//!
//! An engine claims a staging directory when a transfer carries files and
//! owns it until the host reports the copy finished. On failure or
//! cancellation the engine removes it again.

use std::fs::DirBuilder;
use std::os::unix::fs::{DirBuilderExt, MetadataExt};
use std::path::{Path, PathBuf};

/// Staging errors.
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("failed to create staging directory {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to remove staging directory {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Filesystem primitives the engines need for staging.
pub trait StagingArea: Send {
    /// Return a usable staging directory.
    ///
    /// A `suggested` path is reused when it is an existing directory owned
    /// by the current user; otherwise a fresh directory is created.
    fn create_or_validate(&mut self, suggested: Option<&Path>) -> Result<PathBuf, StagingError>;

    /// Recursively delete a staging directory and its contents.
    fn remove(&mut self, path: &Path) -> Result<(), StagingError>;
}

/// Staging under a local root, one `uuid`-named directory per cycle.
#[derive(Debug, Clone)]
pub struct LocalStaging {
    root: PathBuf,
}

impl LocalStaging {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default root: `<tmp>/dndcp-staging`.
    pub fn default_root() -> PathBuf {
        std::env::temp_dir().join("dndcp-staging")
    }
}

impl StagingArea for LocalStaging {
    fn create_or_validate(&mut self, suggested: Option<&Path>) -> Result<PathBuf, StagingError> {
        if let Some(path) = suggested {
            if is_owned_dir(path) {
                return Ok(path.to_path_buf());
            }
            tracing::debug!(path = %path.display(), "suggested staging path rejected");
        }

        std::fs::create_dir_all(&self.root).map_err(|source| StagingError::Create {
            path: self.root.clone(),
            source,
        })?;

        let path = self.root.join(uuid::Uuid::new_v4().to_string());
        DirBuilder::new()
            .mode(0o700)
            .create(&path)
            .map_err(|source| StagingError::Create {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(path = %path.display(), "staging directory created");
        Ok(path)
    }

    fn remove(&mut self, path: &Path) -> Result<(), StagingError> {
        match std::fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            // Already gone counts as removed.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StagingError::Remove {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// The staging directory an engine currently owns, if any.
pub struct StagingSlot {
    area: Box<dyn StagingArea>,
    current: Option<PathBuf>,
}

impl StagingSlot {
    pub fn new(area: Box<dyn StagingArea>) -> Self {
        Self {
            area,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    /// Claim a directory for a new cycle.
    ///
    /// A directory still held from an earlier cycle is removed first unless
    /// it is the one being suggested again.
    pub fn claim(&mut self, suggested: Option<&Path>) -> Result<PathBuf, StagingError> {
        if let Some(previous) = self.current.take() {
            if suggested != Some(previous.as_path()) {
                tracing::warn!(path = %previous.display(), "previous staging directory never completed");
                self.delete(&previous);
            }
        }
        let path = self.area.create_or_validate(suggested)?;
        self.current = Some(path.clone());
        Ok(path)
    }

    /// Settle the current directory after the host reports the copy result.
    ///
    /// Success hands the directory over to its consumer; failure deletes it.
    pub fn finish(&mut self, success: bool) {
        if success {
            if let Some(path) = self.current.take() {
                tracing::debug!(path = %path.display(), "staging directory handed over");
            }
        } else {
            self.discard();
        }
    }

    /// Delete the current directory, if any, and forget it.
    pub fn discard(&mut self) {
        if let Some(path) = self.current.take() {
            self.delete(&path);
        }
    }

    fn delete(&mut self, path: &Path) {
        match self.area.remove(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "staging directory removed"),
            Err(e) => tracing::warn!(error = %e, "staging cleanup failed"),
        }
    }
}

impl std::fmt::Debug for StagingSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingSlot")
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

fn is_owned_dir(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_dir() && meta.uid() == nix::unistd::getuid().as_raw(),
        Err(_) => false,
    }
}
