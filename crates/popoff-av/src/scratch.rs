//! Per-job scratch directory.
//!
//! A [`ScratchDir`] is `<scratch_root>/<job id>/`, owned exclusively by one
//! job. The transcoder recreates it before every engine attempt so a package
//! never mixes output from two profiles.

use std::path::{Path, PathBuf};

use popoff_core::JobId;

/// Scratch output directory of a single job.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Scratch location for `job_id` under `root`. Nothing is created yet.
    pub fn for_job(root: &Path, job_id: JobId) -> Self {
        Self {
            path: root.join(job_id.to_string()),
        }
    }

    /// Use an explicit directory.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A path for a named file inside the directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Remove any previous contents and create the directory empty.
    pub fn recreate(&self) -> popoff_core::Result<()> {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        std::fs::create_dir_all(&self.path)?;
        Ok(())
    }

    /// Delete the directory and everything in it. Missing is fine.
    pub fn remove(&self) -> popoff_core::Result<()> {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
