//! Destination transport.
//!
//! The finished album is built in a local staging directory and handed to
//! a [`Transport`] collaborator as one bulk copy, so a previously
//! published album is never left partially overwritten and a slow or
//! remote destination only ever sees complete trees. The same collaborator
//! removes the staging directory at job end.
//!
//! [`LocalTransport`] is the bundled filesystem implementation. Hosts with
//! remote destinations implement the trait over their own transfer layer.

use crate::pipeline::CancelFlag;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("walk failed: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("copy cancelled")]
    Cancelled,
}

/// Bulk file transfer to a destination.
pub trait Transport {
    /// Copy the tree under `source` into `dest` (created if needed),
    /// reporting `(files_done, files_total)` after each file and honoring
    /// cancellation between files.
    fn copy_tree(
        &self,
        source: &Path,
        dest: &Path,
        progress: &mut dyn FnMut(u64, u64),
        cancel: &CancelFlag,
    ) -> Result<(), TransportError>;

    /// Recursively delete a directory. Deleting a directory that does not
    /// exist is not an error.
    fn remove_tree(&self, dir: &Path) -> Result<(), TransportError>;
}

/// Filesystem-to-filesystem transport.
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn copy_tree(
        &self,
        source: &Path,
        dest: &Path,
        progress: &mut dyn FnMut(u64, u64),
        cancel: &CancelFlag,
    ) -> Result<(), TransportError> {
        let mut files: Vec<(PathBuf, PathBuf)> = Vec::new();
        for entry in WalkDir::new(source) {
            let entry = entry?;
            if entry.file_type().is_file()
                && let Ok(rel) = entry.path().strip_prefix(source)
            {
                files.push((entry.path().to_path_buf(), rel.to_path_buf()));
            }
        }
        let total = files.len() as u64;
        fs::create_dir_all(dest)?;
        for (done, (abs, rel)) in files.into_iter().enumerate() {
            if cancel.is_requested() {
                return Err(TransportError::Cancelled);
            }
            let target = dest.join(&rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&abs, &target)?;
            progress(done as u64 + 1, total);
        }
        Ok(())
    }

    fn remove_tree(&self, dir: &Path) -> Result<(), TransportError> {
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}
