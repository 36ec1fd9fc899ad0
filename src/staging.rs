//! In-progress file management module
//!
//! This module provides RAII-based staging of downloads: data is written to
//! `<final>.part` and only renamed to the final name once complete.

use crate::library::IN_PROGRESS_SUFFIX;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Guard for an in-progress download that removes leftovers on drop
#[derive(Debug)]
pub(crate) struct StagingFile {
    staging: PathBuf,
    destination: PathBuf,
}

impl StagingFile {
    /// Prepares staging for the given final destination
    ///
    /// Any stale staging file from an earlier interrupted run is removed.
    pub(crate) fn new(destination: &Path) -> io::Result<Self> {
        let mut staging = destination.as_os_str().to_owned();
        staging.push(IN_PROGRESS_SUFFIX);
        let staging = PathBuf::from(staging);

        match fs::remove_file(&staging) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        Ok(Self {
            staging,
            destination: destination.to_path_buf(),
        })
    }

    /// Get the path data is written to
    pub(crate) fn path(&self) -> &Path {
        &self.staging
    }

    /// Whether something non-empty was written to the staging path
    pub(crate) fn has_content(&self) -> bool {
        fs::metadata(&self.staging)
            .map(|metadata| metadata.is_file() && metadata.len() > 0)
            .unwrap_or(false)
    }

    /// Moves the staged data to its final name and returns that path
    pub(crate) fn publish(&self) -> io::Result<PathBuf> {
        if !self.has_content() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("nothing to publish at {}", self.staging.display()),
            ));
        }

        fs::rename(&self.staging, &self.destination)?;
        Ok(self.destination.clone())
    }

    /// Drops whatever was written so far, keeping the guard usable
    pub(crate) fn discard(&self) {
        let _ = fs::remove_file(&self.staging);
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        // After a successful publish the staging path no longer exists
        let _ = fs::remove_file(&self.staging);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_path_uses_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingFile::new(&dir.path().join("Show_s01e01.mp4")).unwrap();

        let filename = staging.path().file_name().unwrap().to_str().unwrap();
        assert_eq!(filename, "Show_s01e01.mp4.part");
    }

    #[test]
    fn test_publish_renames() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("Show_s01e01.mp4");
        let staging = StagingFile::new(&destination).unwrap();
        let staging_path = staging.path().to_path_buf();

        fs::write(&staging_path, b"video").unwrap();
        let published = staging.publish().unwrap();

        assert_eq!(published, destination);
        assert!(destination.exists());
        assert!(!staging_path.exists());
    }

    #[test]
    fn test_publish_refuses_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("Show_s01e01.mp4");
        let staging = StagingFile::new(&destination).unwrap();

        fs::write(staging.path(), b"").unwrap();
        assert!(staging.publish().is_err());
        assert!(!destination.exists());
    }

    #[test]
    fn test_cleanup_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("Show_s01e01.mp4");

        let staging_path = {
            let staging = StagingFile::new(&destination).unwrap();
            fs::write(staging.path(), b"half a video").unwrap();
            staging.path().to_path_buf()
            // staging is dropped here
        };

        assert!(!staging_path.exists());
        assert!(!destination.exists());
    }

    #[test]
    fn test_stale_staging_removed() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("Show_s01e01.mp4");
        fs::write(dir.path().join("Show_s01e01.mp4.part"), b"stale").unwrap();

        let staging = StagingFile::new(&destination).unwrap();
        assert!(!staging.has_content());
    }
}
