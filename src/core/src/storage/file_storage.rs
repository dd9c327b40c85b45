use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, error, info};

use crate::error_handling::types::StorageError;

/// Output directories for recordings and snapshots.
///
/// Files are named `<dir>/<YYYYmmddHHMMSS>.<ext>`. When two snapshots land in the same second
/// the later one gets a `-<n>` suffix instead of overwriting the first.
#[derive(Debug, Clone)]
pub struct FileStorage {
    video_dir: PathBuf,
    snapshot_dir: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(video_dir: P, snapshot_dir: Q) -> Self {
        Self {
            video_dir: video_dir.as_ref().to_path_buf(),
            snapshot_dir: snapshot_dir.as_ref().to_path_buf(),
        }
    }

    /// Creates the output directories if they are missing.
    pub fn ensure_directories(&self) -> Result<(), StorageError> {
        for dir in [&self.video_dir, &self.snapshot_dir] {
            fs::create_dir_all(dir).map_err(|e| {
                error!("Failed to create directory {}: {}", dir.display(), e);
                StorageError::CreateDirFailed(e)
            })?;
        }
        info!(
            "Storage directories ready (videos: {}, snapshots: {})",
            self.video_dir.display(),
            self.snapshot_dir.display()
        );
        Ok(())
    }

    /// Absolute path of the recording directory, created on demand.
    pub fn video_dir(&self) -> Result<PathBuf, StorageError> {
        absolute_dir(&self.video_dir)
    }

    /// Writes a snapshot image and returns its absolute path.
    pub fn write_snapshot(
        &self,
        bytes: &[u8],
        extension: &str,
        taken_at: DateTime<Utc>,
    ) -> Result<PathBuf, StorageError> {
        if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(StorageError::InvalidPath(format!(
                "unsupported file extension '{}'",
                extension
            )));
        }

        let dir = absolute_dir(&self.snapshot_dir)?;
        let stem = taken_at.format("%Y%m%d%H%M%S").to_string();

        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{}.{}", stem, extension)
            } else {
                format!("{}-{}.{}", stem, attempt, extension)
            };
            let path = dir.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(bytes)
                        .and_then(|_| file.flush())
                        .map_err(StorageError::WriteFailed)?;
                    debug!("Wrote {} bytes to {}", bytes.len(), path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(StorageError::WriteFailed(e)),
            }
        }
    }
}

fn absolute_dir(dir: &Path) -> Result<PathBuf, StorageError> {
    fs::create_dir_all(dir).map_err(StorageError::CreateDirFailed)?;
    fs::canonicalize(dir).map_err(|e| StorageError::InvalidPath(format!("{}: {}", dir.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn storage_in(root: &Path) -> FileStorage {
        FileStorage::new(root.join("videos"), root.join("snapshots"))
    }

    #[test]
    fn ensure_directories_creates_both() {
        let root = tempdir().unwrap();
        let storage = storage_in(root.path());

        storage.ensure_directories().unwrap();

        assert!(root.path().join("videos").is_dir());
        assert!(root.path().join("snapshots").is_dir());
    }

    #[test]
    fn snapshot_is_named_after_timestamp() {
        let root = tempdir().unwrap();
        let storage = storage_in(root.path());
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();

        let path = storage.write_snapshot(b"png-bytes", "png", at).unwrap();

        assert!(path.is_absolute());
        assert_eq!(path.file_name().unwrap(), "20240309140507.png");
        assert_eq!(fs::read(&path).unwrap(), b"png-bytes");
    }

    #[test]
    fn snapshot_in_same_second_gets_suffix() {
        let root = tempdir().unwrap();
        let storage = storage_in(root.path());
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();

        let first = storage.write_snapshot(b"one", "jpg", at).unwrap();
        let second = storage.write_snapshot(b"two", "jpg", at).unwrap();

        assert_ne!(first, second);
        assert_eq!(second.file_name().unwrap(), "20240309140507-1.jpg");
        assert_eq!(fs::read(&first).unwrap(), b"one");
    }

    #[test]
    fn rejects_path_like_extensions() {
        let root = tempdir().unwrap();
        let storage = storage_in(root.path());

        let err = storage
            .write_snapshot(b"x", "../png", Utc::now())
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath(_)));
    }
}
