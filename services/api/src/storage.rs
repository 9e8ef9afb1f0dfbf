//! Upload directory layout and file lifecycle helpers.
//!
//! Two directories live under the upload root:
//!
//! - the **staging** area holds X-ray images only for the duration of one
//!   analysis request;
//! - the **archive** holds ECG uploads durably. Nothing in the service ever
//!   modifies or removes an archived file once it is complete.

use crate::config::StorageConfig;
use chrono::{DateTime, Local};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Extensions accepted by the ECG archive, lowercased with the leading dot
pub const ARCHIVE_EXTENSIONS: [&str; 4] = [".png", ".jpg", ".jpeg", ".pdf"];

/// Storage layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("Failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Resolved upload directories
#[derive(Debug, Clone)]
pub struct StoragePaths {
    public_prefix: String,
    archive_subdir: String,
    staging_dir: PathBuf,
    archive_dir: PathBuf,
}

impl StoragePaths {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            public_prefix: config.public_prefix.clone(),
            archive_subdir: config.archive_subdir.clone(),
            staging_dir: config.root.join(&config.staging_subdir),
            archive_dir: config.root.join(&config.archive_subdir),
        }
    }

    /// Create the staging and archive directories, parents included.
    ///
    /// Safe to call when they already exist.
    pub async fn ensure_directories(&self) -> Result<(), StorageError> {
        for dir in [&self.archive_dir, &self.staging_dir] {
            fs::create_dir_all(dir)
                .await
                .map_err(|source| StorageError::CreateDir {
                    path: dir.clone(),
                    source,
                })?;
            debug!(path = %dir.display(), "Upload directory ready");
        }

        info!(
            staging = %self.staging_dir.display(),
            archive = %self.archive_dir.display(),
            "Storage directories initialized"
        );

        Ok(())
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Staging location for an analysis request: `{id}{ext}`
    pub fn staging_path(&self, id: Uuid, ext: &str) -> PathBuf {
        self.staging_dir.join(format!("{id}{ext}"))
    }

    pub fn archive_path(&self, filename: &str) -> PathBuf {
        self.archive_dir.join(filename)
    }

    /// Relative, `/`-separated path reported to clients for an archived file.
    ///
    /// Built from the public prefix, never from the on-disk root, so the
    /// server's filesystem layout is not exposed.
    pub fn public_path(&self, filename: &str) -> String {
        let prefix = self.public_prefix.replace('\\', "/");
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("{}/{}", self.archive_subdir, filename)
        } else {
            format!("{}/{}/{}", prefix, self.archive_subdir, filename)
        }
    }
}

/// Lowercased extension of `filename` including the dot, or `""` when absent.
///
/// Leading dots of hidden files do not count as an extension.
pub fn normalized_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}

/// Whether the ECG archive accepts this (normalized) extension
pub fn is_archivable(ext: &str) -> bool {
    ARCHIVE_EXTENSIONS.contains(&ext)
}

/// Archive filename: `ecg_{YYYYMMDD_HHMMSS}_{id}{ext}`
pub fn archive_filename(now: DateTime<Local>, id: Uuid, ext: &str) -> String {
    format!("ecg_{}_{}{}", now.format("%Y%m%d_%H%M%S"), id, ext)
}

/// Size in MiB rounded to two decimals
pub fn size_in_mb(bytes: u64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}

/// A file in the staging area that is removed when the guard goes away.
///
/// Call [`StagedFile::remove`] on the normal path; dropping the guard without
/// it (early return, panic, cancelled request) still unlinks the file.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    removed: bool,
}

impl StagedFile {
    /// Write `bytes` to `path` and take ownership of its lifetime.
    ///
    /// A failed write leaves nothing behind.
    pub async fn write(path: PathBuf, bytes: &[u8]) -> Result<Self, StorageError> {
        // Guard first so a partial write is cleaned up as well
        let staged = Self {
            path,
            removed: false,
        };

        fs::write(&staged.path, bytes)
            .await
            .map_err(|source| StorageError::Write {
                path: staged.path.clone(),
                source,
            })?;

        debug!(path = %staged.path.display(), size_bytes = bytes.len(), "Staged file written");
        Ok(staged)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the staged file now
    pub async fn remove(mut self) {
        self.removed = true;
        match fs::remove_file(&self.path).await {
            Ok(()) => debug!(path = %self.path.display(), "Staged file removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove staged file"),
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        // Synchronous: Drop cannot await, and the file must not outlive the request
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Staged file removed on drop"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove staged file"),
        }
    }
}
