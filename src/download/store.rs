use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tracing::{debug, info, warn};

use crate::utils::errors::DownloadError;

/// Suffix for files still being written
const PARTIAL_SUFFIX: &str = ".part";

/// Extensions the ambient library scan recognises as playable
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "3gp", "avi", "mkv", "webm", "flv", "ts"];

/// Check if an I/O error is due to disk space exhaustion (ENOSPC)
fn is_disk_full_error(err: &std::io::Error) -> bool {
    #[cfg(unix)]
    if err.raw_os_error() == Some(28) {
        return true;
    }

    #[cfg(windows)]
    if err.raw_os_error() == Some(112) {
        return true;
    }

    let error_msg = err.to_string().to_lowercase();
    error_msg.contains("no space left") || error_msg.contains("disk full")
}

fn storage_error(action: &str, path: &Path, err: std::io::Error) -> DownloadError {
    if is_disk_full_error(&err) {
        DownloadError::Io(format!("DISK_FULL: cannot {} {:?}", action, path))
    } else {
        DownloadError::Io(format!("cannot {} {:?}: {}", action, path, err))
    }
}

/// The single "videos" directory shared by the download engine (writer) and the
/// ambient library scan (reader).
///
/// Downloads land in `<filename>.part` and are renamed into place only once
/// validated, so readers never observe an incomplete video.
#[derive(Debug, Clone)]
pub struct VideoStore {
    dir: PathBuf,
}

impl VideoStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure_dir(&self) -> Result<(), DownloadError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| storage_error("create", &self.dir, e))
    }

    /// Resolve a server-supplied filename inside the store
    pub fn path_for(&self, filename: &str) -> Result<PathBuf, DownloadError> {
        let trimmed = filename.trim();
        if trimmed.is_empty()
            || trimmed == "."
            || trimmed.contains("..")
            || trimmed.contains('/')
            || trimmed.contains('\\')
            || trimmed.ends_with(PARTIAL_SUFFIX)
        {
            return Err(DownloadError::InvalidFilename(filename.to_string()));
        }
        Ok(self.dir.join(trimmed))
    }

    pub fn partial_path_for(&self, filename: &str) -> Result<PathBuf, DownloadError> {
        let path = self.path_for(filename)?;
        let mut name = path.as_os_str().to_owned();
        name.push(PARTIAL_SUFFIX);
        Ok(PathBuf::from(name))
    }

    pub fn exists(&self, filename: &str) -> bool {
        self.path_for(filename)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    /// Create (truncating) the partial file for a fresh download
    pub async fn create_partial(&self, filename: &str) -> Result<File, DownloadError> {
        let path = self.partial_path_for(filename)?;
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(|e| storage_error("create", &path, e))
    }

    /// Move a validated partial file into the library
    pub async fn finalize(&self, filename: &str) -> Result<PathBuf, DownloadError> {
        let partial = self.partial_path_for(filename)?;
        let target = self.path_for(filename)?;
        tokio::fs::rename(&partial, &target)
            .await
            .map_err(|e| storage_error("finalize", &partial, e))?;
        info!("Stored video {:?}", target);
        Ok(target)
    }

    pub async fn delete(&self, filename: &str) -> Result<(), DownloadError> {
        let path = self.path_for(filename)?;
        remove_if_exists(&path).await
    }

    pub async fn delete_partial(&self, filename: &str) -> Result<(), DownloadError> {
        let path = self.partial_path_for(filename)?;
        remove_if_exists(&path).await
    }

    /// Completed videos in the store, sorted by filename
    pub async fn scan_library(&self) -> Result<Vec<String>, DownloadError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Videos directory {:?} does not exist yet", self.dir);
                return Ok(Vec::new());
            }
            Err(e) => return Err(storage_error("read", &self.dir, e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error("read", &self.dir, e))?
        {
            let path = entry.path();
            if !path.is_file() || !is_video_file(&path) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                files.push(name.to_string());
            }
        }

        files.sort();
        Ok(files)
    }
}

fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            VIDEO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

async fn remove_if_exists(path: &Path) -> Result<(), DownloadError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!("Deleted {:?}", path);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            warn!("Failed to delete {:?}: {}", path, e);
            Err(storage_error("delete", path, e))
        }
    }
}
