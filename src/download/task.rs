use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::api::DownloadInfo;
use crate::models::AdId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Paused,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }

    /// Pending or downloading. At most one active task exists per ad.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Downloading)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookkeeping for one download, owned by the job driving it
#[derive(Debug, Clone)]
pub struct DownloadTask {
    ad_id: AdId,
    filename: Option<String>,
    total_size: u64,
    chunk_size: u64,
    total_chunks: u64,
    status: DownloadStatus,
    completed_chunks: BTreeSet<u64>,
    error: Option<String>,
}

impl DownloadTask {
    pub fn new(ad_id: AdId) -> Self {
        Self {
            ad_id,
            filename: None,
            total_size: 0,
            chunk_size: 0,
            total_chunks: 0,
            status: DownloadStatus::Pending,
            completed_chunks: BTreeSet::new(),
            error: None,
        }
    }

    pub fn ad_id(&self) -> &AdId {
        &self.ad_id
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn status(&self) -> DownloadStatus {
        self.status
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Adopt the layout reported by the info endpoint
    pub fn describe(&mut self, info: &DownloadInfo) {
        self.filename = Some(info.filename.clone());
        self.total_size = info.total_size;
        self.chunk_size = info.chunk_size;
        self.total_chunks = info.total_chunks;
    }

    pub fn start(&mut self) {
        self.status = DownloadStatus::Downloading;
        self.completed_chunks.clear();
        self.error = None;
    }

    pub fn is_chunk_complete(&self, index: u64) -> bool {
        self.completed_chunks.contains(&index)
    }

    pub fn mark_chunk_complete(&mut self, index: u64) {
        if index < self.total_chunks {
            self.completed_chunks.insert(index);
        }
    }

    pub fn complete(&mut self) {
        self.completed_chunks.extend(0..self.total_chunks);
        self.status = DownloadStatus::Completed;
        self.error = None;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = DownloadStatus::Failed;
        self.error = Some(message.into());
    }

    pub fn pause(&mut self) {
        self.status = DownloadStatus::Paused;
    }

    /// Rounded percentage of chunks received
    pub fn progress(&self) -> u8 {
        if self.total_chunks == 0 {
            return if self.status == DownloadStatus::Completed { 100 } else { 0 };
        }
        let pct = self.completed_chunks.len() as f64 / self.total_chunks as f64 * 100.0;
        pct.round().clamp(0.0, 100.0) as u8
    }

    pub fn snapshot(&self) -> DownloadProgress {
        DownloadProgress {
            ad_id: self.ad_id.clone(),
            filename: self.filename.clone(),
            status: self.status,
            progress: self.progress(),
            completed_chunks: self.completed_chunks.len() as u64,
            total_chunks: self.total_chunks,
            error: self.error.clone(),
        }
    }
}

/// What subscribers see; also the body of the outbound `downloadStatus` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub ad_id: AdId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub status: DownloadStatus,
    pub progress: u8,
    pub completed_chunks: u64,
    pub total_chunks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DownloadProgress {
    pub fn pending(ad_id: AdId) -> Self {
        DownloadTask::new(ad_id).snapshot()
    }
}
