use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::api::{DownloadApi, DownloadInfo};
use super::store::VideoStore;
use super::task::{DownloadProgress, DownloadStatus, DownloadTask};
use super::validator::validate_file;
use crate::config::DownloadConfig;
use crate::models::AdId;
use crate::utils::errors::DownloadError;

struct TaskEntry {
    progress: Arc<watch::Sender<DownloadProgress>>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Chunked, resumable, integrity-checked video downloader.
///
/// Each advertisement has at most one active task. Progress for a task is
/// published on a `watch` channel, so a subscriber that attaches late (even
/// after completion) immediately observes the latest state.
pub struct DownloadEngine {
    api: Arc<dyn DownloadApi>,
    store: Arc<VideoStore>,
    config: DownloadConfig,
    tasks: Arc<Mutex<HashMap<AdId, TaskEntry>>>,
    shutdown: CancellationToken,
}

impl DownloadEngine {
    pub fn new(api: Arc<dyn DownloadApi>, store: Arc<VideoStore>, config: DownloadConfig) -> Self {
        Self {
            api,
            store,
            config,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &Arc<VideoStore> {
        &self.store
    }

    /// Start downloading `ad_id`.
    ///
    /// Returns `false` when a task for the ad is already pending or downloading;
    /// use [`subscribe`](Self::subscribe) to follow it instead. A completed
    /// task whose file is still on disk is reported as accepted without any
    /// network traffic.
    pub async fn start_download(&self, ad_id: &AdId) -> bool {
        if self.shutdown.is_cancelled() {
            warn!("Download engine disposed, ignoring request for {}", ad_id);
            return false;
        }

        let mut tasks = self.tasks.lock().await;

        let existing = tasks.get(ad_id).map(|entry| entry.progress.clone());
        if let Some(progress) = &existing {
            let snapshot = progress.borrow().clone();
            if snapshot.status.is_active() {
                debug!("Download for {} already in progress, not starting another", ad_id);
                return false;
            }
            if snapshot.status == DownloadStatus::Completed {
                if let Some(filename) = snapshot.filename.as_deref() {
                    if self.store.exists(filename) {
                        debug!("{} already downloaded as {}", ad_id, filename);
                        return true;
                    }
                }
            }
        }

        // Reuse the channel so earlier subscribers follow the retry
        let progress = match existing {
            Some(progress) => {
                progress.send_replace(DownloadProgress::pending(ad_id.clone()));
                progress
            }
            None => Arc::new(watch::channel(DownloadProgress::pending(ad_id.clone())).0),
        };

        let cancel = self.shutdown.child_token();
        let job = DownloadJob {
            api: self.api.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
            progress: progress.clone(),
        };

        let job_cancel = cancel.clone();
        let job_ad_id = ad_id.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = job_cancel.cancelled() => {
                    debug!("Download job for {} cancelled", job_ad_id);
                }
                _ = job.run(job_ad_id.clone()) => {}
            }
        });

        info!("Started download for {}", ad_id);
        tasks.insert(
            ad_id.clone(),
            TaskEntry {
                progress,
                cancel,
                handle: Some(handle),
            },
        );
        true
    }

    /// Follow the task for `ad_id`, including one that already finished
    pub async fn subscribe(&self, ad_id: &AdId) -> Option<watch::Receiver<DownloadProgress>> {
        let tasks = self.tasks.lock().await;
        tasks.get(ad_id).map(|entry| entry.progress.subscribe())
    }

    pub async fn status(&self, ad_id: &AdId) -> Option<DownloadProgress> {
        let tasks = self.tasks.lock().await;
        tasks.get(ad_id).map(|entry| entry.progress.borrow().clone())
    }

    pub async fn active_downloads(&self) -> Vec<AdId> {
        let tasks = self.tasks.lock().await;
        tasks
            .iter()
            .filter(|(_, entry)| entry.progress.borrow().status.is_active())
            .map(|(ad_id, _)| ad_id.clone())
            .collect()
    }

    /// Which advertisement produced a library file, if we downloaded it
    pub async fn completed_ad_for(&self, filename: &str) -> Option<AdId> {
        let tasks = self.tasks.lock().await;
        tasks.iter().find_map(|(ad_id, entry)| {
            let progress = entry.progress.borrow();
            (progress.status == DownloadStatus::Completed
                && progress.filename.as_deref() == Some(filename))
            .then(|| ad_id.clone())
        })
    }

    /// Stop the task, delete its partial output and forget it
    pub async fn cancel_download(&self, ad_id: &AdId) -> bool {
        let entry = self.tasks.lock().await.remove(ad_id);
        let Some(entry) = entry else {
            debug!("No download to cancel for {}", ad_id);
            return false;
        };

        self.stop_entry(ad_id, entry).await;
        info!("Cancelled download for {}", ad_id);
        true
    }

    /// Cancel every task and close all progress channels
    pub async fn dispose(&self) {
        self.shutdown.cancel();
        let entries: Vec<(AdId, TaskEntry)> = self.tasks.lock().await.drain().collect();
        let count = entries.len();
        for (ad_id, entry) in entries {
            self.stop_entry(&ad_id, entry).await;
        }
        info!("Download engine disposed ({} tasks dropped)", count);
    }

    async fn stop_entry(&self, ad_id: &AdId, mut entry: TaskEntry) {
        entry.cancel.cancel();
        if let Some(handle) = entry.handle.take() {
            if let Err(e) = handle.await {
                warn!("Download job for {} ended abnormally: {}", ad_id, e);
            }
        }

        let snapshot = entry.progress.borrow().clone();
        if snapshot.status.is_active() {
            entry.progress.send_modify(|progress| {
                progress.status = DownloadStatus::Paused;
            });
        }
        if let Some(filename) = snapshot.filename.as_deref() {
            if let Err(e) = self.store.delete_partial(filename).await {
                warn!("Failed to remove partial download for {}: {}", ad_id, e);
            }
        }
    }
}

/// Everything a spawned download needs, detached from the engine
struct DownloadJob {
    api: Arc<dyn DownloadApi>,
    store: Arc<VideoStore>,
    config: DownloadConfig,
    progress: Arc<watch::Sender<DownloadProgress>>,
}

impl DownloadJob {
    async fn run(self, ad_id: AdId) {
        let mut task = DownloadTask::new(ad_id);
        if let Err(e) = self.execute(&mut task).await {
            error!("Download for {} failed: {}", task.ad_id(), e);
            task.fail(e.to_string());
            if let Some(filename) = task.filename() {
                if let Err(cleanup) = self.store.delete_partial(filename).await {
                    warn!("Failed to remove partial file {}: {}", filename, cleanup);
                }
            }
            self.publish(&task);
        }
    }

    fn publish(&self, task: &DownloadTask) {
        self.progress.send_replace(task.snapshot());
    }

    async fn execute(&self, task: &mut DownloadTask) -> Result<(), DownloadError> {
        let ad_id = task.ad_id().clone();
        let info = self
            .api
            .request_info(&ad_id, self.config.chunk_size)
            .await?;
        info.check()
            .map_err(|message| DownloadError::InfoUnavailable {
                ad_id: ad_id.clone(),
                message,
            })?;
        // Resolve the path early so a hostile filename fails before any I/O
        self.store.path_for(&info.filename)?;
        task.describe(&info);

        if self.store.exists(&info.filename) {
            if self.revalidate_existing(&info).await? {
                task.complete();
                self.publish(task);
                info!("{} already present as {}, skipping transfer", ad_id, info.filename);
                return Ok(());
            }
        }

        self.store.ensure_dir().await?;
        task.start();
        self.publish(task);

        let mut file = self.store.create_partial(&info.filename).await?;
        for index in 0..info.total_chunks {
            if task.is_chunk_complete(index) {
                continue;
            }
            let bytes = self.fetch_with_retry(&ad_id, index).await?;
            file.write_all(&bytes).await?;
            task.mark_chunk_complete(index);
            self.publish(task);
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let partial = self.store.partial_path_for(&info.filename)?;
        let report =
            validate_file(&partial, info.total_size, self.config.size_tolerance_percent).await?;
        self.store.finalize(&info.filename).await?;

        task.complete();
        self.publish(task);
        info!(
            "Downloaded {} as {} ({} bytes, {:?})",
            ad_id, info.filename, report.actual_size, report.format
        );
        Ok(())
    }

    /// `true` when the file on disk is usable; a bad file is deleted
    async fn revalidate_existing(&self, info: &DownloadInfo) -> Result<bool, DownloadError> {
        let path = self.store.path_for(&info.filename)?;
        match validate_file(&path, info.total_size, self.config.size_tolerance_percent).await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Existing {} is invalid ({}), downloading again", info.filename, e);
                self.store.delete(&info.filename).await?;
                Ok(false)
            }
        }
    }

    async fn fetch_with_retry(&self, ad_id: &AdId, index: u64) -> Result<Vec<u8>, DownloadError> {
        let attempts = self.config.max_retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self
                .api
                .fetch_chunk(ad_id, index, self.config.chunk_size)
                .await
            {
                Ok(bytes) => {
                    if attempt > 1 {
                        debug!(
                            "Chunk {} of {} succeeded after {} attempts",
                            index, ad_id, attempt
                        );
                    }
                    return Ok(bytes);
                }
                Err(e) => {
                    if attempt >= attempts {
                        return Err(e);
                    }
                    let delay = self.config.retry_backoff(attempt);
                    warn!(
                        "Attempt {} for chunk {} of {} failed: {}. Retrying in {:?}",
                        attempt, index, ad_id, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Wait until a task reaches a terminal state.
///
/// Returns the last observed state if the engine drops the channel first.
pub async fn wait_until_settled(
    mut receiver: watch::Receiver<DownloadProgress>,
) -> DownloadProgress {
    loop {
        {
            let current = receiver.borrow_and_update();
            if current.status.is_terminal() {
                return current.clone();
            }
        }
        if receiver.changed().await.is_err() {
            return receiver.borrow().clone();
        }
    }
}
