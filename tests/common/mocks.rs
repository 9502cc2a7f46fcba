use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reel_signage::{
    download::{DownloadApi, DownloadInfo},
    location::{LocationPermission, PositionProvider},
    models::{AdId, Position},
    player::{PlayerStatus, VideoPlayer},
    protocol::{MessageTransport, TransportEvent},
    utils::DownloadError,
};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// Player whose end-of-stream is driven by the test
pub struct MockPlayer {
    load_delay: Duration,
    init_calls: AtomicUsize,
    loaded: Mutex<Vec<PathBuf>>,
    status: Mutex<PlayerStatus>,
    fail_loads: AtomicBool,
}

impl MockPlayer {
    pub fn new() -> Self {
        Self {
            load_delay: Duration::ZERO,
            init_calls: AtomicUsize::new(0),
            loaded: Mutex::new(Vec::new()),
            status: Mutex::new(PlayerStatus::Idle),
            fail_loads: AtomicBool::new(false),
        }
    }

    pub fn with_load_delay(mut self, load_delay: Duration) -> Self {
        self.load_delay = load_delay;
        self
    }

    pub fn init_count(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    /// Filenames passed to `initialize`, in order
    pub fn loaded_files(&self) -> Vec<String> {
        self.loaded
            .lock()
            .unwrap()
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect()
    }

    pub fn current_status(&self) -> PlayerStatus {
        self.status.lock().unwrap().clone()
    }

    /// Report end-of-stream for the mounted video
    pub fn finish(&self) {
        *self.status.lock().unwrap() = PlayerStatus::Ended;
    }

    pub fn break_playback(&self, message: &str) {
        *self.status.lock().unwrap() = PlayerStatus::Error(message.to_string());
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    fn set_status(&self, status: PlayerStatus) {
        *self.status.lock().unwrap() = status;
    }
}

#[async_trait]
impl VideoPlayer for MockPlayer {
    async fn initialize(&self, path: &Path) -> Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        self.set_status(PlayerStatus::Loading);
        tokio::time::sleep(self.load_delay).await;

        if self.fail_loads.load(Ordering::SeqCst) {
            self.set_status(PlayerStatus::Error("decoder failure".to_string()));
            return Err(anyhow!("Mock load failure for {:?}", path));
        }

        self.loaded.lock().unwrap().push(path.to_path_buf());
        self.set_status(PlayerStatus::Ready);
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        self.set_status(PlayerStatus::Playing);
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.set_status(PlayerStatus::Paused);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.set_status(PlayerStatus::Idle);
        Ok(())
    }

    async fn position(&self) -> Option<Duration> {
        None
    }

    async fn duration(&self) -> Option<Duration> {
        None
    }

    async fn is_playing(&self) -> bool {
        self.current_status() == PlayerStatus::Playing
    }

    fn is_looping(&self) -> bool {
        false
    }

    async fn status(&self) -> PlayerStatus {
        self.current_status()
    }

    async fn dispose(&self) -> Result<()> {
        self.set_status(PlayerStatus::Idle);
        Ok(())
    }
}

/// In-memory chunk server with call counting and failure injection
pub struct MockDownloadApi {
    videos: Mutex<HashMap<AdId, (String, Vec<u8>)>>,
    chunk_delay: Duration,
    info_calls: AtomicUsize,
    chunk_calls: AtomicUsize,
    failing: AtomicBool,
}

impl MockDownloadApi {
    pub fn new() -> Self {
        Self {
            videos: Mutex::new(HashMap::new()),
            chunk_delay: Duration::ZERO,
            info_calls: AtomicUsize::new(0),
            chunk_calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn with_video(self, ad_id: &str, filename: &str, bytes: Vec<u8>) -> Self {
        self.add_video(ad_id, filename, bytes);
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn add_video(&self, ad_id: &str, filename: &str, bytes: Vec<u8>) {
        self.videos
            .lock()
            .unwrap()
            .insert(AdId::new(ad_id), (filename.to_string(), bytes));
    }

    /// Make every chunk request fail until cleared
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn info_calls(&self) -> usize {
        self.info_calls.load(Ordering::SeqCst)
    }

    pub fn chunk_calls(&self) -> usize {
        self.chunk_calls.load(Ordering::SeqCst)
    }

    fn video(&self, ad_id: &AdId) -> Option<(String, Vec<u8>)> {
        self.videos.lock().unwrap().get(ad_id).cloned()
    }
}

#[async_trait]
impl DownloadApi for MockDownloadApi {
    async fn request_info(
        &self,
        ad_id: &AdId,
        chunk_size: u64,
    ) -> Result<DownloadInfo, DownloadError> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        let (filename, bytes) = self
            .video(ad_id)
            .ok_or_else(|| DownloadError::InfoUnavailable {
                ad_id: ad_id.clone(),
                message: "HTTP 404 Not Found".to_string(),
            })?;

        let total_size = bytes.len() as u64;
        Ok(DownloadInfo {
            filename,
            total_size,
            chunk_size,
            total_chunks: total_size.div_ceil(chunk_size),
            download_url: None,
        })
    }

    async fn fetch_chunk(
        &self,
        ad_id: &AdId,
        chunk_index: u64,
        chunk_size: u64,
    ) -> Result<Vec<u8>, DownloadError> {
        self.chunk_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.chunk_delay).await;

        let unavailable = |message: &str| DownloadError::ChunkUnavailable {
            ad_id: ad_id.clone(),
            chunk_index,
            message: message.to_string(),
        };

        if self.failing.load(Ordering::SeqCst) {
            return Err(unavailable("HTTP 503 Service Unavailable"));
        }

        let (_, bytes) = self
            .video(ad_id)
            .ok_or_else(|| unavailable("HTTP 404 Not Found"))?;
        let start = (chunk_index * chunk_size) as usize;
        let end = (start + chunk_size as usize).min(bytes.len());
        if start >= end {
            return Err(unavailable("chunk out of range"));
        }
        Ok(bytes[start..end].to_vec())
    }
}

/// Transport that records what was sent and lets the test inject traffic
pub struct MockTransport {
    connected: AtomicBool,
    connects: AtomicUsize,
    inbound: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    sent: Mutex<Vec<(String, Value)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            inbound: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Deliver a message as if the backend had sent it
    pub async fn inject(&self, event: &str, payload: Value) {
        let sender = self.inbound.lock().unwrap().clone();
        if let Some(sender) = sender {
            let _ = sender
                .send(TransportEvent::Message {
                    event: event.to_string(),
                    payload,
                })
                .await;
        }
    }

    /// Simulate the backend going away
    pub async fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let sender = self.inbound.lock().unwrap().take();
        if let Some(sender) = sender {
            let _ = sender
                .send(TransportEvent::Disconnected {
                    reason: Some("transport closed".to_string()),
                })
                .await;
        }
    }

    /// Payloads of every sent message with the given event name
    pub fn sent_payloads(&self, event: &str) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn count_sent(&self, event: &str) -> usize {
        self.sent_payloads(event).len()
    }
}

#[async_trait]
impl MessageTransport for MockTransport {
    async fn connect(&self) -> Result<mpsc::Receiver<TransportEvent>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::channel(64);
        sender
            .try_send(TransportEvent::Connected)
            .map_err(|e| anyhow!("Mock connect failed: {}", e))?;
        self.connected.store(true, Ordering::SeqCst);
        *self.inbound.lock().unwrap() = Some(sender);
        Ok(receiver)
    }

    async fn send(&self, event: &str, payload: Value) -> Result<()> {
        if !self.is_connected() {
            return Err(anyhow!("Not connected"));
        }
        self.sent.lock().unwrap().push((event.to_string(), payload));
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.inbound.lock().unwrap().take();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Position source the test can move around
pub struct MockPositionProvider {
    permission: LocationPermission,
    position: Mutex<Position>,
    updates: mpsc::UnboundedSender<Position>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Position>>>,
}

impl MockPositionProvider {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        let (updates, receiver) = mpsc::unbounded_channel();
        Self {
            permission: LocationPermission::Granted,
            position: Mutex::new(Position::new(longitude, latitude)),
            updates,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub fn denied() -> Self {
        Self {
            permission: LocationPermission::Denied,
            ..Self::new(0.0, 0.0)
        }
    }

    /// Move the device and emit a movement update
    pub fn move_to(&self, longitude: f64, latitude: f64) {
        let position = Position::new(longitude, latitude);
        *self.position.lock().unwrap() = position;
        let _ = self.updates.send(position);
    }
}

#[async_trait]
impl PositionProvider for MockPositionProvider {
    async fn permission(&self) -> LocationPermission {
        self.permission
    }

    async fn current_position(&self) -> Result<Position> {
        Ok(*self.position.lock().unwrap())
    }

    fn position_updates(&self, _distance_filter_m: f64) -> BoxStream<'static, Position> {
        match self.receiver.lock().unwrap().take() {
            Some(receiver) => stream::unfold(receiver, |mut receiver| async move {
                receiver.recv().await.map(|position| (position, receiver))
            })
            .boxed(),
            None => stream::pending().boxed(),
        }
    }
}
