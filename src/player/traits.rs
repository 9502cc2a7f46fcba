use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// What the underlying playback primitive reports about itself
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerStatus {
    Idle,
    Loading,
    /// Initialized and ready to play
    Ready,
    Playing,
    Paused,
    /// Explicit end-of-stream
    Ended,
    Error(String),
}

/// Video playback capability. The orchestrator is the only caller; it owns the
/// single mounted resource.
#[async_trait]
pub trait VideoPlayer: Send + Sync {
    /// Load a local file. Returns once the media is ready to play.
    async fn initialize(&self, path: &Path) -> Result<()>;
    async fn play(&self) -> Result<()>;
    async fn pause(&self) -> Result<()>;
    /// Stop and release the mounted media
    async fn stop(&self) -> Result<()>;
    async fn position(&self) -> Option<Duration>;
    async fn duration(&self) -> Option<Duration>;
    async fn is_playing(&self) -> bool;
    fn is_looping(&self) -> bool;
    async fn status(&self) -> PlayerStatus;
    async fn dispose(&self) -> Result<()>;
}
