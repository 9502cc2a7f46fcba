use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::traits::{PlayerStatus, VideoPlayer};

#[derive(Debug, Default)]
struct Playhead {
    media: Option<PathBuf>,
    /// Position accumulated before the current run
    played: Duration,
    running_since: Option<Instant>,
    disposed: bool,
}

impl Playhead {
    fn position(&self) -> Duration {
        self.played
            + self
                .running_since
                .map(|since| since.elapsed())
                .unwrap_or_default()
    }
}

/// Headless player that "plays" every file for a fixed clip length.
///
/// Used when the device runs without a display pipeline and for soak tests of
/// the orchestrator. Position advances with wall-clock time while playing.
pub struct SimulatedPlayer {
    clip_length: Duration,
    load_delay: Duration,
    playhead: Mutex<Playhead>,
}

impl SimulatedPlayer {
    pub fn new(clip_length: Duration) -> Self {
        Self {
            clip_length,
            load_delay: Duration::from_millis(50),
            playhead: Mutex::new(Playhead::default()),
        }
    }

    pub fn with_load_delay(mut self, load_delay: Duration) -> Self {
        self.load_delay = load_delay;
        self
    }

    /// Fold the running segment into `played`, clamped to the clip length
    fn settle(&self, playhead: &mut Playhead) {
        if let Some(since) = playhead.running_since.take() {
            playhead.played = (playhead.played + since.elapsed()).min(self.clip_length);
        }
    }
}

#[async_trait]
impl VideoPlayer for SimulatedPlayer {
    async fn initialize(&self, path: &Path) -> Result<()> {
        {
            let playhead = self.playhead.lock().await;
            if playhead.disposed {
                return Err(anyhow!("Player has been disposed"));
            }
        }

        tokio::time::sleep(self.load_delay).await;

        if !path.exists() {
            return Err(anyhow!("Media file not found: {:?}", path));
        }

        let mut playhead = self.playhead.lock().await;
        playhead.media = Some(path.to_path_buf());
        playhead.played = Duration::ZERO;
        playhead.running_since = None;
        info!("Simulated player loaded {:?}", path);
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        let mut playhead = self.playhead.lock().await;
        if playhead.media.is_none() {
            return Err(anyhow!("No media loaded"));
        }
        if playhead.running_since.is_none() && playhead.played < self.clip_length {
            playhead.running_since = Some(Instant::now());
        }
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        let mut playhead = self.playhead.lock().await;
        self.settle(&mut playhead);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut playhead = self.playhead.lock().await;
        if let Some(media) = playhead.media.take() {
            debug!("Simulated player released {:?}", media);
        }
        playhead.played = Duration::ZERO;
        playhead.running_since = None;
        Ok(())
    }

    async fn position(&self) -> Option<Duration> {
        let playhead = self.playhead.lock().await;
        playhead
            .media
            .as_ref()
            .map(|_| playhead.position().min(self.clip_length))
    }

    async fn duration(&self) -> Option<Duration> {
        let playhead = self.playhead.lock().await;
        playhead.media.as_ref().map(|_| self.clip_length)
    }

    async fn is_playing(&self) -> bool {
        let playhead = self.playhead.lock().await;
        playhead.running_since.is_some() && playhead.position() < self.clip_length
    }

    fn is_looping(&self) -> bool {
        false
    }

    async fn status(&self) -> PlayerStatus {
        let playhead = self.playhead.lock().await;
        if playhead.disposed || playhead.media.is_none() {
            return PlayerStatus::Idle;
        }
        if playhead.position() >= self.clip_length {
            PlayerStatus::Ended
        } else if playhead.running_since.is_some() {
            PlayerStatus::Playing
        } else if playhead.played > Duration::ZERO {
            PlayerStatus::Paused
        } else {
            PlayerStatus::Ready
        }
    }

    async fn dispose(&self) -> Result<()> {
        let mut playhead = self.playhead.lock().await;
        playhead.media = None;
        playhead.running_since = None;
        playhead.disposed = true;
        Ok(())
    }
}
