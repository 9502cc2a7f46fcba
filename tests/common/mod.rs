pub mod mocks;

use builders::{TestConfigBuilder, write_video};
use mocks::{MockDownloadApi, MockPlayer, MockPositionProvider, MockTransport};
use reel_signage::config::Config;
use reel_signage::download::VideoStore;
use reel_signage::events::EventBus;
use reel_signage::playback::{OrchestratorHandle, OrchestratorSnapshot, PlaybackOrchestrator};
use reel_signage::{App, Capabilities};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Poll `check` until it holds or `timeout` elapses
pub async fn wait_for_async<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub const WAIT: Duration = Duration::from_secs(3);

/// A running orchestrator over a mock player and a temporary library
pub struct OrchestratorContext {
    pub handle: OrchestratorHandle,
    pub player: Arc<MockPlayer>,
    pub events: Arc<EventBus>,
    pub store: Arc<VideoStore>,
    _dir: TempDir,
}

impl OrchestratorContext {
    pub async fn new(player: MockPlayer) -> Self {
        Self::with_builder(player, |builder| builder).await
    }

    pub async fn with_builder(
        player: MockPlayer,
        configure: impl FnOnce(TestConfigBuilder) -> TestConfigBuilder,
    ) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = configure(TestConfigBuilder::new(dir.path())).build();

        let store = Arc::new(VideoStore::new(dir.path().to_path_buf()));
        let events = Arc::new(EventBus::default());
        let player = Arc::new(player);

        let (handle, orchestrator) = PlaybackOrchestrator::new(
            player.clone(),
            store.clone(),
            events.clone(),
            config.playback.clone(),
            config.location.liveness_window(),
        );
        tokio::spawn(orchestrator.run());

        Self {
            handle,
            player,
            events,
            store,
            _dir: dir,
        }
    }

    pub fn add_videos(&self, filenames: &[&str]) {
        for filename in filenames {
            write_video(self.store.dir(), filename);
        }
    }

    pub async fn snapshot(&self) -> OrchestratorSnapshot {
        self.handle
            .snapshot()
            .await
            .expect("Orchestrator should be running")
    }

    /// Wait until the orchestrator reports a state matching `check`
    pub async fn wait_until(&self, check: impl Fn(&OrchestratorSnapshot) -> bool) -> bool {
        let check = &check;
        wait_for_async(WAIT, || async move {
            self.handle
                .snapshot()
                .await
                .map(|snapshot| check(&snapshot))
                .unwrap_or(false)
        })
        .await
    }

    /// Wait for `filename` to be on screen, then let it run to its end
    pub async fn play_through(&self, filename: &str) {
        assert!(
            self.wait_until(|s| s.is_playing(filename)).await,
            "{} never started playing (now {:?})",
            filename,
            self.snapshot().await.current.map(|item| item.filename().to_string())
        );
        self.player.finish();
    }
}

/// Convenience checks over snapshots
pub trait SnapshotExt {
    fn is_playing(&self, filename: &str) -> bool;
    fn current_filename(&self) -> Option<String>;
}

impl SnapshotExt for OrchestratorSnapshot {
    fn is_playing(&self, filename: &str) -> bool {
        self.state == reel_signage::models::OrchestratorState::Playing
            && self.current_filename().as_deref() == Some(filename)
    }

    fn current_filename(&self) -> Option<String> {
        self.current.as_ref().map(|item| item.filename().to_string())
    }
}

/// A fully wired application over mock capabilities
pub struct AppContext {
    pub app: App,
    pub transport: Arc<MockTransport>,
    pub api: Arc<MockDownloadApi>,
    pub player: Arc<MockPlayer>,
    pub positions: Arc<MockPositionProvider>,
    pub videos_dir: PathBuf,
    _dir: TempDir,
}

impl AppContext {
    pub async fn start(api: MockDownloadApi) -> Self {
        Self::start_with(api, |builder| builder).await
    }

    pub async fn start_with(
        api: MockDownloadApi,
        configure: impl FnOnce(TestConfigBuilder) -> TestConfigBuilder,
    ) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let videos_dir = dir.path().join("videos");
        let config: Config = configure(TestConfigBuilder::new(&videos_dir)).build();

        let transport = Arc::new(MockTransport::new());
        let api = Arc::new(api);
        let player = Arc::new(MockPlayer::new());
        let positions = Arc::new(MockPositionProvider::new(-122.4194, 37.7749));

        let capabilities = Capabilities {
            transport: transport.clone(),
            download_api: api.clone(),
            player: player.clone(),
            positions: positions.clone(),
        };
        let app = App::start(config, capabilities)
            .await
            .expect("App should start");

        let context = Self {
            app,
            transport,
            api,
            player,
            positions,
            videos_dir,
            _dir: dir,
        };
        let transport = &context.transport;
        assert!(
            wait_for_async(WAIT, || async move { transport.count_sent("register") > 0 }).await,
            "Device never registered"
        );
        context
    }

    pub async fn snapshot(&self) -> OrchestratorSnapshot {
        self.app
            .orchestrator()
            .snapshot()
            .await
            .expect("Orchestrator should be running")
    }

    pub async fn wait_until(&self, check: impl Fn(&OrchestratorSnapshot) -> bool) -> bool {
        let check = &check;
        wait_for_async(WAIT, || async move {
            self.app
                .orchestrator()
                .snapshot()
                .await
                .map(|snapshot| check(&snapshot))
                .unwrap_or(false)
        })
        .await
    }

    pub async fn wait_for_sent(&self, event: &str, count: usize) -> bool {
        wait_for_async(WAIT, || async move { self.transport.count_sent(event) >= count }).await
    }
}
