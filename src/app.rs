use anyhow::{Context, Result, anyhow};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::download::{DownloadApi, DownloadEngine, DownloadProgress, DownloadStatus, VideoStore};
use crate::events::{EventBus, EventPayload, EventType, PlayerEvent};
use crate::location::{LocationTracker, PositionProvider};
use crate::models::{AdId, PlaybackItem};
use crate::player::VideoPlayer;
use crate::playback::{OrchestratorHandle, PlaybackOrchestrator};
use crate::protocol::{
    DownloadCommand, InboundCommand, MessageTransport, OutboundMessage, PlaybackReport,
    ProtocolHandle, ProtocolHandler,
};

/// External collaborators the application is assembled from
pub struct Capabilities {
    pub transport: Arc<dyn MessageTransport>,
    pub download_api: Arc<dyn DownloadApi>,
    pub player: Arc<dyn VideoPlayer>,
    pub positions: Arc<dyn PositionProvider>,
}

/// What to do once a followed download completes
#[derive(Debug, Clone)]
enum FollowUp {
    None,
    /// Location-triggered ad: goes into the location pool
    LocationAd(PlaybackItem),
    /// Item that failed to start because its file was missing
    Resubmit(PlaybackItem),
}

/// Routes traffic between the components. Cheap to clone into tasks.
#[derive(Clone)]
struct Router {
    protocol: ProtocolHandle,
    downloads: Arc<DownloadEngine>,
    orchestrator: OrchestratorHandle,
    tracker: Arc<LocationTracker>,
    cancel: CancellationToken,
}

impl Router {
    async fn handle_command(&self, command: InboundCommand) {
        let outcome = match command {
            InboundCommand::Play(play) => self.orchestrator.play(play.into_item()),
            InboundCommand::Download(download) => {
                self.handle_download(download).await;
                Ok(())
            }
            InboundCommand::StartCampaign(campaign) => {
                if campaign.playlist.is_empty() {
                    debug!("Ignoring campaign {} with empty playlist", campaign.campaign_id);
                    Ok(())
                } else {
                    let items = campaign.items();
                    self.orchestrator.start_campaign(campaign.campaign_id, items)
                }
            }
            InboundCommand::RevertToLocal => self.orchestrator.revert_to_local(),
            InboundCommand::LocationAck(ack) => {
                if self.tracker.on_ack(&ack).await {
                    self.orchestrator.expire_location_ads()
                } else {
                    Ok(())
                }
            }
            other => {
                trace!("No routing for {}", other.name());
                Ok(())
            }
        };

        if let Err(e) = outcome {
            warn!("Failed to route inbound command: {:#}", e);
        }
    }

    async fn handle_download(&self, command: DownloadCommand) {
        let ad_id = command.ad_id.clone();
        let item = command.to_item();
        let follow_up = if item.is_location_based() {
            FollowUp::LocationAd(item)
        } else {
            FollowUp::None
        };

        let started = self.downloads.start_download(&ad_id).await;
        if !started {
            debug!("Download for {} already running, attaching", ad_id);
        }
        self.follow(&ad_id, started, follow_up).await;
    }

    /// Recover an item whose file vanished from the store
    async fn request_download(&self, ad_id: AdId, item: PlaybackItem) {
        let started = self.downloads.start_download(&ad_id).await;
        let message = OutboundMessage::DownloadRequest {
            device_id: self.protocol.device_id().clone(),
            ad_id: ad_id.clone(),
        };
        self.protocol.send(message).await;
        self.follow(&ad_id, started, FollowUp::Resubmit(item)).await;
    }

    async fn follow(&self, ad_id: &AdId, report: bool, follow_up: FollowUp) {
        let Some(receiver) = self.downloads.subscribe(ad_id).await else {
            warn!("No download task to follow for {}", ad_id);
            return;
        };
        let router = self.clone();
        tokio::spawn(async move {
            router.follow_download(receiver, report, follow_up).await;
        });
    }

    async fn follow_download(
        &self,
        mut receiver: watch::Receiver<DownloadProgress>,
        report: bool,
        follow_up: FollowUp,
    ) {
        let mut last_sent: Option<DownloadProgress> = None;

        let settled = loop {
            let progress = receiver.borrow_and_update().clone();
            if report && last_sent.as_ref() != Some(&progress) {
                self.protocol
                    .send(OutboundMessage::DownloadStatus(progress.clone()))
                    .await;
                last_sent = Some(progress.clone());
            }
            if progress.status.is_terminal() {
                break Some(progress);
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break None,
                changed = receiver.changed() => {
                    if changed.is_err() {
                        break None;
                    }
                }
            }
        };

        let Some(progress) = settled else {
            return;
        };
        if progress.status != DownloadStatus::Completed {
            debug!("Download for {} ended as {}", progress.ad_id, progress.status);
            return;
        }

        // Must precede the rescan, or an idle orchestrator starts the library copy instead
        let outcome = match follow_up {
            FollowUp::None => Ok(()),
            FollowUp::LocationAd(item) => self.orchestrator.add_location_ad(item),
            FollowUp::Resubmit(item) if item.is_location_based() => {
                self.orchestrator.add_location_ad(item)
            }
            FollowUp::Resubmit(item) => self.orchestrator.play(item),
        };
        if let Err(e) = outcome {
            warn!("Failed to schedule downloaded item: {:#}", e);
        }

        if let Err(e) = self.refresh_library().await {
            warn!("Library refresh failed: {:#}", e);
        }
    }

    async fn refresh_library(&self) -> Result<usize> {
        let files = self
            .downloads
            .store()
            .scan_library()
            .await
            .context("Failed to scan videos directory")?;

        let mut items = Vec::with_capacity(files.len());
        for filename in files {
            let ad_id = self.downloads.completed_ad_for(&filename).await;
            items.push(PlaybackItem::ambient(filename, ad_id));
        }
        let count = items.len();
        self.orchestrator.update_library(items)?;
        debug!("Ambient library refreshed ({} videos)", count);
        Ok(count)
    }

    async fn forward_event(&self, event: PlayerEvent) {
        let device_id = self.protocol.device_id().clone();
        let message = match (event.event_type, event.payload) {
            (EventType::PlaybackStarted, EventPayload::Playback { item, .. }) => {
                OutboundMessage::PlaybackStarted(PlaybackReport::new(device_id, &item))
            }
            (EventType::PlaybackCompleted, EventPayload::Playback { item, .. }) => {
                OutboundMessage::PlaybackCompleted(PlaybackReport::new(device_id, &item))
            }
            (EventType::PlaybackError, EventPayload::Playback { item, message }) => {
                let report = PlaybackReport::new(device_id, &item);
                OutboundMessage::PlaybackError(match message {
                    Some(message) => report.with_error(message),
                    None => report,
                })
            }
            (
                EventType::ModeChanged,
                EventPayload::Mode {
                    mode,
                    campaign_id,
                    reason,
                },
            ) => OutboundMessage::PlaybackModeChange {
                device_id,
                mode,
                campaign_id,
                reason,
                timestamp: event.timestamp,
            },
            (EventType::DownloadRequired, EventPayload::Download { ad_id, item }) => {
                self.request_download(ad_id, item).await;
                return;
            }
            _ => return,
        };
        self.protocol.send(message).await;
    }
}

/// The assembled device: protocol, downloads, location tracking and playback
pub struct App {
    config: Config,
    events: Arc<EventBus>,
    router: Router,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl App {
    /// Build every component, start the background loops and load the library
    pub async fn start(config: Config, capabilities: Capabilities) -> Result<Self> {
        let videos_dir = config.download.videos_dir()?;
        let store = Arc::new(VideoStore::new(videos_dir));
        store
            .ensure_dir()
            .await
            .context("Failed to create videos directory")?;
        info!("Videos stored in {:?}", store.dir());

        let events = Arc::new(EventBus::default());
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let (protocol, handler) = ProtocolHandler::new(
            capabilities.transport,
            config.device_id(),
            config.server.clone(),
        );
        let mut commands = protocol
            .take_command_receiver()
            .await
            .ok_or_else(|| anyhow!("Protocol command stream already taken"))?;
        tasks.push(tokio::spawn(handler.run()));

        let downloads = Arc::new(DownloadEngine::new(
            capabilities.download_api,
            store.clone(),
            config.download.clone(),
        ));

        let (orchestrator, engine) = PlaybackOrchestrator::new(
            capabilities.player,
            store,
            events.clone(),
            config.playback.clone(),
            config.location.liveness_window(),
        );
        tasks.push(tokio::spawn(engine.run()));

        let tracker = Arc::new(LocationTracker::new(
            capabilities.positions,
            protocol.clone(),
            config.location.clone(),
        ));

        let router = Router {
            protocol,
            downloads,
            orchestrator,
            tracker: tracker.clone(),
            cancel: cancel.clone(),
        };

        // Inbound commands
        let inbound = router.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = inbound.cancel.cancelled() => break,
                    command = commands.recv() => match command {
                        Some(command) => inbound.handle_command(command).await,
                        None => break,
                    },
                }
            }
            debug!("Inbound command routing stopped");
        }));

        // Orchestrator events
        let outbound = router.clone();
        let mut subscriber = events.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = outbound.cancel.cancelled() => break,
                    event = subscriber.recv() => match event {
                        Ok(event) => outbound.forward_event(event).await,
                        Err(e) => match e.downcast_ref::<broadcast::error::RecvError>() {
                            Some(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!("Event forwarding lagged, {} events skipped", skipped);
                            }
                            _ => break,
                        },
                    },
                }
            }
            debug!("Event forwarding stopped");
        }));

        // Location expiry sweep
        let sweeper = router.clone();
        let sweep_interval = config.location.sweep_interval();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = sweeper.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if sweeper.orchestrator.expire_location_ads().is_err() {
                            break;
                        }
                    }
                }
            }
        }));

        tracker.start().await;
        router.refresh_library().await?;

        info!("Device {} started", router.protocol.device_id());
        Ok(Self {
            config,
            events,
            router,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn protocol(&self) -> &ProtocolHandle {
        &self.router.protocol
    }

    pub fn downloads(&self) -> &Arc<DownloadEngine> {
        &self.router.downloads
    }

    pub fn orchestrator(&self) -> &OrchestratorHandle {
        &self.router.orchestrator
    }

    pub fn tracker(&self) -> &Arc<LocationTracker> {
        &self.router.tracker
    }

    /// Rescan the videos directory and hand the result to the ambient loop
    pub async fn refresh_library(&self) -> Result<usize> {
        self.router.refresh_library().await
    }

    /// Tear everything down, consumers before producers
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.router.cancel.cancel();
        self.router.tracker.stop().await;
        if let Err(e) = self.router.orchestrator.dispose().await {
            debug!("Orchestrator already stopped: {:#}", e);
        }
        self.router.downloads.dispose().await;
        self.router.protocol.shutdown();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
        info!("Shutdown complete");
    }
}
