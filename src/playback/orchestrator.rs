use anyhow::{Result, anyhow};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use super::queue::{ItemSource, PlaybackSchedule};
use crate::config::PlaybackConfig;
use crate::download::VideoStore;
use crate::events::EventBus;
use crate::models::{CampaignId, OrchestratorState, PlaybackItem, PlaybackMode};
use crate::player::{PlayerStatus, VideoPlayer};

/// Why the orchestrator was asked to pick the next item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceReason {
    Completed,
    Error,
    Override,
    ModeChange,
    Expired,
    NewContent,
    PlaybackEnabled,
    Requested,
}

impl AdvanceReason {
    /// Forced advances survive an in-flight load and run once it settles
    fn is_forced(&self) -> bool {
        matches!(self, Self::Override | Self::ModeChange | Self::Expired)
    }
}

/// Diagnostic view of the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSnapshot {
    pub state: OrchestratorState,
    pub current: Option<PlaybackItem>,
    pub mode: PlaybackMode,
    pub campaign_id: Option<CampaignId>,
    pub override_queue_len: usize,
    pub general_queue_len: usize,
    pub campaign_len: usize,
    pub campaign_index: usize,
    pub ambient_len: usize,
    pub ambient_index: usize,
    pub location_pool_len: usize,
    pub location_campaign_id: Option<CampaignId>,
    pub playback_enabled: bool,
    pub advance_in_flight: bool,
}

/// Commands processed by the orchestrator loop
#[derive(Debug)]
pub enum OrchestratorCommand {
    Play {
        item: PlaybackItem,
    },
    AddLocationAd {
        item: PlaybackItem,
    },
    StartCampaign {
        campaign_id: CampaignId,
        items: Vec<PlaybackItem>,
    },
    RevertToLocal,
    SetPlaybackEnabled {
        enabled: bool,
    },
    UpdateLibrary {
        items: Vec<PlaybackItem>,
    },
    Advance {
        reason: AdvanceReason,
    },
    ExpireLocationAds,
    Snapshot {
        respond_to: oneshot::Sender<OrchestratorSnapshot>,
    },
    Dispose {
        respond_to: oneshot::Sender<()>,
    },
    /// Delayed advance; stale once another item has been started
    ScheduledAdvance {
        generation: u64,
        reason: AdvanceReason,
    },
    LoadFinished {
        generation: u64,
        result: std::result::Result<(), String>,
    },
    PlaybackFinished {
        generation: u64,
    },
    PlaybackFailed {
        generation: u64,
        message: String,
    },
}

/// Natural end of an item, judged from what the player reports
pub fn is_natural_completion(
    looping: bool,
    playing: bool,
    position: Option<Duration>,
    duration: Option<Duration>,
    threshold: f64,
) -> bool {
    if looping || playing {
        return false;
    }
    match (position, duration) {
        (Some(position), Some(duration)) if !duration.is_zero() => {
            position.as_secs_f64() >= duration.as_secs_f64() * threshold
        }
        _ => false,
    }
}

/// The playback state machine.
///
/// Every input (push commands, download completions, location expiry, player
/// signals, timers) arrives as an [`OrchestratorCommand`] on a single queue, so
/// transitions are serialized. Player initialization runs on a spawned task and
/// reports back with `LoadFinished`; while it is outstanding further advances
/// are dropped, except forced ones, which are deferred until the load settles.
pub struct PlaybackOrchestrator {
    player: Arc<dyn VideoPlayer>,
    store: Arc<VideoStore>,
    events: Arc<EventBus>,
    config: PlaybackConfig,
    liveness_window: Duration,
    receiver: mpsc::UnboundedReceiver<OrchestratorCommand>,
    sender: mpsc::WeakUnboundedSender<OrchestratorCommand>,

    schedule: PlaybackSchedule,
    mode: PlaybackMode,
    state: OrchestratorState,
    current: Option<PlaybackItem>,
    playback_enabled: bool,
    advance_in_flight: bool,
    pending_interrupt: bool,
    generation: u64,

    load_task: Option<JoinHandle<()>>,
    monitor_task: Option<JoinHandle<()>>,
    advance_timer: Option<JoinHandle<()>>,
}

impl PlaybackOrchestrator {
    pub fn new(
        player: Arc<dyn VideoPlayer>,
        store: Arc<VideoStore>,
        events: Arc<EventBus>,
        config: PlaybackConfig,
        liveness_window: Duration,
    ) -> (OrchestratorHandle, PlaybackOrchestrator) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let playback_enabled = config.start_enabled;

        let orchestrator = PlaybackOrchestrator {
            player,
            store,
            events,
            config,
            liveness_window,
            receiver,
            sender: sender.downgrade(),
            schedule: PlaybackSchedule::new(),
            mode: PlaybackMode::Local,
            state: OrchestratorState::Idle,
            current: None,
            playback_enabled,
            advance_in_flight: false,
            pending_interrupt: false,
            generation: 0,
            load_task: None,
            monitor_task: None,
            advance_timer: None,
        };

        (OrchestratorHandle { sender }, orchestrator)
    }

    /// Run the command loop until disposed or every handle is dropped
    pub async fn run(mut self) {
        debug!("Playback orchestrator started");

        while let Some(command) = self.receiver.recv().await {
            match command {
                OrchestratorCommand::Play { item } => self.on_play(item).await,
                OrchestratorCommand::AddLocationAd { item } => self.on_location_ad(item).await,
                OrchestratorCommand::StartCampaign { campaign_id, items } => {
                    self.on_start_campaign(campaign_id, items).await
                }
                OrchestratorCommand::RevertToLocal => self.on_revert_to_local().await,
                OrchestratorCommand::SetPlaybackEnabled { enabled } => {
                    self.on_playback_enabled(enabled).await
                }
                OrchestratorCommand::UpdateLibrary { items } => self.on_update_library(items).await,
                OrchestratorCommand::Advance { reason } => self.advance(reason).await,
                OrchestratorCommand::ExpireLocationAds => self.on_expire_location_ads().await,
                OrchestratorCommand::Snapshot { respond_to } => {
                    let _ = respond_to.send(self.snapshot());
                }
                OrchestratorCommand::Dispose { respond_to } => {
                    self.dispose().await;
                    let _ = respond_to.send(());
                    break;
                }
                OrchestratorCommand::ScheduledAdvance { generation, reason } => {
                    if generation == self.generation {
                        self.advance_timer = None;
                        self.advance(reason).await;
                    } else {
                        trace!("Ignoring stale scheduled advance");
                    }
                }
                OrchestratorCommand::LoadFinished { generation, result } => {
                    self.on_load_finished(generation, result).await
                }
                OrchestratorCommand::PlaybackFinished { generation } => {
                    self.on_playback_finished(generation).await
                }
                OrchestratorCommand::PlaybackFailed {
                    generation,
                    message,
                } => {
                    if generation == self.generation {
                        self.monitor_task = None;
                        self.fail_current(message).await;
                    }
                }
            }
        }

        debug!("Playback orchestrator stopped");
    }

    fn snapshot(&self) -> OrchestratorSnapshot {
        OrchestratorSnapshot {
            state: self.state,
            current: self.current.clone(),
            mode: self.mode,
            campaign_id: self.schedule.campaign_id().cloned(),
            override_queue_len: self.schedule.override_len(),
            general_queue_len: self.schedule.general_len(),
            campaign_len: self.schedule.campaign_len(),
            campaign_index: self.schedule.campaign_index(),
            ambient_len: self.schedule.ambient_len(),
            ambient_index: self.schedule.ambient_index(),
            location_pool_len: self.schedule.pool().len(),
            location_campaign_id: self.schedule.pool().campaign_id().cloned(),
            playback_enabled: self.playback_enabled,
            advance_in_flight: self.advance_in_flight,
        }
    }

    async fn set_state(&mut self, state: OrchestratorState) {
        if self.state != state {
            debug!("Orchestrator {} -> {}", self.state, state);
            self.state = state;
        }
        self.events
            .emit_state_changed(state, self.current.clone())
            .await;
    }

    fn is_settled_idle(&self) -> bool {
        !self.advance_in_flight
            && matches!(self.state, OrchestratorState::Idle | OrchestratorState::Error)
    }

    /// Request an advance that must not be lost to an in-flight load
    async fn force_advance(&mut self, reason: AdvanceReason) {
        if self.advance_in_flight {
            debug!("Load in flight, deferring {:?} advance", reason);
            self.pending_interrupt = true;
        } else {
            self.advance(reason).await;
        }
    }

    async fn on_play(&mut self, item: PlaybackItem) {
        info!(
            "Queued {} ({}, override: {})",
            item.filename(),
            item.trigger(),
            item.is_override()
        );
        if item.is_override() {
            self.schedule.push_override(item);
            self.force_advance(AdvanceReason::Override).await;
        } else if item.is_location_based() {
            self.on_location_ad(item).await;
        } else {
            self.schedule.push_general(item);
            if self.is_settled_idle() {
                self.advance(AdvanceReason::NewContent).await;
            }
        }
    }

    async fn on_location_ad(&mut self, item: PlaybackItem) {
        debug!("Location ad {} for campaign {:?}", item.ad_id(), item.campaign_id());
        self.schedule.add_location_ad(item, Instant::now());
        if self.is_settled_idle() {
            self.advance(AdvanceReason::NewContent).await;
        }
    }

    async fn on_start_campaign(&mut self, campaign_id: CampaignId, items: Vec<PlaybackItem>) {
        if items.is_empty() {
            debug!("Campaign {} has an empty playlist, ignoring", campaign_id);
            return;
        }

        info!("Starting campaign {} with {} items", campaign_id, items.len());
        self.schedule.start_campaign(campaign_id.clone(), items);
        self.mode = PlaybackMode::Campaign;
        self.events
            .emit_mode_changed(self.mode, Some(campaign_id), "campaign_started")
            .await;
        self.force_advance(AdvanceReason::ModeChange).await;
    }

    async fn on_revert_to_local(&mut self) {
        info!("Reverting to local playback");
        self.schedule.revert_to_local();
        self.mode = PlaybackMode::Local;
        self.events
            .emit_mode_changed(self.mode, None, "reverted_to_local")
            .await;

        if !self.advance_in_flight {
            self.stop_monitor();
            if let Err(e) = self.player.stop().await {
                warn!("Failed to stop player: {:#}", e);
            }
        }
        self.force_advance(AdvanceReason::ModeChange).await;
    }

    async fn on_playback_enabled(&mut self, enabled: bool) {
        self.playback_enabled = enabled;

        match self.state {
            OrchestratorState::Loading => {
                debug!("Playback enabled={} noted, applied once loading settles", enabled);
            }
            OrchestratorState::Playing if !enabled => match self.player.pause().await {
                Ok(()) => self.set_state(OrchestratorState::Paused).await,
                Err(e) => warn!("Failed to pause: {:#}", e),
            },
            OrchestratorState::Paused if enabled => match self.player.play().await {
                Ok(()) => self.set_state(OrchestratorState::Playing).await,
                Err(e) => warn!("Failed to resume: {:#}", e),
            },
            OrchestratorState::Idle if enabled => {
                self.advance(AdvanceReason::PlaybackEnabled).await;
            }
            _ => {}
        }
    }

    async fn on_update_library(&mut self, items: Vec<PlaybackItem>) {
        debug!("Ambient library now has {} items", items.len());
        self.schedule.set_ambient(items);
        if self.state == OrchestratorState::Idle && !self.advance_in_flight {
            self.advance(AdvanceReason::NewContent).await;
        }
    }

    async fn on_expire_location_ads(&mut self) {
        let expired = self
            .schedule
            .pool_mut()
            .expire(Instant::now(), self.liveness_window);
        if expired.is_empty() {
            return;
        }
        info!("Discarded {} expired location ads", expired.len());

        let current_expired = self.current.as_ref().is_some_and(|current| {
            current.is_location_based()
                && expired
                    .iter()
                    .any(|item| item.ad_id() == current.ad_id())
        });
        let mounted = matches!(
            self.state,
            OrchestratorState::Loading | OrchestratorState::Playing | OrchestratorState::Paused
        );
        if current_expired && mounted {
            info!("Current location ad expired, moving on");
            self.force_advance(AdvanceReason::Expired).await;
        }
    }

    /// Pick the next item and start it. Single-flight: while a load is
    /// outstanding a plain advance is dropped.
    async fn advance(&mut self, reason: AdvanceReason) {
        if self.advance_in_flight {
            if reason.is_forced() {
                self.pending_interrupt = true;
                debug!("Load in flight, deferring {:?} advance", reason);
            } else {
                debug!("Load in flight, dropping {:?} advance", reason);
            }
            return;
        }

        self.cancel_advance_timer();

        match self.schedule.next(self.mode) {
            Some((item, source)) => {
                debug!("Advancing ({:?}) to {} from {}", reason, item.filename(), source);
                self.start_item(item, source).await;
            }
            None => {
                debug!("Nothing to play ({:?})", reason);
                self.stop_monitor();
                if self.current.take().is_some() {
                    if let Err(e) = self.player.stop().await {
                        warn!("Failed to stop player: {:#}", e);
                    }
                }
                self.set_state(OrchestratorState::Idle).await;
            }
        }
    }

    async fn start_item(&mut self, item: PlaybackItem, source: ItemSource) {
        self.generation += 1;
        self.stop_monitor();

        let path = match self.resolve(&item) {
            Some(path) => path,
            None => {
                self.on_missing_file(item, source).await;
                return;
            }
        };

        let Some(sender) = self.sender.upgrade() else {
            warn!("Orchestrator is shutting down, not starting {}", item.filename());
            return;
        };

        info!("Loading {} ({})", item.filename(), source);
        self.current = Some(item);
        self.advance_in_flight = true;
        self.set_state(OrchestratorState::Loading).await;

        let player = self.player.clone();
        let generation = self.generation;
        self.load_task = Some(tokio::spawn(async move {
            if let Err(e) = player.stop().await {
                debug!("Stopping previous media failed: {:#}", e);
            }
            let result = player
                .initialize(&path)
                .await
                .map_err(|e| format!("{:#}", e));
            let _ = sender.send(OrchestratorCommand::LoadFinished { generation, result });
        }));
    }

    fn resolve(&self, item: &PlaybackItem) -> Option<PathBuf> {
        match self.store.path_for(item.filename()) {
            Ok(path) if path.is_file() => Some(path),
            Ok(_) => None,
            Err(e) => {
                warn!("Unusable filename {}: {}", item.filename(), e);
                None
            }
        }
    }

    async fn on_missing_file(&mut self, item: PlaybackItem, source: ItemSource) {
        warn!("Video file missing for {} ({})", item.filename(), source);

        if let Err(e) = self.player.stop().await {
            debug!("Failed to stop player: {:#}", e);
        }
        self.current = Some(item.clone());
        self.set_state(OrchestratorState::Error).await;
        self.events
            .emit_playback_error(item.clone(), format!("file not found: {}", item.filename()))
            .await;

        match source {
            ItemSource::Ambient => {
                self.schedule.remove_ambient(item.filename());
            }
            _ => {
                if item.is_location_based() {
                    self.schedule.pool_mut().remove(item.ad_id());
                }
                if source == ItemSource::Campaign && !item.ad_id().is_known() {
                    self.schedule.remove_campaign(item.filename());
                }
                if item.ad_id().is_known() {
                    self.events
                        .emit_download_required(item.ad_id().clone(), item)
                        .await;
                } else {
                    warn!(
                        "Dropping {}: no advertisement id to download it with",
                        item.filename()
                    );
                }
            }
        }

        self.schedule_advance(self.config.error_retry_delay(), AdvanceReason::Error);
    }

    async fn on_load_finished(
        &mut self,
        generation: u64,
        result: std::result::Result<(), String>,
    ) {
        if generation != self.generation {
            trace!("Ignoring stale load result");
            return;
        }
        self.advance_in_flight = false;
        self.load_task = None;

        if self.pending_interrupt {
            self.pending_interrupt = false;
            debug!("Running deferred advance");
            self.advance(AdvanceReason::Override).await;
            return;
        }

        if let Err(message) = result {
            self.fail_current(message).await;
            return;
        }

        let Some(item) = self.current.clone() else {
            return;
        };

        let started = if self.playback_enabled {
            self.player.play().await
        } else {
            self.player.pause().await
        };
        if let Err(e) = started {
            self.fail_current(format!("{:#}", e)).await;
            return;
        }

        let state = if self.playback_enabled {
            OrchestratorState::Playing
        } else {
            OrchestratorState::Paused
        };
        self.set_state(state).await;
        info!("Playing {}", item.filename());
        self.events.emit_playback_started(item).await;
        self.start_monitor(generation);
    }

    async fn on_playback_finished(&mut self, generation: u64) {
        if generation != self.generation || self.monitor_task.take().is_none() {
            trace!("Ignoring duplicate or stale completion");
            return;
        }
        let Some(item) = self.current.clone() else {
            return;
        };

        info!("Finished {}", item.filename());
        self.events.emit_playback_completed(item).await;
        self.schedule_advance(self.config.settle_delay(), AdvanceReason::Completed);
    }

    async fn fail_current(&mut self, message: String) {
        self.stop_monitor();
        let item = self.current.clone();
        match &item {
            Some(item) => error!("Playback of {} failed: {}", item.filename(), message),
            None => error!("Playback failed: {}", message),
        }
        self.set_state(OrchestratorState::Error).await;
        if let Some(item) = item {
            self.events.emit_playback_error(item, message).await;
        }
        self.schedule_advance(self.config.error_retry_delay(), AdvanceReason::Error);
    }

    fn start_monitor(&mut self, generation: u64) {
        let Some(sender) = self.sender.upgrade() else {
            return;
        };
        let player = self.player.clone();
        let poll = self.config.poll_interval();
        let threshold = self.config.completion_threshold;

        self.monitor_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let command = match player.status().await {
                    PlayerStatus::Error(message) => Some(OrchestratorCommand::PlaybackFailed {
                        generation,
                        message,
                    }),
                    PlayerStatus::Ended => Some(OrchestratorCommand::PlaybackFinished { generation }),
                    _ => {
                        let finished = is_natural_completion(
                            player.is_looping(),
                            player.is_playing().await,
                            player.position().await,
                            player.duration().await,
                            threshold,
                        );
                        finished.then_some(OrchestratorCommand::PlaybackFinished { generation })
                    }
                };
                if let Some(command) = command {
                    let _ = sender.send(command);
                    break;
                }
            }
        }));
    }

    fn stop_monitor(&mut self) {
        if let Some(task) = self.monitor_task.take() {
            task.abort();
        }
    }

    fn schedule_advance(&mut self, delay: Duration, reason: AdvanceReason) {
        self.cancel_advance_timer();
        let Some(sender) = self.sender.upgrade() else {
            return;
        };
        let generation = self.generation;
        trace!("Advance ({:?}) scheduled in {:?}", reason, delay);
        self.advance_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender.send(OrchestratorCommand::ScheduledAdvance { generation, reason });
        }));
    }

    fn cancel_advance_timer(&mut self) {
        if let Some(timer) = self.advance_timer.take() {
            timer.abort();
        }
    }

    async fn dispose(&mut self) {
        info!("Disposing playback orchestrator");
        self.cancel_advance_timer();
        self.stop_monitor();
        if let Some(task) = self.load_task.take() {
            task.abort();
        }
        // Late results from aborted tasks must not match
        self.generation += 1;
        self.advance_in_flight = false;
        self.pending_interrupt = false;

        if let Err(e) = self.player.stop().await {
            warn!("Failed to stop player during dispose: {:#}", e);
        }
        if let Err(e) = self.player.dispose().await {
            warn!("Failed to dispose player: {:#}", e);
        }

        self.schedule.clear();
        self.current = None;
        self.state = OrchestratorState::Idle;
    }
}

/// Handle to send commands to the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    sender: mpsc::UnboundedSender<OrchestratorCommand>,
}

impl OrchestratorHandle {
    fn send(&self, command: OrchestratorCommand) -> Result<()> {
        self.sender
            .send(command)
            .map_err(|_| anyhow!("Playback orchestrator stopped"))
    }

    /// Queue a pushed item; overrides preempt whatever is playing
    pub fn play(&self, item: PlaybackItem) -> Result<()> {
        self.send(OrchestratorCommand::Play { item })
    }

    pub fn add_location_ad(&self, item: PlaybackItem) -> Result<()> {
        self.send(OrchestratorCommand::AddLocationAd { item })
    }

    pub fn start_campaign(&self, campaign_id: CampaignId, items: Vec<PlaybackItem>) -> Result<()> {
        self.send(OrchestratorCommand::StartCampaign { campaign_id, items })
    }

    pub fn revert_to_local(&self) -> Result<()> {
        self.send(OrchestratorCommand::RevertToLocal)
    }

    pub fn set_playback_enabled(&self, enabled: bool) -> Result<()> {
        self.send(OrchestratorCommand::SetPlaybackEnabled { enabled })
    }

    pub fn update_library(&self, items: Vec<PlaybackItem>) -> Result<()> {
        self.send(OrchestratorCommand::UpdateLibrary { items })
    }

    pub fn advance(&self) -> Result<()> {
        self.send(OrchestratorCommand::Advance {
            reason: AdvanceReason::Requested,
        })
    }

    pub fn expire_location_ads(&self) -> Result<()> {
        self.send(OrchestratorCommand::ExpireLocationAds)
    }

    pub async fn snapshot(&self) -> Result<OrchestratorSnapshot> {
        let (respond_to, response) = oneshot::channel();
        self.send(OrchestratorCommand::Snapshot { respond_to })?;
        response
            .await
            .map_err(|_| anyhow!("Failed to receive response from playback orchestrator"))
    }

    pub async fn dispose(&self) -> Result<()> {
        let (respond_to, response) = oneshot::channel();
        self.send(OrchestratorCommand::Dispose { respond_to })?;
        response
            .await
            .map_err(|_| anyhow!("Failed to receive response from playback orchestrator"))
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
