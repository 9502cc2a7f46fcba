use super::types::{EventPayload, EventType, PlayerEvent};
use crate::models::{AdId, CampaignId, OrchestratorState, PlaybackItem, PlaybackMode};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tracing::trace;

/// Event subscriber handle
pub struct EventSubscriber {
    receiver: broadcast::Receiver<PlayerEvent>,
    filter: Option<Vec<EventType>>,
}

impl EventSubscriber {
    pub fn new(receiver: broadcast::Receiver<PlayerEvent>, filter: Option<Vec<EventType>>) -> Self {
        Self { receiver, filter }
    }

    fn matches(&self, event: &PlayerEvent) -> bool {
        match self.filter {
            Some(ref types) => types.contains(&event.event_type),
            None => true,
        }
    }

    /// Receive the next event matching the filter
    pub async fn recv(&mut self) -> Result<PlayerEvent> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Try to receive without blocking
    pub fn try_recv(&mut self) -> Result<Option<PlayerEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Broadcasts orchestrator events to the router and any rendering layer
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<PlayerEvent>,
    stats: Arc<RwLock<EventBusStats>>,
    event_history: Arc<RwLock<Vec<PlayerEvent>>>,
    max_history_size: usize,
}

#[derive(Debug, Default, Clone)]
pub struct EventBusStats {
    pub total_events: u64,
    pub events_by_type: HashMap<String, u64>,
    pub subscriber_count: usize,
    pub dropped_events: u64,
}

impl EventBus {
    /// Create a new event bus with specified buffer capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);

        Self {
            sender,
            stats: Arc::new(RwLock::new(EventBusStats::default())),
            event_history: Arc::new(RwLock::new(Vec::new())),
            max_history_size: 100,
        }
    }

    /// Publish an event to all subscribers
    pub async fn publish(&self, event: PlayerEvent) {
        trace!("Publishing event: {}", event.event_type.as_str());

        {
            let mut stats = self.stats.write().await;
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type.as_str().to_string())
                .or_insert(0) += 1;
        }

        {
            let mut history = self.event_history.write().await;
            history.push(event.clone());

            if history.len() > self.max_history_size {
                let excess = history.len() - self.max_history_size;
                history.drain(0..excess);
            }
        }

        if self.sender.send(event).is_err() {
            // No subscribers is normal, don't log
            self.stats.write().await.dropped_events += 1;
        }
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber::new(self.sender.subscribe(), None)
    }

    /// Subscribe to specific event types
    pub fn subscribe_to_types(&self, types: Vec<EventType>) -> EventSubscriber {
        EventSubscriber::new(self.sender.subscribe(), Some(types))
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub async fn get_stats(&self) -> EventBusStats {
        let mut stats = self.stats.read().await.clone();
        stats.subscriber_count = self.subscriber_count();
        stats
    }

    /// Get event history for debugging
    pub async fn get_history(&self) -> Vec<PlayerEvent> {
        self.event_history.read().await.clone()
    }

    pub async fn emit_state_changed(&self, state: OrchestratorState, item: Option<PlaybackItem>) {
        self.publish(PlayerEvent::new(
            EventType::StateChanged,
            EventPayload::State { state, item },
        ))
        .await
    }

    pub async fn emit_playback_started(&self, item: PlaybackItem) {
        self.publish(PlayerEvent::new(
            EventType::PlaybackStarted,
            EventPayload::Playback {
                item,
                message: None,
            },
        ))
        .await
    }

    pub async fn emit_playback_completed(&self, item: PlaybackItem) {
        self.publish(PlayerEvent::new(
            EventType::PlaybackCompleted,
            EventPayload::Playback {
                item,
                message: None,
            },
        ))
        .await
    }

    pub async fn emit_playback_error(&self, item: PlaybackItem, message: String) {
        self.publish(PlayerEvent::new(
            EventType::PlaybackError,
            EventPayload::Playback {
                item,
                message: Some(message),
            },
        ))
        .await
    }

    pub async fn emit_mode_changed(
        &self,
        mode: PlaybackMode,
        campaign_id: Option<CampaignId>,
        reason: &str,
    ) {
        self.publish(PlayerEvent::new(
            EventType::ModeChanged,
            EventPayload::Mode {
                mode,
                campaign_id,
                reason: reason.to_string(),
            },
        ))
        .await
    }

    pub async fn emit_download_required(&self, ad_id: AdId, item: PlaybackItem) {
        self.publish(PlayerEvent::new(
            EventType::DownloadRequired,
            EventPayload::Download { ad_id, item },
        ))
        .await
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
