use serde::{Deserialize, Serialize};

use crate::models::{AdId, CampaignId, OrchestratorState, PlaybackItem, PlaybackMode};

/// Event published by the playback orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerEvent {
    pub id: String,
    pub event_type: EventType,
    pub payload: EventPayload,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl PlayerEvent {
    pub fn new(event_type: EventType, payload: EventPayload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            payload,
            timestamp: chrono::Utc::now(),
        }
    }

    /// The item this event refers to, if any
    pub fn item(&self) -> Option<&PlaybackItem> {
        match &self.payload {
            EventPayload::State { item, .. } => item.as_ref(),
            EventPayload::Playback { item, .. } => Some(item),
            EventPayload::Mode { .. } | EventPayload::Download { .. } => None,
        }
    }
}

/// Event types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventType {
    StateChanged,
    PlaybackStarted,
    PlaybackCompleted,
    PlaybackError,
    ModeChanged,
    DownloadRequired,
}

/// Event payload containing specific data for each event type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    State {
        state: OrchestratorState,
        item: Option<PlaybackItem>,
    },
    Playback {
        item: PlaybackItem,
        message: Option<String>,
    },
    Mode {
        mode: PlaybackMode,
        campaign_id: Option<CampaignId>,
        reason: String,
    },
    Download {
        ad_id: AdId,
        item: PlaybackItem,
    },
}

impl EventType {
    /// Get a string representation for filtering/routing
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::StateChanged => "playback.state_changed",
            EventType::PlaybackStarted => "playback.started",
            EventType::PlaybackCompleted => "playback.completed",
            EventType::PlaybackError => "playback.error",
            EventType::ModeChanged => "playback.mode_changed",
            EventType::DownloadRequired => "download.required",
        }
    }
}
