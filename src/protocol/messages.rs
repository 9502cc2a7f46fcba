use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::download::DownloadProgress;
use crate::models::{AdId, CampaignId, DeviceId, PlaybackItem, PlaybackMode, TriggerKind};
use crate::utils::errors::ProtocolError;

/// Backend priorities may arrive as labels or numeric levels
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Priority {
    Level(i64),
    Label(String),
}

impl Priority {
    /// Labels that put an item at the front of the line
    pub fn is_override(&self) -> bool {
        match self {
            Priority::Label(label) => {
                let label = label.trim().to_ascii_lowercase();
                label == "override" || label == "urgent"
            }
            Priority::Level(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayCommand {
    pub filename: String,
    #[serde(default)]
    pub ad_id: Option<AdId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub trigger: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub campaign_id: Option<CampaignId>,
}

impl PlayCommand {
    pub fn into_item(self) -> PlaybackItem {
        let trigger = TriggerKind::from_wire(self.trigger.as_deref());
        let is_override = self.priority.as_ref().is_some_and(Priority::is_override);
        let ad_id = self
            .ad_id
            .filter(|id| !id.as_str().trim().is_empty())
            .unwrap_or_else(AdId::unknown);

        let mut item = PlaybackItem::new(self.filename, ad_id, trigger).with_campaign(self.campaign_id);
        if let Some(name) = self.name {
            item = item.with_name(name);
        }
        if is_override {
            item = item.as_override();
        }
        item
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadCommand {
    pub ad_id: AdId,
    pub filename: String,
    pub size: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub url: String,
    pub priority: Priority,
    pub trigger: String,
    #[serde(default)]
    pub campaign_id: Option<CampaignId>,
}

impl DownloadCommand {
    pub fn trigger_kind(&self) -> TriggerKind {
        TriggerKind::from_wire(Some(&self.trigger))
    }

    /// The item to schedule once the file is on disk
    pub fn to_item(&self) -> PlaybackItem {
        let item = PlaybackItem::new(self.filename.clone(), self.ad_id.clone(), self.trigger_kind())
            .with_campaign(self.campaign_id.clone());
        if self.priority.is_override() {
            item.as_override()
        } else {
            item
        }
    }
}

/// Campaign playlist entries are either bare filenames or objects
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CampaignEntry {
    Filename(String),
    #[serde(rename_all = "camelCase")]
    Detailed {
        filename: String,
        #[serde(default)]
        ad_id: Option<AdId>,
        #[serde(default)]
        name: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCampaignCommand {
    pub campaign_id: CampaignId,
    pub playlist: Vec<CampaignEntry>,
}

impl StartCampaignCommand {
    pub fn items(&self) -> Vec<PlaybackItem> {
        self.playlist
            .iter()
            .map(|entry| {
                let (filename, ad_id, name) = match entry {
                    CampaignEntry::Filename(filename) => (filename.clone(), None, None),
                    CampaignEntry::Detailed {
                        filename,
                        ad_id,
                        name,
                    } => (filename.clone(), ad_id.clone(), name.clone()),
                };
                let item = PlaybackItem::new(
                    filename,
                    ad_id.unwrap_or_else(AdId::unknown),
                    TriggerKind::BackendPush,
                )
                .with_campaign(Some(self.campaign_id.clone()));
                match name {
                    Some(name) => item.with_name(name),
                    None => item,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationAck {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl LocationAck {
    /// An ack without a pushed video means "nothing new for this position"
    pub fn has_pushed_video(&self) -> bool {
        self.filename
            .as_deref()
            .is_some_and(|name| !name.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ReasonPayload {
    #[serde(default, alias = "message")]
    reason: Option<String>,
}

/// A normalized inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundCommand {
    Play(PlayCommand),
    Download(DownloadCommand),
    StartCampaign(StartCampaignCommand),
    RevertToLocal,
    LocationAck(LocationAck),
    ForceDisconnect { reason: Option<String> },
    Connected,
    RegistrationSuccess,
    RegistrationError { message: Option<String> },
}

impl InboundCommand {
    pub fn parse(event: &str, payload: Value) -> Result<Self, ProtocolError> {
        let command = match event {
            "play" => Self::Play(decode(event, payload)?),
            "download" => Self::Download(decode(event, payload)?),
            "startCampaign" => Self::StartCampaign(decode(event, payload)?),
            "revertToLocal" => Self::RevertToLocal,
            "locationAck" => Self::LocationAck(decode(event, payload)?),
            "forceDisconnect" => {
                let payload: ReasonPayload = decode(event, payload)?;
                Self::ForceDisconnect {
                    reason: payload.reason,
                }
            }
            "connected" | "connection" => Self::Connected,
            "registrationSuccess" => Self::RegistrationSuccess,
            "registrationError" => {
                let payload: ReasonPayload = decode(event, payload)?;
                Self::RegistrationError {
                    message: payload.reason,
                }
            }
            other => return Err(ProtocolError::UnknownEvent(other.to_string())),
        };
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Play(_) => "play",
            Self::Download(_) => "download",
            Self::StartCampaign(_) => "startCampaign",
            Self::RevertToLocal => "revertToLocal",
            Self::LocationAck(_) => "locationAck",
            Self::ForceDisconnect { .. } => "forceDisconnect",
            Self::Connected => "connected",
            Self::RegistrationSuccess => "registrationSuccess",
            Self::RegistrationError { .. } => "registrationError",
        }
    }
}

fn decode<T: DeserializeOwned>(event: &str, payload: Value) -> Result<T, ProtocolError> {
    // A missing payload reads as an empty object so all-optional payloads still parse
    let payload = if payload.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        payload
    };
    serde_json::from_value(payload).map_err(|e| ProtocolError::Malformed {
        event: event.to_string(),
        message: e.to_string(),
    })
}

/// Shared body of the playback lifecycle messages
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackReport {
    pub device_id: DeviceId,
    pub ad_id: AdId,
    pub filename: String,
    pub name: String,
    pub trigger: TriggerKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<CampaignId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PlaybackReport {
    pub fn new(device_id: DeviceId, item: &PlaybackItem) -> Self {
        Self {
            device_id,
            ad_id: item.ad_id().clone(),
            filename: item.filename().to_string(),
            name: item.name().to_string(),
            trigger: item.trigger(),
            campaign_id: item.campaign_id().cloned(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Messages the device sends to the backend.
///
/// Serializes to the wire envelope `{"event": <name>, "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum OutboundMessage {
    Register {
        device_id: DeviceId,
    },
    Heartbeat {
        device_id: DeviceId,
        timestamp: DateTime<Utc>,
    },
    LocationUpdate {
        device_id: DeviceId,
        longitude: f64,
        latitude: f64,
        timestamp: DateTime<Utc>,
    },
    DownloadStatus(DownloadProgress),
    DownloadRequest {
        device_id: DeviceId,
        ad_id: AdId,
    },
    PlaybackStarted(PlaybackReport),
    PlaybackCompleted(PlaybackReport),
    PlaybackError(PlaybackReport),
    PlaybackModeChange {
        device_id: DeviceId,
        mode: PlaybackMode,
        #[serde(skip_serializing_if = "Option::is_none")]
        campaign_id: Option<CampaignId>,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl OutboundMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Heartbeat { .. } => "heartbeat",
            Self::LocationUpdate { .. } => "locationUpdate",
            Self::DownloadStatus(_) => "downloadStatus",
            Self::DownloadRequest { .. } => "downloadRequest",
            Self::PlaybackStarted(_) => "playbackStarted",
            Self::PlaybackCompleted(_) => "playbackCompleted",
            Self::PlaybackError(_) => "playbackError",
            Self::PlaybackModeChange { .. } => "playbackModeChange",
        }
    }

    /// Split into event name and payload for the transport
    pub fn into_parts(self) -> Result<(&'static str, Value), ProtocolError> {
        let event = self.event_name();
        let mut envelope = serde_json::to_value(&self)?;
        let payload = envelope
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null);
        Ok((event, payload))
    }
}
