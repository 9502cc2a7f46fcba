pub mod identifiers;

pub use identifiers::{AdId, CampaignId, DeviceId, UNKNOWN_AD_ID};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an item was scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    AmbientLoop,
    LocationBased,
    AdminOverride,
    BackendPush,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AmbientLoop => "ambient_loop",
            Self::LocationBased => "location_based",
            Self::AdminOverride => "admin_override",
            Self::BackendPush => "backend_push",
        }
    }

    /// Parse the trigger string sent by the backend. Anything unrecognised is a plain push.
    pub fn from_wire(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "location_based" || v == "location" || v == "gps" => {
                Self::LocationBased
            }
            Some(v) if v == "admin_override" || v == "admin" || v == "override" => {
                Self::AdminOverride
            }
            Some(v) if v == "ambient_loop" || v == "ambient" || v == "local" => Self::AmbientLoop,
            _ => Self::BackendPush,
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One candidate thing to play. Immutable once built; ownership moves between
/// the orchestrator's collections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackItem {
    filename: String,
    ad_id: AdId,
    name: String,
    trigger: TriggerKind,
    campaign_id: Option<CampaignId>,
    is_override: bool,
    created_at: DateTime<Utc>,
}

impl PlaybackItem {
    pub fn new(filename: impl Into<String>, ad_id: AdId, trigger: TriggerKind) -> Self {
        let filename = filename.into();
        Self {
            name: filename.clone(),
            filename,
            ad_id,
            is_override: trigger == TriggerKind::AdminOverride,
            trigger,
            campaign_id: None,
            created_at: Utc::now(),
        }
    }

    /// Item from the local library, played by the ambient loop
    pub fn ambient(filename: impl Into<String>, ad_id: Option<AdId>) -> Self {
        Self::new(
            filename,
            ad_id.unwrap_or_else(AdId::unknown),
            TriggerKind::AmbientLoop,
        )
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_campaign(mut self, campaign_id: Option<CampaignId>) -> Self {
        self.campaign_id = campaign_id;
        self
    }

    /// Mark the item as front-of-line regardless of its trigger
    pub fn as_override(mut self) -> Self {
        self.is_override = true;
        self
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn ad_id(&self) -> &AdId {
        &self.ad_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trigger(&self) -> TriggerKind {
        self.trigger
    }

    pub fn campaign_id(&self) -> Option<&CampaignId> {
        self.campaign_id.as_ref()
    }

    pub fn is_override(&self) -> bool {
        self.is_override
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_location_based(&self) -> bool {
        self.trigger == TriggerKind::LocationBased
    }
}

/// Which playlist source is live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    #[default]
    Local,
    Campaign,
}

impl PlaybackMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Campaign => "campaign",
        }
    }
}

/// Orchestrator state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Error,
}

impl OrchestratorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device position in WGS84 degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub longitude: f64,
    pub latitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl Position {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
            timestamp: Utc::now(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.longitude.is_finite()
            && self.latitude.is_finite()
            && (-180.0..=180.0).contains(&self.longitude)
            && (-90.0..=90.0).contains(&self.latitude)
    }

    /// Great-circle distance in metres
    pub fn distance_to(&self, other: &Position) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;

        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
    }
}
