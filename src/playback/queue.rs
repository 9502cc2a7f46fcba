use std::collections::VecDeque;
use std::fmt;
use tokio::time::Instant;
use tracing::debug;

use super::location_pool::LocationPool;
use crate::models::{CampaignId, PlaybackItem, PlaybackMode};

/// Which tier produced the next item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemSource {
    Override,
    General,
    Campaign,
    Location,
    Ambient,
}

impl fmt::Display for ItemSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Override => "override",
            Self::General => "general",
            Self::Campaign => "campaign",
            Self::Location => "location",
            Self::Ambient => "ambient",
        };
        f.write_str(label)
    }
}

/// All playlist sources, consulted in priority order
#[derive(Debug, Default)]
pub struct PlaybackSchedule {
    overrides: VecDeque<PlaybackItem>,
    general: VecDeque<PlaybackItem>,
    campaign: Vec<PlaybackItem>,
    campaign_id: Option<CampaignId>,
    campaign_index: usize,
    pool: LocationPool,
    ambient: Vec<PlaybackItem>,
    ambient_index: usize,
}

impl PlaybackSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Front-of-line item; pending general items are discarded
    pub fn push_override(&mut self, item: PlaybackItem) {
        if !self.general.is_empty() {
            debug!("Override {} clears {} queued items", item.filename(), self.general.len());
            self.general.clear();
        }
        self.overrides.push_back(item);
    }

    pub fn push_general(&mut self, item: PlaybackItem) {
        self.general.push_back(item);
    }

    pub fn add_location_ad(&mut self, item: PlaybackItem, now: Instant) {
        self.pool.add(item, now);
    }

    pub fn start_campaign(&mut self, campaign_id: CampaignId, items: Vec<PlaybackItem>) {
        self.general.clear();
        self.campaign = items;
        self.campaign_id = Some(campaign_id);
        self.campaign_index = 0;
    }

    pub fn revert_to_local(&mut self) {
        self.campaign.clear();
        self.campaign_id = None;
        self.campaign_index = 0;
        self.ambient_index = 0;
    }

    /// Replace the ambient library, keeping the rotation position where possible
    pub fn set_ambient(&mut self, items: Vec<PlaybackItem>) {
        self.ambient = items;
        self.ambient_index = if self.ambient.is_empty() {
            0
        } else {
            self.ambient_index % self.ambient.len()
        };
    }

    pub fn remove_ambient(&mut self, filename: &str) {
        remove_from_rotation(&mut self.ambient, &mut self.ambient_index, filename);
    }

    /// Drop a playlist entry that can never be played
    pub fn remove_campaign(&mut self, filename: &str) {
        if remove_from_rotation(&mut self.campaign, &mut self.campaign_index, filename) {
            debug!(
                "Removed {} from campaign, {} entries left",
                filename,
                self.campaign.len()
            );
        }
    }

    /// Pick the next item in priority order
    pub fn next(&mut self, mode: PlaybackMode) -> Option<(PlaybackItem, ItemSource)> {
        if let Some(item) = self.overrides.pop_front() {
            return Some((item, ItemSource::Override));
        }
        if let Some(item) = self.general.pop_front() {
            return Some((item, ItemSource::General));
        }
        if mode == PlaybackMode::Campaign && !self.campaign.is_empty() {
            let slot = self.campaign_index % self.campaign.len();
            // Campaigns loop forever
            self.campaign_index = (slot + 1) % self.campaign.len();
            return Some((self.campaign[slot].clone(), ItemSource::Campaign));
        }
        if let Some(item) = self.pool.next() {
            return Some((item, ItemSource::Location));
        }
        if !self.ambient.is_empty() {
            let slot = self.ambient_index % self.ambient.len();
            self.ambient_index = (slot + 1) % self.ambient.len();
            return Some((self.ambient[slot].clone(), ItemSource::Ambient));
        }
        None
    }

    pub fn clear(&mut self) {
        self.overrides.clear();
        self.general.clear();
        self.campaign.clear();
        self.campaign_id = None;
        self.campaign_index = 0;
        self.pool.clear();
        self.ambient.clear();
        self.ambient_index = 0;
    }

    pub fn pool(&self) -> &LocationPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut LocationPool {
        &mut self.pool
    }

    pub fn override_len(&self) -> usize {
        self.overrides.len()
    }

    pub fn general_len(&self) -> usize {
        self.general.len()
    }

    pub fn campaign_id(&self) -> Option<&CampaignId> {
        self.campaign_id.as_ref()
    }

    pub fn campaign_len(&self) -> usize {
        self.campaign.len()
    }

    pub fn campaign_index(&self) -> usize {
        self.campaign_index
    }

    pub fn ambient_len(&self) -> usize {
        self.ambient.len()
    }

    pub fn ambient_index(&self) -> usize {
        self.ambient_index
    }
}

/// Remove `filename` from a round-robin list, keeping `index` on the same next item
fn remove_from_rotation(items: &mut Vec<PlaybackItem>, index: &mut usize, filename: &str) -> bool {
    let Some(slot) = items.iter().position(|item| item.filename() == filename) else {
        return false;
    };
    items.remove(slot);
    if slot < *index {
        *index -= 1;
    }
    if items.is_empty() {
        *index = 0;
    } else {
        *index %= items.len();
    }
    true
}
