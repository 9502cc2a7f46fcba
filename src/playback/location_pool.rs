use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::models::{AdId, CampaignId, PlaybackItem};

/// Location-triggered ads for the geofence the device is currently in.
///
/// Holds ads from a single campaign at a time, keyed by advertisement id in
/// insertion order, and is discarded wholesale once no new location-triggered
/// ad has arrived within the liveness window.
#[derive(Debug, Default)]
pub struct LocationPool {
    items: Vec<PlaybackItem>,
    campaign_id: Option<CampaignId>,
    last_received: Option<Instant>,
    index: usize,
}

impl LocationPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh an ad. An ad from another campaign flushes the pool first.
    pub fn add(&mut self, item: PlaybackItem, now: Instant) {
        let incoming = item.campaign_id().cloned();
        if !self.items.is_empty() && incoming != self.campaign_id {
            info!(
                "Location campaign changed ({:?} -> {:?}), flushing {} ads",
                self.campaign_id,
                incoming,
                self.items.len()
            );
            self.clear();
        }
        self.campaign_id = incoming;
        self.last_received = Some(now);

        match self
            .items
            .iter()
            .position(|existing| existing.ad_id() == item.ad_id())
        {
            Some(slot) => self.items[slot] = item,
            None => self.items.push(item),
        }
    }

    /// Round-robin over the pool in insertion order
    pub fn next(&mut self) -> Option<PlaybackItem> {
        if self.items.is_empty() {
            return None;
        }
        let slot = self.index % self.items.len();
        self.index = (slot + 1) % self.items.len();
        Some(self.items[slot].clone())
    }

    pub fn remove(&mut self, ad_id: &AdId) -> Option<PlaybackItem> {
        let slot = self.items.iter().position(|item| item.ad_id() == ad_id)?;
        let removed = self.items.remove(slot);
        if slot < self.index {
            self.index -= 1;
        }
        if self.items.is_empty() {
            self.clear();
        } else {
            self.index %= self.items.len();
        }
        Some(removed)
    }

    pub fn is_expired(&self, now: Instant, window: Duration) -> bool {
        self.last_received
            .is_some_and(|received| now.saturating_duration_since(received) > window)
    }

    /// Drop the whole pool if it outlived the liveness window; returns what was dropped
    pub fn expire(&mut self, now: Instant, window: Duration) -> Vec<PlaybackItem> {
        if self.items.is_empty() || !self.is_expired(now, window) {
            return Vec::new();
        }
        debug!("Location pool expired after {:?} without new ads", window);
        let expired = std::mem::take(&mut self.items);
        self.clear();
        expired
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.campaign_id = None;
        self.last_received = None;
        self.index = 0;
    }

    pub fn contains(&self, ad_id: &AdId) -> bool {
        self.items.iter().any(|item| item.ad_id() == ad_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn campaign_id(&self) -> Option<&CampaignId> {
        self.campaign_id.as_ref()
    }

    pub fn items(&self) -> &[PlaybackItem] {
        &self.items
    }
}
