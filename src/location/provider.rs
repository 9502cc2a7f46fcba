use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::models::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationPermission {
    Granted,
    Denied,
    Unknown,
}

impl LocationPermission {
    pub fn allows_tracking(&self) -> bool {
        !matches!(self, Self::Denied)
    }
}

/// Positioning capability
#[async_trait]
pub trait PositionProvider: Send + Sync {
    async fn permission(&self) -> LocationPermission;

    async fn current_position(&self) -> Result<Position>;

    /// Positions emitted whenever the device moves more than `distance_filter_m`
    fn position_updates(&self, distance_filter_m: f64) -> BoxStream<'static, Position>;
}

/// A device that never moves, for installations without positioning hardware
#[derive(Debug, Clone, Copy)]
pub struct FixedPositionProvider {
    longitude: f64,
    latitude: f64,
}

impl FixedPositionProvider {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
}

#[async_trait]
impl PositionProvider for FixedPositionProvider {
    async fn permission(&self) -> LocationPermission {
        LocationPermission::Granted
    }

    async fn current_position(&self) -> Result<Position> {
        Ok(Position::new(self.longitude, self.latitude))
    }

    fn position_updates(&self, _distance_filter_m: f64) -> BoxStream<'static, Position> {
        stream::pending().boxed()
    }
}
