use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::provider::PositionProvider;
use crate::config::LocationConfig;
use crate::models::Position;
use crate::protocol::{LocationAck, OutboundMessage, ProtocolHandle};

/// Delivery counters for location updates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationStats {
    pub sent: u64,
    pub acknowledged: u64,
    pub last_sent: Option<DateTime<Utc>>,
    pub last_ack: Option<DateTime<Utc>>,
    /// The latest ack is newer than the latest send
    pub is_acknowledged: bool,
}

struct Reporter {
    protocol: ProtocolHandle,
    stats: Mutex<LocationStats>,
    last_reported: Mutex<Option<Position>>,
}

impl Reporter {
    async fn report(&self, position: Position) -> bool {
        if !position.is_valid() {
            warn!(
                "Rejecting out-of-range position ({}, {})",
                position.longitude, position.latitude
            );
            return false;
        }
        if !self.protocol.is_connected() {
            trace!("Offline, skipping location update");
            return false;
        }

        let message = OutboundMessage::LocationUpdate {
            device_id: self.protocol.device_id().clone(),
            longitude: position.longitude,
            latitude: position.latitude,
            timestamp: position.timestamp,
        };
        if !self.protocol.send(message).await {
            return false;
        }

        *self.last_reported.lock().await = Some(position);
        let mut stats = self.stats.lock().await;
        stats.sent += 1;
        stats.last_sent = Some(Utc::now());
        stats.is_acknowledged = false;
        true
    }

    /// Report only if the device moved far enough since the last report
    async fn report_if_moved(&self, position: Position, threshold_m: f64) -> bool {
        let moved = match *self.last_reported.lock().await {
            Some(last) => position.distance_to(&last) >= threshold_m,
            None => true,
        };
        if !moved {
            trace!("Movement below {} m, not reporting", threshold_m);
            return false;
        }
        self.report(position).await
    }
}

/// Samples the device position and forwards it to the backend
pub struct LocationTracker {
    provider: Arc<dyn PositionProvider>,
    config: LocationConfig,
    reporter: Arc<Reporter>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LocationTracker {
    pub fn new(
        provider: Arc<dyn PositionProvider>,
        protocol: ProtocolHandle,
        config: LocationConfig,
    ) -> Self {
        Self {
            provider,
            config,
            reporter: Arc::new(Reporter {
                protocol,
                stats: Mutex::new(LocationStats::default()),
                last_reported: Mutex::new(None),
            }),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Take an initial sample, then keep sampling on a timer and on movement
    pub async fn start(&self) {
        let permission = self.provider.permission().await;
        if !permission.allows_tracking() {
            warn!("Location permission denied, tracking disabled");
            return;
        }

        let mut task = self.task.lock().await;
        if task.is_some() {
            debug!("Location tracker already running");
            return;
        }

        self.sample_now().await;

        let provider = self.provider.clone();
        let reporter = self.reporter.clone();
        let cancel = self.cancel.clone();
        let period = self.config.sample_interval();
        let threshold = self.config.distance_threshold_m;

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut movements = provider.position_updates(threshold).fuse();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match provider.current_position().await {
                            Ok(position) => {
                                reporter.report(position).await;
                            }
                            Err(e) => debug!("Periodic position unavailable: {:#}", e),
                        }
                    }
                    Some(position) = movements.next() => {
                        reporter.report_if_moved(position, threshold).await;
                    }
                }
            }
            debug!("Location sampling stopped");
        }));
        info!("Location tracking started (every {:?})", period);
    }

    /// Fetch the current position and report it
    pub async fn sample_now(&self) -> bool {
        match self.provider.current_position().await {
            Ok(position) => self.reporter.report(position).await,
            Err(e) => {
                warn!("Could not read current position: {:#}", e);
                false
            }
        }
    }

    pub async fn report(&self, position: Position) -> bool {
        self.reporter.report(position).await
    }

    /// Record an acknowledgement. Returns `true` when the ack carried no pushed
    /// video, meaning location ads should be checked for expiry.
    pub async fn on_ack(&self, ack: &LocationAck) -> bool {
        let mut stats = self.reporter.stats.lock().await;
        let now = Utc::now();
        stats.acknowledged += 1;
        stats.last_ack = Some(now);
        stats.is_acknowledged = stats.last_sent.is_some_and(|sent| now > sent);
        drop(stats);

        if let Some(message) = ack.message.as_deref() {
            debug!("Location ack: {}", message);
        }
        !ack.has_pushed_video()
    }

    pub async fn stats(&self) -> LocationStats {
        self.reporter.stats.lock().await.clone()
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }
}
