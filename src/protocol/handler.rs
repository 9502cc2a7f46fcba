use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::messages::{InboundCommand, OutboundMessage};
use super::transport::{MessageTransport, TransportEvent};
use crate::config::ServerConfig;
use crate::models::DeviceId;

/// Whether the backend has accepted our `register` message on this connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Pending,
    Registered,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(label)
    }
}

/// Owns the backend connection: registration, heartbeat, reconnects, and
/// normalization of inbound messages into [`InboundCommand`]s.
pub struct ProtocolHandler {
    transport: Arc<dyn MessageTransport>,
    device_id: DeviceId,
    config: ServerConfig,
    commands: mpsc::UnboundedSender<InboundCommand>,
    registration: watch::Sender<RegistrationState>,
    connection: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl ProtocolHandler {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        device_id: DeviceId,
        config: ServerConfig,
    ) -> (ProtocolHandle, ProtocolHandler) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (registration_tx, registration_rx) = watch::channel(RegistrationState::Unregistered);
        let (connection_tx, connection_rx) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();

        let handler = ProtocolHandler {
            transport: transport.clone(),
            device_id: device_id.clone(),
            config,
            commands: commands_tx,
            registration: registration_tx,
            connection: connection_tx,
            cancel: cancel.clone(),
        };
        let handle = ProtocolHandle {
            transport,
            device_id,
            registration: registration_rx,
            connection: connection_rx,
            commands: Arc::new(Mutex::new(Some(commands_rx))),
            cancel,
        };

        (handle, handler)
    }

    /// Run the connect / serve / reconnect loop until shut down
    pub async fn run(self) {
        info!("Protocol handler started for device {}", self.device_id);

        loop {
            self.connection.send_replace(ConnectionState::Connecting);

            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.transport.connect() => result,
            };

            match attempt {
                Ok(events) => {
                    if !self.serve(events).await {
                        break;
                    }
                }
                Err(e) => warn!("Connection attempt failed: {:#}", e),
            }

            self.connection.send_replace(ConnectionState::Disconnected);
            self.registration.send_replace(RegistrationState::Unregistered);

            let delay = self.config.reconnect_delay();
            debug!("Reconnecting in {:?}", delay);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.transport.disconnect().await;
        self.connection.send_replace(ConnectionState::Disconnected);
        self.registration.send_replace(RegistrationState::Unregistered);
        info!("Protocol handler stopped");
    }

    /// Serve one connection. Returns `false` once shutdown was requested.
    async fn serve(&self, mut events: mpsc::Receiver<TransportEvent>) -> bool {
        let period = self.config.heartbeat_interval();
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = heartbeat.tick() => {
                    let message = OutboundMessage::Heartbeat {
                        device_id: self.device_id.clone(),
                        timestamp: Utc::now(),
                    };
                    send_message(self.transport.as_ref(), message).await;
                }
                event = events.recv() => {
                    match event {
                        Some(TransportEvent::Connected) => self.on_connected().await,
                        Some(TransportEvent::Message { event, payload }) => {
                            if !self.on_message(&event, payload).await {
                                return true;
                            }
                        }
                        Some(TransportEvent::Disconnected { reason }) => {
                            info!(
                                "Disconnected from backend: {}",
                                reason.as_deref().unwrap_or("no reason")
                            );
                            return true;
                        }
                        None => {
                            info!("Backend connection closed");
                            return true;
                        }
                    }
                }
            }
        }
    }

    async fn on_connected(&self) {
        self.connection.send_replace(ConnectionState::Connected);
        let message = OutboundMessage::Register {
            device_id: self.device_id.clone(),
        };
        if send_message(self.transport.as_ref(), message).await {
            self.registration.send_replace(RegistrationState::Pending);
            debug!("Registration sent for {}", self.device_id);
        }
    }

    /// Returns `false` when the backend asked us to drop the connection
    async fn on_message(&self, event: &str, payload: serde_json::Value) -> bool {
        let command = match InboundCommand::parse(event, payload) {
            Ok(command) => command,
            Err(e) => {
                warn!("Dropping inbound message: {}", e);
                return true;
            }
        };
        trace!("Inbound {}", command.name());

        match command {
            InboundCommand::Connected => {
                debug!("Backend confirmed connection");
            }
            InboundCommand::RegistrationSuccess => {
                info!("Device {} registered", self.device_id);
                self.registration.send_replace(RegistrationState::Registered);
            }
            InboundCommand::RegistrationError { message } => {
                let message = message.unwrap_or_else(|| "registration rejected".to_string());
                warn!("Registration failed: {}", message);
                self.registration.send_replace(RegistrationState::Failed(message));
            }
            InboundCommand::ForceDisconnect { reason } => {
                warn!(
                    "Backend forced disconnect: {}",
                    reason.as_deref().unwrap_or("no reason")
                );
                self.transport.disconnect().await;
                return false;
            }
            command => {
                if self.commands.send(command).is_err() {
                    debug!("No consumer for inbound commands");
                }
            }
        }
        true
    }
}

/// Cloneable front end used by the rest of the application
#[derive(Clone)]
pub struct ProtocolHandle {
    transport: Arc<dyn MessageTransport>,
    device_id: DeviceId,
    registration: watch::Receiver<RegistrationState>,
    connection: watch::Receiver<ConnectionState>,
    commands: Arc<Mutex<Option<mpsc::UnboundedReceiver<InboundCommand>>>>,
    cancel: CancellationToken,
}

impl fmt::Debug for ProtocolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolHandle")
            .field("device_id", &self.device_id)
            .field("connection", &*self.connection.borrow())
            .field("registration", &*self.registration.borrow())
            .finish()
    }
}

impl ProtocolHandle {
    /// Take the inbound command stream (can only be done once)
    pub async fn take_command_receiver(&self) -> Option<mpsc::UnboundedReceiver<InboundCommand>> {
        self.commands.lock().await.take()
    }

    /// Send to the backend. Messages are dropped, not queued, while disconnected.
    pub async fn send(&self, message: OutboundMessage) -> bool {
        send_message(self.transport.as_ref(), message).await
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn registration_state(&self) -> RegistrationState {
        self.registration.borrow().clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn watch_registration(&self) -> watch::Receiver<RegistrationState> {
        self.registration.clone()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

async fn send_message(transport: &dyn MessageTransport, message: OutboundMessage) -> bool {
    let event = message.event_name();
    if !transport.is_connected() {
        debug!("Not connected, dropping {}", event);
        return false;
    }

    let (event, payload) = match message.into_parts() {
        Ok(parts) => parts,
        Err(e) => {
            warn!("Failed to encode {}: {}", event, e);
            return false;
        }
    };

    match transport.send(event, payload).await {
        Ok(()) => {
            trace!("Sent {}", event);
            true
        }
        Err(e) => {
            warn!("Failed to send {}: {:#}", event, e);
            false
        }
    }
}
