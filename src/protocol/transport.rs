use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// Connection-level events delivered by a [`MessageTransport`]
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Message { event: String, payload: Value },
    Disconnected { reason: Option<String> },
}

/// Named-message channel to the backend.
///
/// `connect` returns the event stream for that connection; the stream ends
/// (or yields `Disconnected`) when the connection drops.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn connect(&self) -> Result<mpsc::Receiver<TransportEvent>>;

    async fn send(&self, event: &str, payload: Value) -> Result<()>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;
}
