use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, info, trace, warn};

use super::transport::{MessageTransport, TransportEvent};

const EVENT_BUFFER: usize = 64;

/// Wire envelope for every frame in both directions
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// [`MessageTransport`] over a WebSocket carrying JSON text frames
pub struct WebSocketTransport {
    url: String,
    outgoing: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    connected: Arc<AtomicBool>,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            outgoing: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl MessageTransport for WebSocketTransport {
    async fn connect(&self) -> Result<mpsc::Receiver<TransportEvent>> {
        debug!("Connecting to {}", self.url);
        let (socket, _) = connect_async(self.url.as_str())
            .await
            .with_context(|| format!("Failed to connect to {}", self.url))?;
        let (mut sink, mut stream) = socket.split();

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WsMessage>();
        *self.outgoing.lock().await = Some(out_tx);
        self.connected.store(true, Ordering::SeqCst);
        info!("Connected to {}", self.url);

        // Queued ahead of any frame the reader forwards
        let _ = event_tx.send(TransportEvent::Connected).await;

        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let closing = matches!(message, WsMessage::Close(_));
                if let Err(e) = sink.send(message).await {
                    warn!("WebSocket write failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let connected = self.connected.clone();
        tokio::spawn(async move {
            let mut reason = None;
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<Envelope>(&text) {
                        Ok(envelope) => {
                            trace!("Received {} frame", envelope.event);
                            let event = TransportEvent::Message {
                                event: envelope.event,
                                payload: envelope.data,
                            };
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping unparseable frame: {}", e),
                    },
                    Ok(WsMessage::Close(frame)) => {
                        reason = frame.map(|f| f.reason.to_string());
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        reason = Some(e.to_string());
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
            let _ = event_tx.send(TransportEvent::Disconnected { reason }).await;
        });

        Ok(event_rx)
    }

    async fn send(&self, event: &str, payload: Value) -> Result<()> {
        let text = serde_json::to_string(&Envelope {
            event: event.to_string(),
            data: payload,
        })?;
        let outgoing = self.outgoing.lock().await;
        let sender = outgoing
            .as_ref()
            .ok_or_else(|| anyhow!("WebSocket is not connected"))?;
        sender
            .send(WsMessage::Text(text))
            .map_err(|_| anyhow!("WebSocket writer has shut down"))
    }

    async fn disconnect(&self) {
        if let Some(sender) = self.outgoing.lock().await.take() {
            let _ = sender.send(WsMessage::Close(None));
            info!("Disconnecting from {}", self.url);
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
