pub mod handler;
pub mod messages;
pub mod transport;
pub mod websocket;

pub use handler::{ConnectionState, ProtocolHandle, ProtocolHandler, RegistrationState};
pub use messages::{
    CampaignEntry, DownloadCommand, InboundCommand, LocationAck, OutboundMessage, PlayCommand,
    PlaybackReport, Priority, StartCampaignCommand,
};
pub use transport::{MessageTransport, TransportEvent};
pub use websocket::WebSocketTransport;
