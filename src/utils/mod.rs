pub mod errors;

pub use errors::{DownloadError, PlaybackError, ProtocolError};
