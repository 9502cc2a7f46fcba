// Library entry shared by the device binary and integration tests

pub mod app;
pub mod config;
pub mod download;
pub mod events;
pub mod location;
pub mod models;
pub mod playback;
pub mod player;
pub mod protocol;
pub mod utils;

pub use app::{App, Capabilities};
pub use config::Config;
