pub mod provider;
pub mod tracker;

pub use provider::{FixedPositionProvider, LocationPermission, PositionProvider};
pub use tracker::{LocationStats, LocationTracker};
