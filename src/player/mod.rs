pub mod simulated;
pub mod traits;

pub use simulated::SimulatedPlayer;
pub use traits::{PlayerStatus, VideoPlayer};
