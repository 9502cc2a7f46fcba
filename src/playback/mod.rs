pub mod location_pool;
pub mod orchestrator;
pub mod queue;

pub use location_pool::LocationPool;
pub use orchestrator::{
    AdvanceReason, OrchestratorCommand, OrchestratorHandle, OrchestratorSnapshot,
    PlaybackOrchestrator, is_natural_completion,
};
pub use queue::{ItemSource, PlaybackSchedule};
