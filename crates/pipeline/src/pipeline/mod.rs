pub mod context;
pub mod orchestrator;
pub mod phase_trait;
pub mod phases;
pub mod state;
pub mod variables;

pub use context::{
    Action, BackgroundTask, BuildReport, PipelineContext, RunContext, RunOptions, RunSummary,
};
pub use orchestrator::Coordinator;
pub use phase_trait::CoordinatorPhase;
pub use state::{PipelineState, StateMachine};
