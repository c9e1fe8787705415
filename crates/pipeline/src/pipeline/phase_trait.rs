use super::context::RunContext;
use super::orchestrator::Coordinator;
use super::state::PipelineState;
use anyhow::Result;
use async_trait::async_trait;

/// One step of an invocation. Consecutive phases may share a state.
#[async_trait]
pub trait CoordinatorPhase: Send + Sync {
    fn name(&self) -> &'static str;

    /// State the invocation is in while this phase runs.
    fn state(&self) -> PipelineState;

    async fn execute(&self, coordinator: &Coordinator, run: &mut RunContext) -> Result<()>;
}
