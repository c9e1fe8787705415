use crate::pipeline::context::RunContext;
use crate::pipeline::orchestrator::Coordinator;
use crate::pipeline::phase_trait::CoordinatorPhase;
use crate::pipeline::state::PipelineState;
use crate::reconcile::Reconciler;
use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Removes every object the pipeline owns, except the ones marked to keep.
pub struct TeardownPhase;

#[async_trait]
impl CoordinatorPhase for TeardownPhase {
    fn name(&self) -> &'static str {
        "teardown"
    }

    fn state(&self) -> PipelineState {
        PipelineState::Reconciling
    }

    async fn execute(&self, coordinator: &Coordinator, run: &mut RunContext) -> Result<()> {
        let ctx = coordinator.context();
        let reconciler = Reconciler::new(ctx.cluster.as_ref(), ctx.progress.as_ref());
        run.removed = reconciler.teardown(&run.namespace, &run.name).await?;
        info!(removed = run.removed.len(), "Removed pipeline resources");
        Ok(())
    }
}
