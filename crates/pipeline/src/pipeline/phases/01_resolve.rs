use crate::pipeline::context::{Action, RunContext};
use crate::pipeline::orchestrator::Coordinator;
use crate::pipeline::phase_trait::CoordinatorPhase;
use crate::pipeline::state::PipelineState;
use crate::pipeline::variables;
use anyhow::Result;
use async_trait::async_trait;
use deckhand_core::vars::resolve_including_local;
use tracing::{debug, info};

/// Resolves the effective environment. A destroy also brings back what the
/// run record saved, so destroy commands see the values deploy used.
pub struct ResolveVariablesPhase;

#[async_trait]
impl CoordinatorPhase for ResolveVariablesPhase {
    fn name(&self) -> &'static str {
        "resolve-variables"
    }

    fn state(&self) -> PipelineState {
        PipelineState::ResolvingDependencies
    }

    async fn execute(&self, coordinator: &Coordinator, run: &mut RunContext) -> Result<()> {
        let ctx = coordinator.context();
        let mut sources = variables::current_sources(
            &ctx.config,
            &run.manifest,
            &run.options.variables,
            &run.namespace,
            &run.name,
        )?;

        let previous = if run.action == Action::Destroy {
            run.previous.as_ref()
        } else {
            None
        };
        if let Some(record) = previous {
            debug!(variables = record.variables.len(), "Restoring recorded variables");
            sources.extend(variables::record_sources(record));
        }

        run.vars = resolve_including_local(&sources, &run.manifest.variables)?;

        if let Some(record) = previous {
            for (name, value) in &record.outputs {
                run.vars.set_builtin(name.clone(), value.clone(), true);
            }
            for (target, build) in &record.builds {
                for (name, value) in variables::build_variables(target, &build.image) {
                    run.vars.set_builtin(name, value, false);
                }
            }
        }

        info!(
            pipeline = %run.name,
            variables = run.vars.len(),
            masked = run.vars.masked_names().len(),
            "Resolved variables"
        );
        Ok(())
    }
}
