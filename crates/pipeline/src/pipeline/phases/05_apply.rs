use crate::pipeline::context::RunContext;
use crate::pipeline::orchestrator::Coordinator;
use crate::pipeline::phase_trait::CoordinatorPhase;
use crate::pipeline::state::PipelineState;
use crate::reconcile::Reconciler;
use anyhow::Result;
use async_trait::async_trait;
use deckhand_stack::routing::excluded_kinds;
use deckhand_stack::{load_stack, ResourceKey, ResourceKind, Stack, TranslateMode, TranslateOptions};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{info, warn};

/// Translates the stack with the final environment, applies it and removes
/// what this pipeline deployed before but no longer wants.
pub struct ApplyPhase;

#[async_trait]
impl CoordinatorPhase for ApplyPhase {
    fn name(&self) -> &'static str {
        "apply"
    }

    fn state(&self) -> PipelineState {
        PipelineState::Reconciling
    }

    async fn execute(&self, coordinator: &Coordinator, run: &mut RunContext) -> Result<()> {
        let ctx = coordinator.context();

        // deploy commands may have exported values the compose files reference
        let stack = if run.manifest.deploy.compose.is_empty() {
            Stack::new(run.name.clone())
        } else {
            load_stack(
                &run.manifest.deploy.compose,
                run.manifest.base_dir(),
                &run.name,
                &run.vars,
            )?
        };

        let mut options = TranslateOptions::from_config(&ctx.config, &run.namespace, &run.name);
        if let Some(routing) = run.options.routing {
            options.routing = routing;
        }
        if !run.options.services.is_empty() {
            options.mode = TranslateMode::Partial(run.options.services.clone());
        }
        options.images = run
            .record
            .builds
            .iter()
            .filter(|(target, _)| stack.services.contains_key(*target))
            .map(|(target, build)| (target.clone(), build.image.clone()))
            .collect();
        for (name, svc) in &stack.services {
            if !svc.ports.is_empty() {
                continue;
            }
            let Some(image) = options.images.get(name) else { continue };
            match ctx.builder.exposed_ports(image).await {
                Ok(ports) if !ports.is_empty() => {
                    options.discovered_ports.insert(name.clone(), ports);
                }
                Ok(_) => {}
                Err(e) => warn!(service = %name, error = %e, "Could not read exposed ports"),
            }
        }
        options.endpoints = run.manifest.deploy.endpoints.clone();

        let set = ctx.translator.translate(&stack, &options)?;
        info!(
            resources = set.len(),
            routing = %set.routing_kind,
            partial = set.partial,
            "Translated stack"
        );

        let reconciler = Reconciler::new(ctx.cluster.as_ref(), ctx.progress.as_ref())
            .with_wait_timeout(Duration::from_secs(ctx.config.wait_timeout_secs))
            .with_cancel(ctx.cancel.clone());
        run.applied = reconciler.apply(&set).await?;

        let desired = set.keys();
        let prune_kinds = if set.partial {
            excluded_kinds(options.routing)
        } else {
            ResourceKind::all().to_vec()
        };
        run.removed = reconciler
            .prune(&run.namespace, &run.name, &prune_kinds, &desired)
            .await?;

        run.record.resources = if set.partial {
            let removed: BTreeSet<&ResourceKey> = run.removed.iter().collect();
            let mut keys: BTreeSet<ResourceKey> = run
                .previous
                .iter()
                .flat_map(|r| r.resources.iter())
                .filter(|k| !removed.contains(k))
                .cloned()
                .collect();
            keys.extend(desired);
            keys.into_iter().collect()
        } else {
            desired.into_iter().collect()
        };
        run.stack = Some(stack);
        Ok(())
    }
}
