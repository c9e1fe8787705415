use crate::error::PipelineError;
use crate::pipeline::context::{Action, BackgroundTask, RunContext, RunOptions};
use crate::pipeline::orchestrator::Coordinator;
use crate::pipeline::phase_trait::CoordinatorPhase;
use crate::pipeline::state::PipelineState;
use crate::pipeline::variables;
use anyhow::Result;
use async_trait::async_trait;
use deckhand_core::manifest::Dependency;
use deckhand_core::naming::sanitize_name;
use deckhand_core::PipelineEvent;
use std::time::Instant;
use tracing::{debug, info};

/// Options of the pipeline a dependency declaration points at.
///
/// The dependency's identity is its declared name, its variables are
/// expanded against the parent's environment and nothing else is inherited.
pub fn dependency_options(run: &RunContext, dep: &Dependency) -> RunOptions {
    RunOptions {
        manifest_path: run.manifest.base_dir().join(&dep.file),
        namespace: Some(
            dep.namespace
                .as_deref()
                .map(|ns| run.vars.expand(ns))
                .unwrap_or_else(|| run.namespace.clone()),
        ),
        name: Some(dep.name.clone()),
        variables: dep
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), run.vars.expand(v)))
            .collect(),
        routing: run.options.routing,
        destroy_dependencies: run.options.destroy_dependencies,
        force_destroy: run.options.force_destroy,
        ancestry: run.child_ancestry(),
        ..Default::default()
    }
}

async fn expose_recorded(
    coordinator: &Coordinator,
    run: &mut RunContext,
    dep: &Dependency,
    options: &RunOptions,
) -> Result<()> {
    let namespace = options
        .namespace
        .clone()
        .unwrap_or_else(|| run.namespace.clone());
    let name = sanitize_name(&dep.name);
    match coordinator.context().records.load(&namespace, &name).await? {
        Some(record) => {
            let exposed = variables::dependency_variables(&dep.name, &record);
            debug!(dependency = %dep.name, variables = exposed.len(), "Exposing recorded dependency variables");
            variables::expose(&mut run.vars, exposed);
        }
        None => debug!(dependency = %dep.name, "Dependency has no run record yet"),
    }
    Ok(())
}

/// Deploys `wait` dependencies before anything else runs and dispatches the
/// others in the background. Test and destroy only read dependency records.
pub struct DependenciesPhase;

#[async_trait]
impl CoordinatorPhase for DependenciesPhase {
    fn name(&self) -> &'static str {
        "dependencies"
    }

    fn state(&self) -> PipelineState {
        PipelineState::ResolvingDependencies
    }

    async fn execute(&self, coordinator: &Coordinator, run: &mut RunContext) -> Result<()> {
        let deploying = run.action == Action::Deploy && !run.options.skip_dependencies;
        let progress = coordinator.context().progress.clone();

        for dep in run.manifest.dependencies.clone() {
            let options = dependency_options(run, &dep);

            if !deploying {
                expose_recorded(coordinator, run, &dep, &options).await?;
                continue;
            }

            progress.on_progress(&PipelineEvent::DependencyStarted {
                name: dep.name.clone(),
                wait: dep.wait,
            });

            if !dep.wait {
                info!(dependency = %dep.name, "Deploying dependency in the background");
                let handle = tokio::spawn(coordinator.deploy(options.clone()));
                run.background.push(BackgroundTask {
                    label: format!("dependency '{}'", dep.name),
                    handle,
                });
                expose_recorded(coordinator, run, &dep, &options).await?;
                continue;
            }

            let started = Instant::now();
            let result = coordinator.deploy(options).await;
            progress.on_progress(&PipelineEvent::DependencyComplete {
                name: dep.name.clone(),
                success: result.is_ok(),
                duration: started.elapsed(),
            });

            let summary = result.map_err(|e| PipelineError::Dependency {
                name: dep.name.clone(),
                message: format!("{:#}", e),
            })?;
            if let Some(record) = summary.record {
                variables::expose(&mut run.vars, variables::dependency_variables(&dep.name, &record));
            }
        }
        Ok(())
    }
}

/// Destroys manifest dependencies after the pipeline itself, when asked to.
pub struct DestroyDependenciesPhase;

#[async_trait]
impl CoordinatorPhase for DestroyDependenciesPhase {
    fn name(&self) -> &'static str {
        "destroy-dependencies"
    }

    fn state(&self) -> PipelineState {
        PipelineState::Reconciling
    }

    async fn execute(&self, coordinator: &Coordinator, run: &mut RunContext) -> Result<()> {
        if !run.options.destroy_dependencies {
            if !run.manifest.dependencies.is_empty() {
                info!(
                    dependencies = run.manifest.dependencies.len(),
                    "Leaving dependencies in place"
                );
            }
            return Ok(());
        }

        for dep in run.manifest.dependencies.clone().iter().rev() {
            let options = dependency_options(run, dep);
            info!(dependency = %dep.name, "Destroying dependency");
            coordinator
                .destroy(options)
                .await
                .map_err(|e| PipelineError::Dependency {
                    name: dep.name.clone(),
                    message: format!("{:#}", e),
                })?;
        }
        Ok(())
    }
}
