use super::context::{Action, PipelineContext, RunContext, RunOptions, RunSummary};
use super::phase_trait::CoordinatorPhase;
use super::phases::{
    apply::ApplyPhase,
    build::BuildPhase,
    commands::CommandsPhase,
    dependencies::{DependenciesPhase, DestroyDependenciesPhase},
    resolve::ResolveVariablesPhase,
    teardown::TeardownPhase,
};
use super::state::{PipelineState, StateMachine};
use crate::error::PipelineError;
use crate::git;
use crate::record::{RecordStatus, RunRecord};
use anyhow::{anyhow, Context, Result};
use deckhand_core::manifest::load;
use deckhand_core::naming::sanitize_name;
use deckhand_core::{PhaseKind, PipelineEvent, ResolvedVars, ValidationError};
use deckhand_stack::{load_stack, Resource, Stack, TranslateOptions};
use futures_util::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Drives deploy, destroy and test invocations through their phases.
///
/// Cloning is cheap; every clone shares the same [`PipelineContext`], which
/// is how dependencies and nested pipelines reuse the parent's collaborators.
#[derive(Clone)]
pub struct Coordinator {
    ctx: Arc<PipelineContext>,
}

fn deploy_phases() -> Vec<Box<dyn CoordinatorPhase>> {
    vec![
        Box::new(ResolveVariablesPhase),
        Box::new(DependenciesPhase),
        Box::new(BuildPhase),
        Box::new(CommandsPhase::new(PhaseKind::Deploy)),
        Box::new(ApplyPhase),
    ]
}

fn destroy_phases() -> Vec<Box<dyn CoordinatorPhase>> {
    vec![
        Box::new(ResolveVariablesPhase),
        Box::new(DependenciesPhase),
        Box::new(CommandsPhase::new(PhaseKind::Destroy)),
        Box::new(TeardownPhase),
        Box::new(DestroyDependenciesPhase),
    ]
}

fn test_phases() -> Vec<Box<dyn CoordinatorPhase>> {
    vec![
        Box::new(ResolveVariablesPhase),
        Box::new(DependenciesPhase),
        Box::new(BuildPhase),
        Box::new(CommandsPhase::new(PhaseKind::Test)),
    ]
}

impl Coordinator {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    // The invocations return boxed futures because they recurse through
    // dependencies and nested pipelines.

    pub fn deploy(&self, options: RunOptions) -> BoxFuture<'static, Result<RunSummary>> {
        let this = self.clone();
        async move { this.run(Action::Deploy, options).await }.boxed()
    }

    pub fn destroy(&self, options: RunOptions) -> BoxFuture<'static, Result<RunSummary>> {
        let this = self.clone();
        async move { this.run(Action::Destroy, options).await }.boxed()
    }

    pub fn test(&self, options: RunOptions) -> BoxFuture<'static, Result<RunSummary>> {
        let this = self.clone();
        async move { this.run(Action::Test, options).await }.boxed()
    }

    /// Routes a deploy of `options` would create, without touching the
    /// cluster. Services that were never built get a placeholder image.
    pub async fn endpoints(&self, options: RunOptions) -> Result<Vec<Resource>> {
        let mut run = self.prepare(Action::Test, options).await?;
        ResolveVariablesPhase.execute(self, &mut run).await?;
        DependenciesPhase.execute(self, &mut run).await?;

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

        let mut opts = TranslateOptions::from_config(&self.ctx.config, &run.namespace, &run.name);
        if let Some(routing) = run.options.routing {
            opts.routing = routing;
        }
        for svc in stack.services.values() {
            let image = run
                .record
                .builds
                .get(&svc.name)
                .map(|b| b.image.clone())
                .or_else(|| svc.image.clone())
                .unwrap_or_else(|| format!("{}-unbuilt", svc.name));
            opts.images.insert(svc.name.clone(), image);
        }
        opts.endpoints = run.manifest.deploy.endpoints.clone();

        let set = self.ctx.translator.translate(&stack, &opts)?;
        Ok(set.routes().cloned().collect())
    }

    async fn prepare(&self, action: Action, options: RunOptions) -> Result<RunContext> {
        let manifest = load(&options.manifest_path).with_context(|| {
            format!("Failed to load manifest {}", options.manifest_path.display())
        })?;
        let name = options
            .name
            .as_deref()
            .map(sanitize_name)
            .unwrap_or_else(|| manifest.identity());
        let namespace = options
            .namespace
            .clone()
            .unwrap_or_else(|| self.ctx.config.namespace.clone());
        check_ancestry(&options.ancestry, &namespace, &name)?;

        let previous = self
            .ctx
            .records
            .load(&namespace, &name)
            .await
            .with_context(|| format!("Failed to load run record of {}/{}", namespace, name))?;
        let git = git::detect(manifest.base_dir()).await;
        let record = previous
            .clone()
            .unwrap_or_else(|| RunRecord::new(&name, &namespace, &manifest.path));

        Ok(RunContext {
            action,
            state: StateMachine::new(name.clone(), self.ctx.progress.clone()),
            options,
            manifest,
            name,
            namespace,
            vars: ResolvedVars::default(),
            previous,
            record,
            git,
            stack: None,
            builds: Vec::new(),
            applied: Vec::new(),
            removed: Vec::new(),
            exports: Vec::new(),
            warnings: Vec::new(),
            background: Vec::new(),
        })
    }

    async fn run(&self, action: Action, options: RunOptions) -> Result<RunSummary> {
        let start = Instant::now();
        let mut run = self.prepare(action, options).await?;
        info!(
            pipeline = %run.name,
            namespace = %run.namespace,
            action = %action,
            "Starting pipeline"
        );
        self.ctx.progress.on_progress(&PipelineEvent::Started {
            name: run.name.clone(),
            action: action.to_string(),
        });

        let phases = match action {
            Action::Deploy => deploy_phases(),
            Action::Destroy => destroy_phases(),
            Action::Test => test_phases(),
        };

        let mut result = self.start(&mut run).await;
        if result.is_ok() {
            result = self.run_phases(&mut run, &phases).await;
        }
        self.await_background(&mut run).await;
        if result.is_ok() {
            result = self.complete(&mut run).await;
        }

        match result {
            Ok(()) => {
                info!(
                    pipeline = %run.name,
                    builds = run.builds.len(),
                    applied = run.applied.len(),
                    removed = run.removed.len(),
                    total_time_ms = start.elapsed().as_millis(),
                    "Pipeline complete"
                );
                self.ctx.progress.on_progress(&PipelineEvent::Completed {
                    name: run.name.clone(),
                    duration: start.elapsed(),
                });
                let mut summary = run.summary();
                if action == Action::Destroy {
                    summary.record = None;
                }
                Ok(summary)
            }
            Err(e) => Err(self.fail(&mut run, e).await),
        }
    }

    async fn start(&self, run: &mut RunContext) -> Result<()> {
        if run.action != Action::Deploy {
            return Ok(());
        }
        run.record.repository = run.git.repository.clone();
        run.record.branch = run.git.branch.clone();
        run.record.commit = run.git.commit.clone();
        run.record.manifest_path = run.manifest.path.clone();
        run.record.touch(RecordStatus::Progressing);
        self.ctx
            .records
            .save(&run.record)
            .await
            .context("Failed to save run record")
    }

    async fn run_phases(
        &self,
        run: &mut RunContext,
        phases: &[Box<dyn CoordinatorPhase>],
    ) -> Result<()> {
        for phase in phases {
            if self.ctx.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled.into());
            }
            if run.state.state() != phase.state() {
                run.state.transition(phase.state())?;
            }

            let phase_name = phase.name();
            info!(phase = %phase_name, "Starting phase");

            let phase_start = Instant::now();
            phase
                .execute(self, run)
                .await
                .with_context(|| format!("Phase {} failed", phase_name))?;

            info!(
                phase = %phase_name,
                duration_ms = phase_start.elapsed().as_millis(),
                "Phase complete"
            );
        }
        Ok(())
    }

    /// Waits for pipelines dispatched without `wait`. Their failures never
    /// fail the parent.
    async fn await_background(&self, run: &mut RunContext) {
        for task in std::mem::take(&mut run.background) {
            match task.handle.await {
                Ok(Ok(summary)) => {
                    for warning in summary.warnings {
                        run.warn(format!("{}: {}", task.label, warning));
                    }
                }
                Ok(Err(e)) => run.warn(format!("{} failed: {:#}", task.label, e)),
                Err(e) => run.warn(format!("{} did not finish: {}", task.label, e)),
            }
        }
    }

    async fn complete(&self, run: &mut RunContext) -> Result<()> {
        run.state.transition(PipelineState::Done)?;
        match run.action {
            Action::Deploy => {
                run.record.record_variables(&run.vars);
                run.record.touch(RecordStatus::Deployed);
                self.ctx
                    .records
                    .save(&run.record)
                    .await
                    .context("Failed to save run record")?;
            }
            Action::Destroy => {
                self.ctx
                    .records
                    .delete(&run.namespace, &run.name)
                    .await
                    .context("Failed to delete run record")?;
            }
            Action::Test => {}
        }
        Ok(())
    }

    async fn fail(&self, run: &mut RunContext, error: anyhow::Error) -> anyhow::Error {
        run.state.fail();
        let message = run.masker().mask(&format!("{:#}", error)).into_owned();

        let persist = match run.action {
            Action::Deploy => true,
            Action::Destroy => run.previous.is_some(),
            Action::Test => false,
        };
        if persist {
            run.record.touch(RecordStatus::Error);
            if let Err(e) = self.ctx.records.save(&run.record).await {
                warn!(pipeline = %run.name, error = %e, "Failed to save run record");
            }
        }

        self.ctx.progress.on_progress(&PipelineEvent::Failed {
            name: run.name.clone(),
            error: message.clone(),
        });
        anyhow!(message)
    }
}

/// Rejects a run whose pipeline is already in progress further up the chain
/// of dependencies and nested pipelines.
fn check_ancestry(ancestry: &[(String, String)], namespace: &str, name: &str) -> Result<()> {
    let Some(start) = ancestry
        .iter()
        .position(|(ns, n)| ns == namespace && n == name)
    else {
        return Ok(());
    };
    let chain = ancestry[start..]
        .iter()
        .map(|(ns, n)| format!("{}/{}", ns, n))
        .chain(std::iter::once(format!("{}/{}", namespace, name)))
        .collect();
    Err(ValidationError::DependencyCycle { chain }.into())
}
