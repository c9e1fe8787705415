use crate::error::PipelineError;
use crate::executor::{ExecTarget, NestedPipelineRunner, PhaseExecutor, PhaseRun};
use crate::pipeline::context::{BackgroundTask, RunContext, RunOptions};
use crate::pipeline::orchestrator::Coordinator;
use crate::pipeline::phase_trait::CoordinatorPhase;
use crate::pipeline::state::PipelineState;
use crate::record::RecordStatus;
use anyhow::Result;
use async_trait::async_trait;
use deckhand_core::manifest::PipelineCommand;
use deckhand_core::{PhaseKind, ResolvedVars, RoutingBackend};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

/// Runs `pipeline:` commands through the coordinator that owns the phase.
struct NestedRunner {
    coordinator: Coordinator,
    base_dir: PathBuf,
    namespace: String,
    routing: Option<RoutingBackend>,
    ancestry: Vec<(String, String)>,
    background: Mutex<Vec<BackgroundTask>>,
}

impl NestedRunner {
    fn new(coordinator: &Coordinator, run: &RunContext) -> Self {
        Self {
            coordinator: coordinator.clone(),
            base_dir: run.manifest.base_dir().to_path_buf(),
            namespace: run.namespace.clone(),
            routing: run.options.routing,
            ancestry: run.child_ancestry(),
            background: Mutex::new(Vec::new()),
        }
    }

    /// The nested pipeline gets only what the command passes it. Its image
    /// override applies to the nested pipeline and never leaks back.
    fn options(&self, command: &PipelineCommand, vars: &ResolvedVars) -> RunOptions {
        RunOptions {
            manifest_path: self.base_dir.join(&command.file),
            namespace: Some(
                command
                    .namespace
                    .as_deref()
                    .map(|ns| vars.expand(ns))
                    .unwrap_or_else(|| self.namespace.clone()),
            ),
            name: command.pipeline_name.clone(),
            variables: command
                .variables
                .iter()
                .map(|(k, v)| (k.clone(), vars.expand(v)))
                .collect(),
            image_override: command.image.as_deref().map(|i| vars.expand(i)),
            routing: self.routing,
            ancestry: self.ancestry.clone(),
            ..Default::default()
        }
    }

    fn take_background(&self) -> Vec<BackgroundTask> {
        match self.background.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl NestedPipelineRunner for NestedRunner {
    async fn run_pipeline(
        &self,
        phase: PhaseKind,
        command: &PipelineCommand,
        vars: &ResolvedVars,
    ) -> Result<()> {
        let options = self.options(command, vars);
        let label = format!("pipeline '{}'", options.manifest_path.display());
        let future = match phase {
            PhaseKind::Destroy => self.coordinator.destroy(options),
            PhaseKind::Test => self.coordinator.test(options),
            PhaseKind::Build | PhaseKind::Deploy => self.coordinator.deploy(options),
        };

        if command.wait {
            return future.await.map(|_| ());
        }

        info!(nested = %label, "Running nested pipeline in the background");
        let task = BackgroundTask {
            label,
            handle: tokio::spawn(future),
        };
        match self.background.lock() {
            Ok(mut tasks) => tasks.push(task),
            Err(poisoned) => poisoned.into_inner().push(task),
        }
        Ok(())
    }
}

/// Runs the command list of one manifest phase.
pub struct CommandsPhase {
    kind: PhaseKind,
}

impl CommandsPhase {
    pub fn new(kind: PhaseKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl CoordinatorPhase for CommandsPhase {
    fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    fn state(&self) -> PipelineState {
        match self.kind {
            PhaseKind::Build => PipelineState::Building,
            PhaseKind::Deploy => PipelineState::Deploying,
            PhaseKind::Destroy => PipelineState::Destroying,
            PhaseKind::Test => PipelineState::Testing,
        }
    }

    async fn execute(&self, coordinator: &Coordinator, run: &mut RunContext) -> Result<()> {
        let ctx = coordinator.context();

        if self.kind == PhaseKind::Destroy && run.previous.is_some() {
            run.record.touch(RecordStatus::Destroying);
            ctx.records.save(&run.record).await?;
        }

        let Some(phase) = run.manifest.phase(self.kind).cloned() else {
            return Ok(());
        };
        if phase.commands.is_empty() {
            debug!(phase = %self.kind, "No commands");
            return Ok(());
        }

        let spec = run.manifest.exec_spec(&phase);
        let workdir = run.manifest.base_dir().to_path_buf();
        let target = if spec.remote {
            let image = run
                .options
                .image_override
                .clone()
                .or(spec.image)
                .unwrap_or_else(|| ctx.config.remote_image.clone());
            ExecTarget::Remote { image, workdir }
        } else {
            ExecTarget::Local {
                workdir,
                shell: ctx.config.shell.clone(),
            }
        };

        let timeout = (ctx.config.command_timeout_secs > 0)
            .then(|| Duration::from_secs(ctx.config.command_timeout_secs));
        let executor = PhaseExecutor::new(
            ctx.provisioner.clone(),
            ctx.sink.clone(),
            ctx.progress.clone(),
            ctx.cancel.clone(),
        )
        .with_timeout(timeout);

        let nested = NestedRunner::new(coordinator, run);
        let result = executor
            .run(PhaseRun {
                phase: self.kind,
                commands: &phase.commands,
                vars: &run.vars,
                target,
                continue_on_error: self.kind == PhaseKind::Destroy && run.options.force_destroy,
                nested: Some(&nested),
            })
            .await;
        run.background.extend(nested.take_background());

        let outcome = result.map_err(|error| PipelineError::Phase {
            phase: self.kind,
            error,
        })?;

        for (name, value) in outcome.exports {
            run.vars.set_builtin(name.clone(), value.clone(), true);
            if self.kind == PhaseKind::Deploy {
                run.record.outputs.insert(name.clone(), value.clone());
            }
            run.exports.push((name, value));
        }
        for error in outcome.errors {
            run.warn(format!("{} (ignored by --force-destroy)", error));
        }
        Ok(())
    }
}
