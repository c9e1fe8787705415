//! Runs the commands of one phase, in order, locally or in a container.

mod local;
mod remote;

pub use local::ENV_FILE_VAR;

use crate::cancel::CancelToken;
use crate::error::ExecError;
use crate::output::{MaskingSink, OutputSink};
use crate::provision::{ContainerHandle, Provisioner};
use async_trait::async_trait;
use deckhand_core::manifest::{Command, PipelineCommand};
use deckhand_core::vars::parse_dotenv;
use deckhand_core::{Masker, PhaseKind, PipelineEvent, ProgressHandler, ResolvedVars};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Where the commands of a phase run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecTarget {
    /// A child process of this one.
    Local { workdir: PathBuf, shell: String },
    /// A container provisioned for the duration of the phase.
    Remote { image: String, workdir: PathBuf },
}

/// Runs a `pipeline:` command on behalf of the executor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NestedPipelineRunner: Send + Sync {
    async fn run_pipeline(
        &self,
        phase: PhaseKind,
        command: &PipelineCommand,
        vars: &ResolvedVars,
    ) -> anyhow::Result<()>;
}

pub struct PhaseRun<'a> {
    pub phase: PhaseKind,
    pub commands: &'a [Command],
    pub vars: &'a ResolvedVars,
    pub target: ExecTarget,
    /// Keep going after a failing command and report every failure.
    pub continue_on_error: bool,
    pub nested: Option<&'a dyn NestedPipelineRunner>,
}

#[derive(Debug, Default)]
pub struct PhaseOutcome {
    /// `KEY=VALUE` pairs commands wrote to `$DECKHAND_ENV`, in write order.
    pub exports: Vec<(String, String)>,
    /// Failures tolerated because of `continue_on_error`.
    pub errors: Vec<ExecError>,
}

enum StepError {
    Failed(String),
    Cancelled,
}

pub struct PhaseExecutor {
    provisioner: Arc<dyn Provisioner>,
    sink: Arc<dyn OutputSink>,
    progress: Arc<dyn ProgressHandler>,
    cancel: CancelToken,
    timeout: Option<Duration>,
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending::<()>().await,
    }
}

fn source_label(phase: PhaseKind, index: usize, command: &Command) -> String {
    match command {
        Command::Shell { name: Some(name), .. } => format!("{}:{}", phase, name),
        Command::Pipeline(PipelineCommand { name: Some(name), .. }) => format!("{}:{}", phase, name),
        _ => format!("{}:{}", phase, index),
    }
}

impl PhaseExecutor {
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        sink: Arc<dyn OutputSink>,
        progress: Arc<dyn ProgressHandler>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            provisioner,
            sink,
            progress,
            cancel,
            timeout: None,
        }
    }

    /// Fails any single command that runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|d| !d.is_zero());
        self
    }

    pub async fn run(&self, run: PhaseRun<'_>) -> Result<PhaseOutcome, ExecError> {
        let mut outcome = PhaseOutcome::default();
        if run.commands.is_empty() {
            return Ok(outcome);
        }

        let container = match &run.target {
            ExecTarget::Remote { image, workdir } => {
                Some(remote::provision(self.provisioner.as_ref(), image, workdir).await?)
            }
            ExecTarget::Local { .. } => None,
        };

        let result = self.run_commands(&run, container.as_deref(), &mut outcome).await;
        if let Some(handle) = container {
            remote::release(handle).await;
        }
        result.map(|_| outcome)
    }

    async fn run_commands(
        &self,
        run: &PhaseRun<'_>,
        container: Option<&dyn ContainerHandle>,
        outcome: &mut PhaseOutcome,
    ) -> Result<(), ExecError> {
        let mut vars = run.vars.clone();
        let mut masker = vars.masker();
        let total = run.commands.len();

        for (i, command) in run.commands.iter().enumerate() {
            let index = i + 1;
            let source = source_label(run.phase, index, command);
            let display = masker.mask(&command.display_name()).into_owned();

            if self.cancel.is_cancelled() {
                return Err(ExecError::Cancelled {
                    phase: run.phase,
                    command: display,
                });
            }

            self.progress.on_progress(&PipelineEvent::CommandStarted {
                phase: run.phase,
                index,
                total,
                command: display.clone(),
            });
            let started = Instant::now();

            let result = match command {
                Command::Shell { command: text, .. } => {
                    self.run_shell(text, &run.target, container, &vars, &masker, &source)
                        .await
                }
                Command::Pipeline(nested) => {
                    self.run_nested(run.phase, nested, &vars, run.nested).await
                }
            };

            self.progress.on_progress(&PipelineEvent::CommandComplete {
                phase: run.phase,
                index,
                total,
                duration: started.elapsed(),
                success: result.is_ok(),
            });

            match result {
                Ok(exports) => {
                    for (name, value) in exports {
                        debug!(source = %source, name = %name, "Command exported a variable");
                        masker.add(&value);
                        vars.set_builtin(name.clone(), value.clone(), true);
                        outcome.exports.push((name, value));
                    }
                }
                Err(StepError::Cancelled) => {
                    return Err(ExecError::Cancelled {
                        phase: run.phase,
                        command: display,
                    });
                }
                Err(StepError::Failed(cause)) => {
                    let error = ExecError::Command {
                        phase: run.phase,
                        command: display,
                        cause: masker.mask(&cause).into_owned(),
                    };
                    if !run.continue_on_error {
                        return Err(error);
                    }
                    outcome.errors.push(error);
                }
            }
        }
        Ok(())
    }

    async fn run_shell(
        &self,
        command: &str,
        target: &ExecTarget,
        container: Option<&dyn ContainerHandle>,
        vars: &ResolvedVars,
        masker: &Masker,
        source: &str,
    ) -> Result<Vec<(String, String)>, StepError> {
        let sink = MaskingSink::new(self.sink.clone(), masker.clone());
        let env = vars.env_pairs();

        match (target, container) {
            (_, Some(handle)) => {
                let code = tokio::select! {
                    result = handle.exec(command, &env, source, &sink) => {
                        result.map_err(|e| StepError::Failed(format!("{:#}", e)))?
                    }
                    _ = self.cancel.cancelled() => return Err(StepError::Cancelled),
                    _ = deadline(self.timeout) => return Err(self.timed_out()),
                };
                if code != 0 {
                    return Err(StepError::Failed(format!("exit code {}", code)));
                }
                Ok(Vec::new())
            }
            (ExecTarget::Local { workdir, shell }, None) => {
                let env_file = std::env::temp_dir()
                    .join(format!("deckhand-env-{}", uuid::Uuid::new_v4()));
                let result = self
                    .run_local(shell, command, workdir, &env, &env_file, source, &sink)
                    .await;
                let exports = match result {
                    Ok(()) => read_exports(&env_file).await,
                    Err(e) => Err(e),
                };
                let _ = tokio::fs::remove_file(&env_file).await;
                exports
            }
            (ExecTarget::Remote { .. }, None) => Err(StepError::Failed(
                "no execution container was provisioned".to_string(),
            )),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_local(
        &self,
        shell: &str,
        command: &str,
        workdir: &Path,
        env: &[(String, String)],
        env_file: &Path,
        source: &str,
        sink: &MaskingSink,
    ) -> Result<(), StepError> {
        tokio::fs::write(env_file, "")
            .await
            .map_err(|e| StepError::Failed(format!("failed to create {}: {}", ENV_FILE_VAR, e)))?;

        let child = local::run(
            local::LocalCommand {
                shell,
                command,
                workdir,
                env,
                env_file,
                source,
            },
            sink,
        );

        let code = tokio::select! {
            result = child => result.map_err(|e| StepError::Failed(e.to_string()))?,
            _ = self.cancel.cancelled() => return Err(StepError::Cancelled),
            _ = deadline(self.timeout) => return Err(self.timed_out()),
        };
        if code != 0 {
            return Err(StepError::Failed(format!("exit code {}", code)));
        }
        Ok(())
    }

    async fn run_nested(
        &self,
        phase: PhaseKind,
        command: &PipelineCommand,
        vars: &ResolvedVars,
        runner: Option<&dyn NestedPipelineRunner>,
    ) -> Result<Vec<(String, String)>, StepError> {
        let Some(runner) = runner else {
            return Err(StepError::Failed(
                "nested pipelines are not available here".to_string(),
            ));
        };
        tokio::select! {
            result = runner.run_pipeline(phase, command, vars) => {
                result.map_err(|e| StepError::Failed(format!("{:#}", e)))?
            }
            _ = self.cancel.cancelled() => return Err(StepError::Cancelled),
        };
        Ok(Vec::new())
    }

    fn timed_out(&self) -> StepError {
        let secs = self.timeout.map(|d| d.as_secs_f64()).unwrap_or_default();
        StepError::Failed(format!("timed out after {}s", secs))
    }
}

async fn read_exports(path: &Path) -> Result<Vec<(String, String)>, StepError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| StepError::Failed(format!("failed to read {}: {}", ENV_FILE_VAR, e)))?;
    parse_dotenv(&content, path).map_err(|e| StepError::Failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::CaptureSink;
    use crate::provision::RecordingProvisioner;
    use deckhand_core::vars::resolve;
    use deckhand_core::{NoOpHandler, Tier, VarSource};
    use tempfile::TempDir;

    struct Harness {
        capture: Arc<CaptureSink>,
        provisioner: RecordingProvisioner,
        cancel: CancelToken,
        executor: PhaseExecutor,
        dir: TempDir,
    }

    fn harness() -> Harness {
        let capture = Arc::new(CaptureSink::new());
        let provisioner = RecordingProvisioner::new();
        let cancel = CancelToken::new();
        let executor = PhaseExecutor::new(
            Arc::new(provisioner.clone()),
            capture.clone(),
            Arc::new(NoOpHandler),
            cancel.clone(),
        );
        Harness {
            capture,
            provisioner,
            cancel,
            executor,
            dir: TempDir::new().unwrap(),
        }
    }

    fn local(dir: &TempDir) -> ExecTarget {
        ExecTarget::Local {
            workdir: dir.path().to_path_buf(),
            shell: "sh".to_string(),
        }
    }

    fn shell(commands: &[&str]) -> Vec<Command> {
        commands.iter().map(|c| Command::shell(*c)).collect()
    }

    fn vars(pairs: &[(&str, &str)]) -> ResolvedVars {
        resolve(&[VarSource::new(Tier::Flag, pairs.iter().copied())], &[]).unwrap()
    }

    fn phase_run<'a>(commands: &'a [Command], vars: &'a ResolvedVars, target: ExecTarget) -> PhaseRun<'a> {
        PhaseRun {
            phase: PhaseKind::Deploy,
            commands,
            vars,
            target,
            continue_on_error: false,
            nested: None,
        }
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_commands() {
        let h = harness();
        let commands = shell(&["echo one", "exit 3", "echo never"]);
        let env = vars(&[]);
        let err = h
            .executor
            .run(phase_run(&commands, &env, local(&h.dir)))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "error executing command 'exit 3': exit code 3");
        assert_eq!(h.capture.text(), "one");
    }

    #[tokio::test]
    async fn test_output_and_errors_are_masked() {
        let h = harness();
        let commands = shell(&["echo token=$API_TOKEN", "echo s3cr3t >&2; exit 1"]);
        let env = vars(&[("API_TOKEN", "s3cr3t")]);
        let err = h
            .executor
            .run(phase_run(&commands, &env, local(&h.dir)))
            .await
            .unwrap_err();

        let text = h.capture.text();
        assert!(text.contains("token=***"));
        assert!(!text.contains("s3cr3t"));
        assert!(!err.to_string().contains("s3cr3t"));
        assert!(err.to_string().contains("echo *** >&2"));
    }

    #[tokio::test]
    async fn test_exports_reach_later_commands_masked() {
        let h = harness();
        let commands = shell(&[
            "echo DB_URL=postgres://db:5432 >> \"$DECKHAND_ENV\"",
            "test \"$DB_URL\" = postgres://db:5432 && echo got $DB_URL",
        ]);
        let env = vars(&[]);
        let outcome = h
            .executor
            .run(phase_run(&commands, &env, local(&h.dir)))
            .await
            .unwrap();

        assert_eq!(
            outcome.exports,
            vec![("DB_URL".to_string(), "postgres://db:5432".to_string())]
        );
        assert_eq!(h.capture.text(), "got ***");
    }

    #[tokio::test]
    async fn test_source_labels() {
        let h = harness();
        let commands = vec![
            Command::Shell {
                name: Some("migrate".to_string()),
                command: "echo a".to_string(),
            },
            Command::shell("echo b"),
        ];
        let env = vars(&[]);
        h.executor
            .run(phase_run(&commands, &env, local(&h.dir)))
            .await
            .unwrap();

        let sources: Vec<String> = h.capture.lines().into_iter().map(|l| l.source).collect();
        assert_eq!(sources, vec!["deploy:migrate".to_string(), "deploy:2".to_string()]);
    }

    #[tokio::test]
    async fn test_continue_on_error_collects_failures() {
        let h = harness();
        let commands = shell(&["exit 1", "echo still running", "exit 2"]);
        let env = vars(&[]);
        let mut run = phase_run(&commands, &env, local(&h.dir));
        run.continue_on_error = true;
        let outcome = h.executor.run(run).await.unwrap();

        assert_eq!(outcome.errors.len(), 2);
        assert_eq!(h.capture.text(), "still running");
    }

    #[tokio::test]
    async fn test_cancel_kills_running_command() {
        let h = harness();
        let commands = shell(&["sleep 30", "echo never"]);
        let env = vars(&[]);
        let cancel = h.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let err = h
            .executor
            .run(phase_run(&commands, &env, local(&h.dir)))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(h.capture.text().is_empty());
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut h = harness();
        h.executor = h.executor.with_timeout(Some(Duration::from_millis(200)));
        let commands = shell(&["sleep 10"]);
        let env = vars(&[]);
        let err = h
            .executor
            .run(phase_run(&commands, &env, local(&h.dir)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_remote_runs_in_one_container_with_env() {
        let h = harness();
        h.provisioner.exit_code("make test", 2);
        let commands = shell(&["make build", "make test", "make deploy"]);
        let env = vars(&[("REGION", "eu-west-1")]);
        let target = ExecTarget::Remote {
            image: "builder:1".to_string(),
            workdir: h.dir.path().to_path_buf(),
        };
        let err = h
            .executor
            .run(phase_run(&commands, &env, target))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "error executing command 'make test': exit code 2");
        let execs = h.provisioner.execs();
        assert_eq!(execs.len(), 2);
        assert!(execs.iter().all(|e| e.image == "builder:1"));
        assert!(execs[0]
            .env
            .contains(&("REGION".to_string(), "eu-west-1".to_string())));
        assert_eq!(h.provisioner.provisioned_images().len(), 1);
        assert_eq!(h.provisioner.released(), 1);
    }

    #[tokio::test]
    async fn test_provision_failure() {
        let h = harness();
        h.provisioner.make_unavailable();
        let commands = shell(&["true"]);
        let env = vars(&[]);
        let target = ExecTarget::Remote {
            image: "builder:1".to_string(),
            workdir: h.dir.path().to_path_buf(),
        };
        let err = h.executor.run(phase_run(&commands, &env, target)).await.unwrap_err();
        assert!(matches!(err, ExecError::Provision { .. }));
    }

    #[tokio::test]
    async fn test_pipeline_command_goes_to_nested_runner() {
        let h = harness();
        let nested = PipelineCommand {
            name: Some("db".to_string()),
            file: PathBuf::from("db/deckhand.yaml"),
            pipeline_name: None,
            namespace: None,
            variables: Vec::new(),
            image: None,
            wait: true,
        };
        let commands = vec![Command::Pipeline(nested)];
        let env = vars(&[]);

        let mut runner = MockNestedPipelineRunner::new();
        runner
            .expect_run_pipeline()
            .withf(|phase, cmd, _| *phase == PhaseKind::Deploy && cmd.file == PathBuf::from("db/deckhand.yaml"))
            .times(1)
            .returning(|_, _, _| Err(anyhow::anyhow!("db exploded")));

        let mut run = phase_run(&commands, &env, local(&h.dir));
        run.nested = Some(&runner);
        let err = h.executor.run(run).await.unwrap_err();
        assert_eq!(err.to_string(), "error executing command 'db': db exploded");
    }
}
