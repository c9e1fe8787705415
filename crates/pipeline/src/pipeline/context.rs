use super::state::{PipelineState, StateMachine};
use crate::build::BuildBackend;
use crate::cancel::CancelToken;
use crate::cluster::{ApplyOutcome, ClusterApi};
use crate::git::GitInfo;
use crate::output::{OutputSink, TracingSink};
use crate::provision::Provisioner;
use crate::record::{RunRecord, RunRecordStore};
use deckhand_core::{
    DeckhandConfig, LoggingHandler, Manifest, Masker, ProgressHandler, ResolvedVars,
    RoutingBackend,
};
use deckhand_stack::{ResourceKey, Stack, Translator};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Collaborators shared by every invocation, nested ones included.
pub struct PipelineContext {
    pub config: DeckhandConfig,
    pub cluster: Arc<dyn ClusterApi>,
    pub builder: Arc<dyn BuildBackend>,
    pub provisioner: Arc<dyn Provisioner>,
    pub records: Arc<dyn RunRecordStore>,
    pub progress: Arc<dyn ProgressHandler>,
    pub sink: Arc<dyn OutputSink>,
    pub translator: Arc<Translator>,
    pub cancel: CancelToken,
}

impl PipelineContext {
    pub fn new(
        config: DeckhandConfig,
        cluster: Arc<dyn ClusterApi>,
        builder: Arc<dyn BuildBackend>,
        provisioner: Arc<dyn Provisioner>,
        records: Arc<dyn RunRecordStore>,
    ) -> Self {
        Self {
            config,
            cluster,
            builder,
            provisioner,
            records,
            progress: Arc::new(LoggingHandler),
            sink: Arc::new(TracingSink),
            translator: Arc::new(Translator::with_defaults()),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Deploy,
    Destroy,
    Test,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Deploy => "deploy",
            Action::Destroy => "destroy",
            Action::Test => "test",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to run, as given on the command line or by a parent pipeline.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub manifest_path: PathBuf,
    pub namespace: Option<String>,
    /// Identity override; defaults to the manifest's own identity.
    pub name: Option<String>,
    /// `--var` assignments.
    pub variables: Vec<(String, String)>,
    pub force_build: bool,
    /// Deploy only these compose services (and what they depend on).
    pub services: Vec<String>,
    /// Do not deploy manifest dependencies, only read their records.
    pub skip_dependencies: bool,
    pub routing: Option<RoutingBackend>,
    /// Execution image for remote phases, set by a parent pipeline.
    pub image_override: Option<String>,
    /// Destroy manifest dependencies after the pipeline itself.
    pub destroy_dependencies: bool,
    /// Keep running destroy commands after one fails.
    pub force_destroy: bool,
    /// `(namespace, identity)` of every run this one was started from,
    /// outermost first.
    pub ancestry: Vec<(String, String)>,
}

impl RunOptions {
    pub fn new(manifest_path: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub target: String,
    pub image: String,
    pub fingerprint: String,
    /// Why the build was skipped.
    pub skipped: Option<String>,
    pub forced: bool,
}

/// A pipeline running on its own task, awaited when the parent finishes.
pub struct BackgroundTask {
    pub label: String,
    pub handle: JoinHandle<anyhow::Result<RunSummary>>,
}

/// Mutable state of one invocation, threaded through its phases.
pub struct RunContext {
    pub action: Action,
    pub options: RunOptions,
    pub manifest: Manifest,
    pub name: String,
    pub namespace: String,
    pub vars: ResolvedVars,
    pub state: StateMachine,
    /// Record as it was before this invocation started.
    pub previous: Option<RunRecord>,
    /// Record this invocation writes.
    pub record: RunRecord,
    pub git: GitInfo,
    pub stack: Option<Stack>,
    pub builds: Vec<BuildReport>,
    pub applied: Vec<(ResourceKey, ApplyOutcome)>,
    pub removed: Vec<ResourceKey>,
    pub exports: Vec<(String, String)>,
    pub warnings: Vec<String>,
    pub background: Vec<BackgroundTask>,
}

impl RunContext {
    /// Ancestry handed to the dependencies and nested pipelines this run
    /// starts.
    pub fn child_ancestry(&self) -> Vec<(String, String)> {
        let mut chain = self.options.ancestry.clone();
        chain.push((self.namespace.clone(), self.name.clone()));
        chain
    }

    pub fn masker(&self) -> Masker {
        self.vars.masker()
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = self.masker().mask(&message.into()).into_owned();
        tracing::warn!(pipeline = %self.name, "{}", message);
        self.warnings.push(message);
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            action: self.action,
            state: self.state.state(),
            record: Some(self.record.clone()),
            builds: self.builds.clone(),
            applied: self.applied.clone(),
            removed: self.removed.clone(),
            exports: self.exports.iter().map(|(k, _)| k.clone()).collect(),
            warnings: self.warnings.clone(),
        }
    }
}

/// Result of a finished invocation.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub name: String,
    pub namespace: String,
    pub action: Action,
    pub state: PipelineState,
    /// The saved record; `None` after a destroy removed it.
    pub record: Option<RunRecord>,
    pub builds: Vec<BuildReport>,
    pub applied: Vec<(ResourceKey, ApplyOutcome)>,
    pub removed: Vec<ResourceKey>,
    /// Names of exported variables. Values are never part of a summary.
    pub exports: Vec<String>,
    pub warnings: Vec<String>,
}
