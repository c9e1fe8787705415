use deckhand_core::{DeckhandConfig, NoOpHandler, RoutingBackend};
use deckhand_pipeline::output::CaptureSink;
use deckhand_pipeline::{
    CancelToken, Coordinator, InMemoryBuilder, InMemoryCluster, MemoryRunRecordStore,
    PipelineContext, RecordingProvisioner, RunOptions,
};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

#[allow(dead_code)]
pub struct Harness {
    pub workspace: TempDir,
    pub cluster: Arc<InMemoryCluster>,
    pub builder: Arc<InMemoryBuilder>,
    pub provisioner: RecordingProvisioner,
    pub records: Arc<MemoryRunRecordStore>,
    pub output: Arc<CaptureSink>,
    pub cancel: CancelToken,
    pub coordinator: Coordinator,
}

pub fn config(state_dir: &Path) -> DeckhandConfig {
    DeckhandConfig {
        namespace: "dev".to_string(),
        routing_backend: RoutingBackend::Ingress,
        registry: "registry.test".to_string(),
        state_dir: state_dir.to_path_buf(),
        platform_vars_path: None,
        shell: "sh".to_string(),
        remote_image: "alpine:3.20".to_string(),
        command_timeout_secs: 0,
        ..DeckhandConfig::default()
    }
}

#[allow(dead_code)]
impl Harness {
    pub fn new() -> Self {
        Self::with_builder(InMemoryBuilder::new())
    }

    pub fn with_builder(builder: InMemoryBuilder) -> Self {
        let workspace = TempDir::new().unwrap();
        let cluster = Arc::new(InMemoryCluster::new());
        let builder = Arc::new(builder);
        let provisioner = RecordingProvisioner::new();
        let records = Arc::new(MemoryRunRecordStore::new());
        let output = Arc::new(CaptureSink::new());
        let cancel = CancelToken::new();

        let ctx = PipelineContext::new(
            config(&workspace.path().join(".state")),
            cluster.clone(),
            builder.clone(),
            Arc::new(provisioner.clone()),
            records.clone(),
        )
        .with_progress(Arc::new(NoOpHandler))
        .with_sink(output.clone())
        .with_cancel(cancel.clone());

        Self {
            workspace,
            cluster,
            builder,
            provisioner,
            records,
            output,
            cancel,
            coordinator: Coordinator::new(ctx),
        }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.workspace.path().join(rel)
    }

    /// Writes `content` to `rel` under the workspace, creating parents.
    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    pub fn options(&self, manifest: &str) -> RunOptions {
        RunOptions::new(self.path(manifest))
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path(rel)).unwrap()
    }
}

/// Sets a process environment variable for the lifetime of the guard.
pub struct EnvGuard {
    key: String,
    old_value: Option<String>,
}

#[allow(dead_code)]
impl EnvGuard {
    pub fn set(key: &str, value: &str) -> Self {
        let old_value = env::var(key).ok();
        env::set_var(key, value);
        Self {
            key: key.to_string(),
            old_value,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        match &self.old_value {
            Some(v) => env::set_var(&self.key, v),
            None => env::remove_var(&self.key),
        }
    }
}
