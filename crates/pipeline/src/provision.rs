//! Remote execution containers.

use crate::output::{OutputSink, Stream};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub image: String,
    /// Host directory made available to the commands.
    pub workdir: PathBuf,
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self, request: &ProvisionRequest) -> Result<Box<dyn ContainerHandle>>;
}

/// A running container that executes the commands of one phase.
#[async_trait]
pub trait ContainerHandle: Send + Sync {
    fn id(&self) -> &str;

    /// Runs `command` through the container's shell and returns its exit code.
    async fn exec(
        &self,
        command: &str,
        env: &[(String, String)],
        source: &str,
        sink: &dyn OutputSink,
    ) -> Result<i32>;

    async fn release(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedExec {
    pub image: String,
    pub command: String,
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct ProvisionerState {
    provisioned: Vec<ProvisionRequest>,
    execs: Vec<RecordedExec>,
    exit_codes: HashMap<String, i32>,
    released: usize,
    unavailable: bool,
}

/// Pretends to run commands remotely and records what it was asked to do.
#[derive(Debug, Default, Clone)]
pub struct RecordingProvisioner {
    state: Arc<Mutex<ProvisionerState>>,
}

impl RecordingProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// `command` will exit with `code` instead of 0.
    pub fn exit_code(&self, command: &str, code: i32) {
        if let Ok(mut state) = self.state.lock() {
            state.exit_codes.insert(command.to_string(), code);
        }
    }

    /// Every later provision fails.
    pub fn make_unavailable(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.unavailable = true;
        }
    }

    pub fn provisioned_images(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.provisioned.iter().map(|p| p.image.clone()).collect())
            .unwrap_or_default()
    }

    pub fn execs(&self) -> Vec<RecordedExec> {
        self.state
            .lock()
            .map(|s| s.execs.clone())
            .unwrap_or_default()
    }

    pub fn released(&self) -> usize {
        self.state.lock().map(|s| s.released).unwrap_or(0)
    }
}

#[async_trait]
impl Provisioner for RecordingProvisioner {
    async fn provision(&self, request: &ProvisionRequest) -> Result<Box<dyn ContainerHandle>> {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => bail!("provisioner state is poisoned"),
        };
        if state.unavailable {
            bail!("no container runtime available");
        }
        state.provisioned.push(request.clone());
        let id = format!("recorded-{}", state.provisioned.len());
        Ok(Box::new(RecordedContainer {
            id,
            image: request.image.clone(),
            state: self.state.clone(),
        }))
    }
}

struct RecordedContainer {
    id: String,
    image: String,
    state: Arc<Mutex<ProvisionerState>>,
}

#[async_trait]
impl ContainerHandle for RecordedContainer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn exec(
        &self,
        command: &str,
        env: &[(String, String)],
        source: &str,
        sink: &dyn OutputSink,
    ) -> Result<i32> {
        let code = {
            let mut state = match self.state.lock() {
                Ok(s) => s,
                Err(_) => bail!("provisioner state is poisoned"),
            };
            state.execs.push(RecordedExec {
                image: self.image.clone(),
                command: command.to_string(),
                env: env.to_vec(),
            });
            state.exit_codes.get(command).copied().unwrap_or(0)
        };
        sink.line(source, Stream::Stdout, &format!("[{}] {}", self.image, command));
        Ok(code)
    }

    async fn release(&self) -> Result<()> {
        if let Ok(mut state) = self.state.lock() {
            state.released += 1;
        }
        Ok(())
    }
}
