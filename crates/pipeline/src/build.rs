//! The image build seam.

use crate::output::{OutputSink, Stream};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Build target name.
    pub target: String,
    pub context: PathBuf,
    /// Relative to `context`.
    pub dockerfile: PathBuf,
    /// Image reference to tag the result with.
    pub image: String,
    /// Dockerfile stage to stop at.
    pub stage: Option<String>,
    pub args: Vec<(String, String)>,
    pub secrets: Vec<(String, String)>,
    pub cache_from: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub image: String,
    /// Every layer came from cache.
    pub cache_hit: bool,
}

#[async_trait]
pub trait BuildBackend: Send + Sync {
    /// Builds `request`, streaming output to `sink` under the source
    /// `build:<target>`.
    async fn build(&self, request: &BuildRequest, sink: &dyn OutputSink) -> Result<BuildResult>;

    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Ports the image metadata declares as exposed.
    async fn exposed_ports(&self, image: &str) -> Result<Vec<u16>>;
}

/// Splits an image reference into repository and tag (`latest` if none).
pub fn split_image(image: &str) -> (&str, &str) {
    let image = image.split('@').next().unwrap_or(image);
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}

#[derive(Debug, Default)]
struct BuilderState {
    images: HashSet<String>,
    ports: HashMap<String, Vec<u16>>,
    failing: HashSet<String>,
    builds: Vec<BuildRequest>,
}

/// Records build requests without building anything. Used by `--dry-run`
/// and tests.
#[derive(Debug, Default)]
pub struct InMemoryBuilder {
    state: Mutex<BuilderState>,
}

impl InMemoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Images built from `target` report `ports` as exposed.
    pub fn with_exposed_ports(self, target: &str, ports: &[u16]) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.ports.insert(target.to_string(), ports.to_vec());
        }
        self
    }

    pub fn fail_target(&self, target: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.failing.insert(target.to_string());
        }
    }

    /// Forgets a built image, as if it had been pruned from the registry.
    pub fn remove_image(&self, image: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.images.remove(image);
        }
    }

    pub fn builds(&self) -> Vec<BuildRequest> {
        self.state
            .lock()
            .map(|s| s.builds.clone())
            .unwrap_or_default()
    }

    pub fn built_targets(&self) -> Vec<String> {
        self.builds().into_iter().map(|b| b.target).collect()
    }
}

#[async_trait]
impl BuildBackend for InMemoryBuilder {
    async fn build(&self, request: &BuildRequest, sink: &dyn OutputSink) -> Result<BuildResult> {
        let source = format!("build:{}", request.target);
        {
            let mut state = match self.state.lock() {
                Ok(s) => s,
                Err(_) => bail!("builder state is poisoned"),
            };
            state.builds.push(request.clone());
            if state.failing.contains(&request.target) {
                sink.line(&source, Stream::Stderr, "build failed");
                bail!("build of '{}' failed", request.target);
            }
            state.images.insert(request.image.clone());
            if let Some(ports) = state.ports.get(&request.target).cloned() {
                state.ports.insert(request.image.clone(), ports);
            }
        }
        sink.line(&source, Stream::Stdout, &format!("tagged {}", request.image));
        Ok(BuildResult {
            image: request.image.clone(),
            cache_hit: false,
        })
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .map(|s| s.images.contains(image))
            .unwrap_or(false))
    }

    async fn exposed_ports(&self, image: &str) -> Result<Vec<u16>> {
        Ok(self
            .state
            .lock()
            .ok()
            .and_then(|s| s.ports.get(image).cloned())
            .unwrap_or_default())
    }
}
