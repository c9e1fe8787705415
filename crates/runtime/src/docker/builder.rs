use super::context;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bollard::errors::Error as DockerError;
use bollard::image::BuildImageOptions;
use bollard::Docker;
use bytes::Bytes;
use deckhand_pipeline::build::{BuildBackend, BuildRequest, BuildResult};
use deckhand_pipeline::output::{OutputSink, Stream};
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Builds images with the Docker daemon's build endpoint.
pub struct DockerBuilder {
    docker: Docker,
}

impl DockerBuilder {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    pub fn connect() -> Result<Self> {
        Ok(Self::new(super::connect()?))
    }
}

pub(crate) fn is_not_found(error: &DockerError) -> bool {
    matches!(
        error,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// `"8080/tcp"` style keys of an image's exposed ports.
pub(crate) fn parse_exposed_ports<'a>(keys: impl IntoIterator<Item = &'a String>) -> Vec<u16> {
    let mut ports: Vec<u16> = keys
        .into_iter()
        .filter_map(|key| key.split('/').next()?.parse().ok())
        .collect();
    ports.sort_unstable();
    ports.dedup();
    ports
}

#[async_trait]
impl BuildBackend for DockerBuilder {
    async fn build(&self, request: &BuildRequest, sink: &dyn OutputSink) -> Result<BuildResult> {
        let source = format!("build:{}", request.target);
        if !request.secrets.is_empty() {
            warn!(
                target_name = %request.target,
                secrets = request.secrets.len(),
                "Build secrets are not supported by the Docker build endpoint, skipping them"
            );
        }

        let context_dir = request.context.clone();
        let dockerfile = request.dockerfile.clone();
        let tar = tokio::task::spawn_blocking(move || context::archive(&context_dir, &dockerfile))
            .await
            .context("Build context task failed")??;
        debug!(target_name = %request.target, bytes = tar.len(), "Archived build context");

        let options = BuildImageOptions {
            dockerfile: request.dockerfile.to_string_lossy().into_owned(),
            t: request.image.clone(),
            target: request.stage.clone().unwrap_or_default(),
            buildargs: request.args.iter().cloned().collect::<HashMap<_, _>>(),
            cachefrom: request.cache_from.clone(),
            rm: true,
            ..Default::default()
        };

        info!(target_name = %request.target, image = %request.image, "Building image");
        let mut stream = self.docker.build_image(options, None, Some(Bytes::from(tar)));
        let mut cache_hit = true;
        while let Some(item) = stream.next().await {
            let info = item.with_context(|| format!("Build of '{}' failed", request.target))?;
            if let Some(error) = info.error {
                sink.line(&source, Stream::Stderr, &error);
                bail!("build of '{}' failed: {}", request.target, error);
            }
            if let Some(text) = info.stream {
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    if line.contains("Running in") {
                        cache_hit = false;
                    }
                    sink.line(&source, Stream::Stdout, line);
                }
            }
        }

        Ok(BuildResult {
            image: request.image.clone(),
            cache_hit,
        })
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to inspect image {}", image)),
        }
    }

    async fn exposed_ports(&self, image: &str) -> Result<Vec<u16>> {
        let inspect = self
            .docker
            .inspect_image(image)
            .await
            .with_context(|| format!("Failed to inspect image {}", image))?;
        Ok(inspect
            .config
            .and_then(|c| c.exposed_ports)
            .map(|ports| parse_exposed_ports(ports.keys()))
            .unwrap_or_default())
    }
}
