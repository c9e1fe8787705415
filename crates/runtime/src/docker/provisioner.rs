use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{Config, CreateContainerOptions, LogOutput, RemoveContainerOptions};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use deckhand_pipeline::output::{OutputSink, Stream};
use deckhand_pipeline::provision::{ContainerHandle, ProvisionRequest, Provisioner};
use futures_util::stream::StreamExt;
use tracing::{debug, info};

/// Where the manifest directory is mounted inside execution containers.
pub const SOURCE_MOUNT: &str = "/deckhand/src";

/// Runs remote phases in throwaway containers on the local Docker daemon.
pub struct DockerProvisioner {
    docker: Docker,
}

impl DockerProvisioner {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    pub fn connect() -> Result<Self> {
        Ok(Self::new(super::connect()?))
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }
        info!(image = %image, "Pulling execution image");
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(result) = stream.next().await {
            result.with_context(|| format!("Failed to pull image '{}'", image))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Provisioner for DockerProvisioner {
    async fn provision(&self, request: &ProvisionRequest) -> Result<Box<dyn ContainerHandle>> {
        self.ensure_image(&request.image).await?;

        let name = format!("deckhand-exec-{}", uuid::Uuid::new_v4().simple());
        let workdir = std::fs::canonicalize(&request.workdir)
            .with_context(|| format!("Failed to resolve {}", request.workdir.display()))?;
        let bind = format!("{}:{}", workdir.display(), SOURCE_MOUNT);
        let config = Config {
            image: Some(request.image.clone()),
            entrypoint: Some(vec!["sleep".to_string()]),
            cmd: Some(vec!["infinity".to_string()]),
            working_dir: Some(SOURCE_MOUNT.to_string()),
            host_config: Some(HostConfig {
                binds: Some(vec![bind]),
                ..Default::default()
            }),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .with_context(|| format!("Failed to create container '{}'", name))?;
        self.docker
            .start_container::<String>(&name, None)
            .await
            .with_context(|| format!("Failed to start container '{}'", name))?;
        debug!(container = %name, image = %request.image, "Execution container started");

        Ok(Box::new(DockerContainer {
            docker: self.docker.clone(),
            name,
        }))
    }
}

struct DockerContainer {
    docker: Docker,
    name: String,
}

#[async_trait]
impl ContainerHandle for DockerContainer {
    fn id(&self) -> &str {
        &self.name
    }

    async fn exec(
        &self,
        command: &str,
        env: &[(String, String)],
        source: &str,
        sink: &dyn OutputSink,
    ) -> Result<i32> {
        let exec = self
            .docker
            .create_exec(
                &self.name,
                CreateExecOptions {
                    cmd: Some(vec!["sh".to_string(), "-c".to_string(), command.to_string()]),
                    env: Some(env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: Some(SOURCE_MOUNT.to_string()),
                    ..Default::default()
                },
            )
            .await
            .context("Failed to create exec")?;

        if let StartExecResults::Attached { mut output, .. } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .context("Failed to start exec")?
        {
            let mut pending = LinePending::default();
            while let Some(chunk) = output.next().await {
                match chunk.context("Failed to read exec output")? {
                    LogOutput::StdOut { message } => {
                        pending.push(Stream::Stdout, &message, source, sink)
                    }
                    LogOutput::StdErr { message } => {
                        pending.push(Stream::Stderr, &message, source, sink)
                    }
                    _ => {}
                }
            }
            pending.flush(source, sink);
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .context("Failed to inspect exec")?;
        Ok(inspect.exit_code.unwrap_or(-1) as i32)
    }

    async fn release(&self) -> Result<()> {
        self.docker
            .remove_container(
                &self.name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .with_context(|| format!("Failed to remove container '{}'", self.name))?;
        debug!(container = %self.name, "Execution container removed");
        Ok(())
    }
}

/// Exec output arrives in arbitrary chunks; lines are emitted whole.
#[derive(Default)]
struct LinePending {
    stdout: String,
    stderr: String,
}

impl LinePending {
    fn push(&mut self, stream: Stream, chunk: &[u8], source: &str, sink: &dyn OutputSink) {
        let buffer = match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        };
        buffer.push_str(&String::from_utf8_lossy(chunk));
        while let Some(pos) = buffer.find('\n') {
            let line: String = buffer.drain(..=pos).collect();
            sink.line(source, stream, line.trim_end_matches(['\n', '\r']));
        }
    }

    fn flush(&mut self, source: &str, sink: &dyn OutputSink) {
        for (stream, buffer) in [
            (Stream::Stdout, &mut self.stdout),
            (Stream::Stderr, &mut self.stderr),
        ] {
            if !buffer.is_empty() {
                sink.line(source, stream, buffer);
                buffer.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckhand_pipeline::output::CaptureSink;

    #[test]
    fn test_chunks_are_split_into_lines() {
        let sink = CaptureSink::new();
        let mut pending = LinePending::default();

        pending.push(Stream::Stdout, b"hel", "deploy:1", &sink);
        pending.push(Stream::Stdout, b"lo\nwor", "deploy:1", &sink);
        pending.push(Stream::Stderr, b"oops\r\n", "deploy:1", &sink);
        pending.flush("deploy:1", &sink);

        let lines: Vec<_> = sink
            .lines()
            .into_iter()
            .map(|l| (l.stream, l.line))
            .collect();
        assert_eq!(
            lines,
            vec![
                (Stream::Stdout, "hello".to_string()),
                (Stream::Stderr, "oops".to_string()),
                (Stream::Stdout, "wor".to_string()),
            ]
        );
    }
}
