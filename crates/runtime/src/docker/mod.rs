//! Docker daemon backed image builds and remote execution containers.

pub mod builder;
pub mod context;
pub mod provisioner;

pub use builder::DockerBuilder;
pub use provisioner::{DockerProvisioner, SOURCE_MOUNT};

use anyhow::{Context, Result};
use bollard::Docker;

/// Connects to the daemon named by `DOCKER_HOST`, or the local socket.
pub fn connect() -> Result<Docker> {
    Docker::connect_with_local_defaults().context("Failed to connect to the Docker daemon")
}
