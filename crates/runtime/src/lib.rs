//! Production backends for the pipeline seams: the Docker daemon for image
//! builds and remote execution, `kubectl` for the cluster.

pub mod docker;
pub mod kubectl;

pub use docker::{DockerBuilder, DockerProvisioner};
pub use kubectl::KubectlCluster;
