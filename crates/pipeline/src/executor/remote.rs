use crate::error::ExecError;
use crate::provision::{ContainerHandle, ProvisionRequest, Provisioner};
use std::path::Path;
use tracing::{info, warn};

pub(super) async fn provision(
    provisioner: &dyn Provisioner,
    image: &str,
    workdir: &Path,
) -> Result<Box<dyn ContainerHandle>, ExecError> {
    info!(image = %image, "Provisioning execution container");
    provisioner
        .provision(&ProvisionRequest {
            image: image.to_string(),
            workdir: workdir.to_path_buf(),
        })
        .await
        .map_err(|e| ExecError::Provision {
            image: image.to_string(),
            message: format!("{:#}", e),
        })
}

pub(super) async fn release(handle: Box<dyn ContainerHandle>) {
    if let Err(e) = handle.release().await {
        warn!(container = %handle.id(), error = %e, "Failed to release execution container");
    }
}
