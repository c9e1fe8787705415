use super::WorkloadInput;
use crate::labels;
use crate::model::MountSource;
use crate::resource::{
    ContainerPort, ContainerSpec, Mount, ObjectMeta, PodVolume, Resource, ResourceKind,
    ResourceSpec, WorkloadSpec,
};
use crate::volume::claim_name;
use deckhand_core::naming::sanitize_name;
use std::collections::HashSet;
use tracing::warn;

/// Name of the per-service volume backing anonymous mounts.
pub(super) const DATA_VOLUME: &str = "data";

/// Workload skeleton shared by every kind: metadata, selector and the single
/// container with its named-volume mounts.
///
/// Anonymous mounts are left to the caller, bind mounts are dropped.
pub(super) fn workload_skeleton(input: &WorkloadInput<'_>, kind: ResourceKind) -> Resource {
    let svc = input.service;
    let scope = input.scope;
    let name = sanitize_name(&svc.name);

    let workload_labels =
        labels::merge_user(labels::service(scope.owner, scope.stack, &name), &svc.labels);

    let mut seen = HashSet::new();
    let ports = input
        .ports
        .iter()
        .filter(|p| seen.insert((p.container, p.protocol)))
        .map(|p| ContainerPort {
            port: p.container,
            protocol: p.protocol,
        })
        .collect();

    let mut mounts = Vec::new();
    let mut volumes = Vec::new();
    for mount in &svc.volumes {
        match &mount.source {
            MountSource::Named(volume) => {
                let claim = claim_name(volume);
                if !volumes.iter().any(|v| matches!(v, PodVolume::Claim { name, .. } if *name == claim)) {
                    volumes.push(PodVolume::Claim {
                        name: claim.clone(),
                        claim_name: claim.clone(),
                    });
                }
                mounts.push(Mount {
                    volume: claim,
                    mount_path: mount.target.clone(),
                    sub_path: None,
                    read_only: mount.read_only,
                });
            }
            MountSource::Bind(source) => {
                warn!(
                    service = %svc.name,
                    source = %source,
                    target = %mount.target,
                    "Bind mounts are not supported on the cluster, skipping"
                );
            }
            MountSource::Anonymous => {}
        }
    }

    let container = ContainerSpec {
        name: name.clone(),
        image: input.image.clone(),
        command: svc.entrypoint.clone(),
        args: svc.command.clone(),
        env: svc.environment.clone(),
        ports,
        mounts,
        working_dir: svc.working_dir.clone(),
        resources: svc.resources.clone(),
        healthcheck: svc.healthcheck.clone(),
    };

    Resource {
        kind,
        metadata: ObjectMeta {
            name: name.clone(),
            namespace: scope.namespace.to_string(),
            labels: workload_labels.clone(),
            annotations: svc.annotations.clone(),
        },
        spec: ResourceSpec::Workload(WorkloadSpec {
            replicas: svc.replicas,
            selector: labels::selector(scope.stack, &name),
            pod_labels: workload_labels,
            pod_annotations: svc.annotations.clone(),
            container,
            volumes,
            claim_templates: Vec::new(),
            service_name: None,
            restart_policy: None,
        }),
    }
}

/// Mounts every anonymous mount of the service on `volume`, each in its own
/// `data-<n>` sub path.
pub(super) fn mount_anonymous(input: &WorkloadInput<'_>, spec: &mut WorkloadSpec, volume: &str) -> bool {
    let mut any = false;
    for (index, mount) in input.service.anonymous_mounts().enumerate() {
        spec.container.mounts.push(Mount {
            volume: volume.to_string(),
            mount_path: mount.target.clone(),
            sub_path: Some(format!("{DATA_VOLUME}-{index}")),
            read_only: mount.read_only,
        });
        any = true;
    }
    any
}

pub(super) fn workload_spec(resource: &mut Resource) -> Option<&mut WorkloadSpec> {
    match &mut resource.spec {
        ResourceSpec::Workload(spec) => Some(spec),
        _ => None,
    }
}
