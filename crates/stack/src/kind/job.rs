use super::common::{mount_anonymous, workload_skeleton, workload_spec, DATA_VOLUME};
use super::{KindId, ServiceKind, WorkloadInput};
use crate::model::{RestartPolicy, ServiceDeclaration};
use crate::resource::{PodVolume, Resource, ResourceKind};

/// Services that run to completion.
pub struct JobKind;

impl ServiceKind for JobKind {
    fn id(&self) -> KindId {
        KindId::Job
    }

    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::Job
    }

    fn applies_to(&self, service: &ServiceDeclaration) -> bool {
        service.restart.runs_to_completion()
    }

    fn workload(&self, input: &WorkloadInput<'_>) -> Resource {
        let mut resource = workload_skeleton(input, ResourceKind::Job);
        if let Some(spec) = workload_spec(&mut resource) {
            let policy = match input.service.restart {
                RestartPolicy::No => "Never",
                _ => "OnFailure",
            };
            spec.restart_policy = Some(policy.to_string());
            if mount_anonymous(input, spec, DATA_VOLUME) {
                spec.volumes.push(PodVolume::EmptyDir {
                    name: DATA_VOLUME.to_string(),
                });
            }
        }
        resource
    }
}
