use super::common::{mount_anonymous, workload_skeleton, workload_spec, DATA_VOLUME};
use super::{KindId, ServiceKind, WorkloadInput};
use crate::model::ServiceDeclaration;
use crate::resource::{PodVolume, Resource, ResourceKind};

/// Long-running replicas without per-replica state.
pub struct StatelessKind;

impl ServiceKind for StatelessKind {
    fn id(&self) -> KindId {
        KindId::Stateless
    }

    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::Deployment
    }

    fn applies_to(&self, _service: &ServiceDeclaration) -> bool {
        true
    }

    fn workload(&self, input: &WorkloadInput<'_>) -> Resource {
        let mut resource = workload_skeleton(input, ResourceKind::Deployment);
        if let Some(spec) = workload_spec(&mut resource) {
            // anonymous mounts do not outlive the pod here
            if mount_anonymous(input, spec, DATA_VOLUME) {
                spec.volumes.push(PodVolume::EmptyDir {
                    name: DATA_VOLUME.to_string(),
                });
            }
        }
        resource
    }
}
