use super::common::{mount_anonymous, workload_skeleton, workload_spec, DATA_VOLUME};
use super::{KindId, ServiceKind, WorkloadInput};
use crate::labels;
use crate::model::{ServiceDeclaration, DEFAULT_VOLUME_SIZE};
use crate::resource::{ClaimTemplate, Resource, ResourceKind};
use deckhand_core::naming::sanitize_name;

/// Replicas with stable identity and a claim per replica.
pub struct StatefulKind;

impl ServiceKind for StatefulKind {
    fn id(&self) -> KindId {
        KindId::Stateful
    }

    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::StatefulSet
    }

    fn applies_to(&self, service: &ServiceDeclaration) -> bool {
        service.has_volumes()
    }

    fn workload(&self, input: &WorkloadInput<'_>) -> Resource {
        let mut resource = workload_skeleton(input, ResourceKind::StatefulSet);
        let name = sanitize_name(&input.service.name);
        let scope = input.scope;

        if let Some(spec) = workload_spec(&mut resource) {
            spec.service_name = Some(name.clone());
            if mount_anonymous(input, spec, DATA_VOLUME) {
                // The claim inherits the workload annotations, not its labels.
                spec.claim_templates.push(ClaimTemplate {
                    name: DATA_VOLUME.to_string(),
                    labels: labels::service(scope.owner, scope.stack, &name),
                    annotations: input.service.annotations.clone(),
                    size: DEFAULT_VOLUME_SIZE.to_string(),
                    storage_class: None,
                });
            }
        }
        resource
    }
}
