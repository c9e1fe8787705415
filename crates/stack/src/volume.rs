//! Persistent volume claims for top-level named volumes.

use crate::labels;
use crate::model::NamedVolume;
use crate::resource::{ObjectMeta, Resource, ResourceKind, ResourceSpec, VolumeSpec};
use crate::translate::Scope;
use deckhand_core::naming::sanitize_name;

/// Named volumes carry only their own labels and annotations, never those
/// of the services that mount them.
pub fn persistent_volume(scope: &Scope<'_>, volume: &NamedVolume) -> Resource {
    let name = claim_name(&volume.name);

    let mut annotations = volume.annotations.clone();
    if volume.keep {
        annotations.insert(labels::POLICY_ANNOTATION.to_string(), labels::POLICY_KEEP.to_string());
    }

    Resource {
        kind: ResourceKind::PersistentVolumeClaim,
        metadata: ObjectMeta {
            name: name.clone(),
            namespace: scope.namespace.to_string(),
            labels: labels::merge_user(labels::volume(scope.owner, scope.stack, &name), &volume.labels),
            annotations,
        },
        spec: ResourceSpec::Volume(VolumeSpec {
            size: volume.size.clone(),
            storage_class: volume.storage_class.clone(),
        }),
    }
}

pub fn claim_name(volume: &str) -> String {
    sanitize_name(volume)
}
