//! Workload kinds and the registry that picks one per service.

mod common;
mod job;
mod stateful;
mod stateless;

pub use job::JobKind;
pub use stateful::StatefulKind;
pub use stateless::StatelessKind;

use crate::model::{PortMapping, ServiceDeclaration};
use crate::resource::{Resource, ResourceKind};
use crate::translate::Scope;
use deckhand_core::ValidationError;
use std::collections::HashMap;
use std::sync::Arc;

crate::define_id_enum! {
    /// Identifier of a workload kind, as written in `x-kind`
    KindId {
        Stateless => "stateless",
        Stateful => "stateful",
        Job => "job",
    }
}

/// Everything a kind needs to build the workload of one service.
pub struct WorkloadInput<'a> {
    pub scope: &'a Scope<'a>,
    pub service: &'a ServiceDeclaration,
    /// Image after build outputs are applied.
    pub image: String,
    /// Declared ports, or the ports discovered from the image.
    pub ports: &'a [PortMapping],
}

pub trait ServiceKind: Send + Sync {
    fn id(&self) -> KindId;

    fn resource_kind(&self) -> ResourceKind;

    /// Whether this kind fits a service that does not declare `x-kind`.
    fn applies_to(&self, service: &ServiceDeclaration) -> bool;

    fn workload(&self, input: &WorkloadInput<'_>) -> Resource;
}

pub struct KindRegistry {
    kinds: HashMap<KindId, Arc<dyn ServiceKind>>,
    detection_order: Vec<KindId>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self {
            kinds: HashMap::new(),
            detection_order: Vec::new(),
        }
    }

    /// Run-to-completion services become jobs, services with volumes
    /// become stateful sets, everything else a deployment.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(JobKind));
        registry.register(Arc::new(StatefulKind));
        registry.register(Arc::new(StatelessKind));
        registry
    }

    /// Adds a kind; kinds registered earlier are tried first.
    pub fn register(&mut self, kind: Arc<dyn ServiceKind>) {
        let id = kind.id();
        if !self.detection_order.contains(&id) {
            self.detection_order.push(id.clone());
        }
        self.kinds.insert(id, kind);
    }

    pub fn get(&self, id: &KindId) -> Option<&dyn ServiceKind> {
        self.kinds.get(id).map(|k| k.as_ref())
    }

    pub fn kind_for(&self, service: &ServiceDeclaration) -> Result<&dyn ServiceKind, ValidationError> {
        let unknown = |kind: &str| ValidationError::UnknownServiceKind {
            service: service.name.clone(),
            kind: kind.to_string(),
        };

        if let Some(explicit) = service.kind.as_deref() {
            return self.get(&KindId::from_name(explicit)).ok_or_else(|| unknown(explicit));
        }

        self.detection_order
            .iter()
            .filter_map(|id| self.get(id))
            .find(|k| k.applies_to(service))
            .ok_or_else(|| unknown("<none>"))
    }
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
