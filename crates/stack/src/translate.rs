//! Stack → cluster resource translation.

use crate::error::StackError;
use crate::kind::{KindRegistry, WorkloadInput};
use crate::model::{PortMapping, ServiceDependency, Stack};
use crate::network::network_service;
use crate::resource::{Resource, ResourceKey, ResourceKind};
use crate::routing::{self, router_for, GatewayRef};
use crate::validate::validate;
use crate::volume::persistent_volume;
use deckhand_core::manifest::EndpointDeclaration;
use deckhand_core::{DeckhandConfig, RoutingBackend, ValidationError};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Naming context every translated object shares.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub stack: &'a str,
    pub namespace: &'a str,
    /// Value of the `deployed-by` label.
    pub owner: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslateMode {
    Full,
    /// Only the named services plus everything they transitively depend on.
    Partial(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct TranslateOptions {
    pub namespace: String,
    pub owner: String,
    pub routing: RoutingBackend,
    pub gateway: GatewayRef,
    pub mode: TranslateMode,
    /// Built images by service name; these win over the declared `image`.
    pub images: HashMap<String, String>,
    /// Ports read from image metadata, used when a service declares none.
    pub discovered_ports: HashMap<String, Vec<u16>>,
    /// Manifest-level endpoints. They may route to services deployed by
    /// phase commands, so they are not checked against the stack.
    pub endpoints: Vec<EndpointDeclaration>,
}

impl TranslateOptions {
    pub fn new(namespace: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            owner: owner.into(),
            routing: RoutingBackend::default(),
            gateway: GatewayRef {
                name: "deckhand".to_string(),
                namespace: "gateway-system".to_string(),
            },
            mode: TranslateMode::Full,
            images: HashMap::new(),
            discovered_ports: HashMap::new(),
            endpoints: Vec::new(),
        }
    }

    pub fn from_config(config: &DeckhandConfig, namespace: &str, owner: &str) -> Self {
        Self {
            routing: config.routing_backend,
            gateway: GatewayRef {
                name: config.gateway_name.clone(),
                namespace: config.gateway_namespace.clone(),
            },
            ..Self::new(namespace, owner)
        }
    }
}

/// The desired cluster state of one stack.
#[derive(Debug, Clone)]
pub struct TranslatedResourceSet {
    pub stack: String,
    pub namespace: String,
    pub owner: String,
    pub routing_kind: ResourceKind,
    /// Whether only part of the stack was translated.
    pub partial: bool,
    /// Services this set covers, in name order.
    pub services: Vec<String>,
    resources: Vec<Resource>,
    workloads: BTreeMap<String, ResourceKey>,
    depends_on: BTreeMap<String, Vec<ServiceDependency>>,
}

impl TranslatedResourceSet {
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn keys(&self) -> BTreeSet<ResourceKey> {
        self.resources.iter().map(Resource::key).collect()
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&Resource> {
        self.resources.iter().find(|r| &r.key() == key)
    }

    pub fn by_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(move |r| r.kind == kind)
    }

    pub fn routes(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(|r| r.kind.is_route())
    }

    /// Workload object of a translated service.
    pub fn workload_of(&self, service: &str) -> Option<&ResourceKey> {
        self.workloads.get(service)
    }

    /// Service a workload object belongs to.
    pub fn service_of(&self, key: &ResourceKey) -> Option<&str> {
        self.workloads
            .iter()
            .find(|(_, k)| *k == key)
            .map(|(service, _)| service.as_str())
    }

    pub fn dependencies_of(&self, service: &str) -> &[ServiceDependency] {
        self.depends_on.get(service).map(Vec::as_slice).unwrap_or_default()
    }

    /// Length of the longest `depends_on` chain below `service`. Validation
    /// has ruled out cycles.
    pub fn dependency_depth(&self, service: &str) -> usize {
        self.dependencies_of(service)
            .iter()
            .map(|d| self.dependency_depth(&d.service) + 1)
            .max()
            .unwrap_or(0)
    }
}

pub struct Translator {
    registry: KindRegistry,
}

impl Translator {
    pub fn new(registry: KindRegistry) -> Self {
        Self { registry }
    }

    pub fn with_defaults() -> Self {
        Self::new(KindRegistry::with_defaults())
    }

    pub fn registry(&self) -> &KindRegistry {
        &self.registry
    }

    /// Validates the whole stack, then translates the services `opts.mode`
    /// selects. The output only depends on the inputs, so translating the
    /// same stack twice yields identical sets.
    pub fn translate(
        &self,
        stack: &Stack,
        opts: &TranslateOptions,
    ) -> Result<TranslatedResourceSet, StackError> {
        validate(stack, &self.registry)?;
        let selected = selection(stack, &opts.mode)?;

        let scope = Scope {
            stack: &stack.name,
            namespace: &opts.namespace,
            owner: &opts.owner,
        };
        let mut resources = Vec::new();
        let mut workloads = BTreeMap::new();
        let mut depends_on = BTreeMap::new();

        for svc in stack.services.values().filter(|s| selected.contains(&s.name)) {
            let image = opts
                .images
                .get(&svc.name)
                .cloned()
                .or_else(|| svc.image.clone())
                .ok_or_else(|| StackError::MissingImage {
                    service: svc.name.clone(),
                })?;

            let ports: Vec<PortMapping> = if svc.ports.is_empty() {
                opts.discovered_ports
                    .get(&svc.name)
                    .map(|ports| ports.iter().copied().map(PortMapping::new).collect())
                    .unwrap_or_default()
            } else {
                svc.ports.clone()
            };

            let kind = self.registry.kind_for(svc)?;
            debug!(service = %svc.name, kind = %kind.id(), "Translating service");
            let workload = kind.workload(&WorkloadInput {
                scope: &scope,
                service: svc,
                image,
                ports: &ports,
            });
            workloads.insert(svc.name.clone(), workload.key());
            depends_on.insert(svc.name.clone(), svc.depends_on.clone());
            resources.push(workload);

            if let Some(service) = network_service(&scope, svc, svc.endpoint_mode()?, &ports) {
                resources.push(service);
            }
        }

        let mounted: HashSet<&str> = stack
            .services
            .values()
            .filter(|s| selected.contains(&s.name))
            .flat_map(|s| s.named_mounts().map(|(name, _)| name))
            .collect();
        for volume in stack.volumes.values() {
            if opts.mode == TranslateMode::Full || mounted.contains(volume.name.as_str()) {
                resources.push(persistent_volume(&scope, volume));
            }
        }

        let router = router_for(opts.routing, opts.gateway.clone());
        let mut route_names = HashSet::new();
        let declared = stack
            .endpoints
            .iter()
            .map(|e| (e, true))
            .chain(opts.endpoints.iter().map(|e| (e, false)))
            .enumerate()
            .map(|(index, (endpoint, in_stack))| {
                (routing::endpoint_name(&stack.name, index, endpoint), endpoint.clone(), in_stack)
            });
        let public = routing::public_endpoints(stack)
            .into_iter()
            .map(|endpoint| (routing::endpoint_name(&stack.name, 0, &endpoint), endpoint, true));

        for (name, endpoint, in_stack) in declared.chain(public) {
            // stack rules are validated above; skip routes to unselected services
            if in_stack && !endpoint.rules.iter().all(|rule| selected.contains(&rule.service)) {
                continue;
            }
            if !route_names.insert(name.clone()) {
                return Err(ValidationError::InvalidName {
                    name,
                    reason: "more than one endpoint has this name".to_string(),
                }
                .into());
            }
            resources.push(routing::translate_endpoint(router.as_ref(), &scope, &name, &endpoint));
        }

        Ok(TranslatedResourceSet {
            stack: stack.name.clone(),
            namespace: opts.namespace.clone(),
            owner: opts.owner.clone(),
            routing_kind: router.kind(),
            partial: opts.mode != TranslateMode::Full,
            services: selected.into_iter().collect(),
            resources,
            workloads,
            depends_on,
        })
    }
}

impl Default for Translator {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Selected services plus their transitive `depends_on` closure.
fn selection(stack: &Stack, mode: &TranslateMode) -> Result<BTreeSet<String>, StackError> {
    let roots = match mode {
        TranslateMode::Full => return Ok(stack.services.keys().cloned().collect()),
        TranslateMode::Partial(names) => names,
    };

    let mut selected = BTreeSet::new();
    let mut pending: Vec<&str> = Vec::new();
    for name in roots {
        if !stack.services.contains_key(name) {
            return Err(StackError::UnknownService { name: name.clone() });
        }
        pending.push(name);
    }

    while let Some(name) = pending.pop() {
        if !selected.insert(name.to_string()) {
            continue;
        }
        if let Some(svc) = stack.service(name) {
            pending.extend(svc.dependency_names());
        }
    }
    Ok(selected)
}
