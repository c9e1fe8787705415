//! Platform-neutral description of the cluster objects a stack turns into.

mod render;

use crate::labels::{self, Labels};
use crate::model::{Healthcheck, Protocol, Resources};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Deployment,
    StatefulSet,
    Job,
    Service,
    PersistentVolumeClaim,
    Ingress,
    #[serde(rename = "HTTPRoute")]
    HttpRoute,
}

impl ResourceKind {
    pub fn all() -> &'static [ResourceKind] {
        &[
            ResourceKind::Deployment,
            ResourceKind::StatefulSet,
            ResourceKind::Job,
            ResourceKind::Service,
            ResourceKind::PersistentVolumeClaim,
            ResourceKind::Ingress,
            ResourceKind::HttpRoute,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Deployment => "Deployment",
            ResourceKind::StatefulSet => "StatefulSet",
            ResourceKind::Job => "Job",
            ResourceKind::Service => "Service",
            ResourceKind::PersistentVolumeClaim => "PersistentVolumeClaim",
            ResourceKind::Ingress => "Ingress",
            ResourceKind::HttpRoute => "HTTPRoute",
        }
    }

    pub fn api_version(self) -> &'static str {
        match self {
            ResourceKind::Deployment | ResourceKind::StatefulSet => "apps/v1",
            ResourceKind::Job => "batch/v1",
            ResourceKind::Service | ResourceKind::PersistentVolumeClaim => "v1",
            ResourceKind::Ingress => "networking.k8s.io/v1",
            ResourceKind::HttpRoute => "gateway.networking.k8s.io/v1",
        }
    }

    /// Fully qualified resource name as `kubectl get` expects it.
    pub fn kubectl_resource(self) -> &'static str {
        match self {
            ResourceKind::Deployment => "deployments.apps",
            ResourceKind::StatefulSet => "statefulsets.apps",
            ResourceKind::Job => "jobs.batch",
            ResourceKind::Service => "services",
            ResourceKind::PersistentVolumeClaim => "persistentvolumeclaims",
            ResourceKind::Ingress => "ingresses.networking.k8s.io",
            ResourceKind::HttpRoute => "httproutes.gateway.networking.k8s.io",
        }
    }

    pub fn is_route(self) -> bool {
        matches!(self, ResourceKind::Ingress | ResourceKind::HttpRoute)
    }

    pub fn is_workload(self) -> bool {
        matches!(
            self,
            ResourceKind::Deployment | ResourceKind::StatefulSet | ResourceKind::Job
        )
    }

    /// Order objects are removed in: routes before the services they point
    /// at, workloads before the volumes they mount.
    pub fn teardown_rank(self) -> u8 {
        match self {
            ResourceKind::Ingress | ResourceKind::HttpRoute => 0,
            ResourceKind::Service => 1,
            ResourceKind::Deployment | ResourceKind::StatefulSet | ResourceKind::Job => 2,
            ResourceKind::PersistentVolumeClaim => 3,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::all()
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown resource kind '{s}'"))
    }
}

/// Identity of a cluster object: two resources with the same key are the
/// same object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    pub labels: Labels,
    pub annotations: Labels,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub kind: ResourceKind,
    pub metadata: ObjectMeta,
    pub spec: ResourceSpec,
}

impl Resource {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(
            self.kind,
            self.metadata.namespace.clone(),
            self.metadata.name.clone(),
        )
    }

    pub fn is_kept(&self) -> bool {
        labels::is_kept(&self.metadata.annotations)
    }

    /// Kubernetes JSON manifest of this resource.
    pub fn to_manifest(&self) -> serde_json::Value {
        render::manifest(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceSpec {
    Workload(WorkloadSpec),
    Service(ServiceSpec),
    Volume(VolumeSpec),
    Route(RouteSpec),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadSpec {
    pub replicas: u32,
    pub selector: Labels,
    pub pod_labels: Labels,
    pub pod_annotations: Labels,
    pub container: ContainerSpec,
    pub volumes: Vec<PodVolume>,
    pub claim_templates: Vec<ClaimTemplate>,
    /// Governing network service of a StatefulSet.
    pub service_name: Option<String>,
    /// `Never` or `OnFailure` for jobs.
    pub restart_policy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub ports: Vec<ContainerPort>,
    pub mounts: Vec<Mount>,
    pub working_dir: Option<String>,
    pub resources: Resources,
    pub healthcheck: Option<Healthcheck>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerPort {
    pub port: u16,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub volume: String,
    pub mount_path: String,
    pub sub_path: Option<String>,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodVolume {
    Claim { name: String, claim_name: String },
    EmptyDir { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimTemplate {
    pub name: String,
    pub labels: Labels,
    pub annotations: Labels,
    pub size: String,
    pub storage_class: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub selector: Labels,
    pub ports: Vec<ServicePort>,
    pub headless: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
    pub target_port: u16,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    pub size: String,
    pub storage_class: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    pub rules: Vec<RouteRule>,
    /// Parent gateway; set for HTTPRoutes only.
    pub gateway: Option<crate::routing::GatewayRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub path: String,
    pub service: String,
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_display() {
        for kind in ResourceKind::all() {
            assert_eq!(kind.to_string().parse::<ResourceKind>().unwrap(), *kind);
        }
        assert_eq!("httproute".parse::<ResourceKind>().unwrap(), ResourceKind::HttpRoute);
    }

    #[test]
    fn test_route_kinds() {
        let routes: Vec<_> = ResourceKind::all().iter().filter(|k| k.is_route()).collect();
        assert_eq!(routes, vec![&ResourceKind::Ingress, &ResourceKind::HttpRoute]);
    }

    #[test]
    fn test_key_display() {
        let key = ResourceKey::new(ResourceKind::Service, "dev", "api");
        assert_eq!(key.to_string(), "Service/dev/api");
    }
}
