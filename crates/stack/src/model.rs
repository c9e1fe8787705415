//! Parsed compose services, before any cluster-specific translation.

use deckhand_core::manifest::EndpointDeclaration;
use deckhand_core::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_VOLUME_SIZE: &str = "1Gi";

/// Every service, named volume and endpoint of one compose file set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stack {
    /// Sanitized stack name, from the compose `name` or the manifest.
    pub name: String,
    pub services: BTreeMap<String, ServiceDeclaration>,
    pub volumes: BTreeMap<String, NamedVolume>,
    pub endpoints: Vec<EndpointDeclaration>,
}

impl Stack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDeclaration> {
        self.services.get(name)
    }

    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }
}

crate::define_id_enum! {
    /// When a service may start relative to one of its `depends_on` entries.
    DependsOnCondition {
        Started => "service_started",
        Healthy => "service_healthy",
        CompletedSuccessfully => "service_completed_successfully",
    }
}

impl Default for DependsOnCondition {
    fn default() -> Self {
        Self::Started
    }
}

/// One `depends_on` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceDependency {
    pub service: String,
    pub condition: DependsOnCondition,
}

impl ServiceDependency {
    pub fn new(service: impl Into<String>, condition: DependsOnCondition) -> Self {
        Self {
            service: service.into(),
            condition,
        }
    }

    pub fn started(service: impl Into<String>) -> Self {
        Self::new(service, DependsOnCondition::Started)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceDeclaration {
    pub name: String,
    pub image: Option<String>,
    pub build: Option<ServiceBuild>,
    pub entrypoint: Vec<String>,
    pub command: Vec<String>,
    /// `env_file` entries first, then `environment`, in declaration order.
    pub environment: Vec<(String, String)>,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<VolumeMount>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub depends_on: Vec<ServiceDependency>,
    pub healthcheck: Option<Healthcheck>,
    /// Raw `deploy.endpoint_mode`; checked by [`ServiceDeclaration::endpoint_mode`].
    pub endpoint_mode: Option<String>,
    pub replicas: u32,
    pub restart: RestartPolicy,
    pub resources: Resources,
    pub working_dir: Option<String>,
    /// Explicit `x-kind`.
    pub kind: Option<String>,
    /// `x-public`.
    pub public: bool,
}

impl ServiceDeclaration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replicas: 1,
            ..Default::default()
        }
    }

    pub fn endpoint_mode(&self) -> Result<EndpointMode, ValidationError> {
        match self.endpoint_mode.as_deref() {
            None => Ok(EndpointMode::Vip),
            Some(value) => value
                .parse()
                .map_err(|_| ValidationError::InvalidEndpointMode {
                    service: self.name.clone(),
                    value: value.to_string(),
                }),
        }
    }

    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.depends_on.iter().map(|d| d.service.as_str())
    }

    /// Mounts with no source, backed by the service's own claim.
    pub fn anonymous_mounts(&self) -> impl Iterator<Item = &VolumeMount> {
        self.volumes
            .iter()
            .filter(|m| matches!(m.source, MountSource::Anonymous))
    }

    pub fn named_mounts(&self) -> impl Iterator<Item = (&str, &VolumeMount)> {
        self.volumes.iter().filter_map(|m| match &m.source {
            MountSource::Named(name) => Some((name.as_str(), m)),
            _ => None,
        })
    }

    pub fn has_volumes(&self) -> bool {
        self.volumes
            .iter()
            .any(|m| !matches!(m.source, MountSource::Bind(_)))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceBuild {
    pub context: PathBuf,
    pub dockerfile: Option<PathBuf>,
    pub target: Option<String>,
    pub args: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "tcp" => Some(Protocol::Tcp),
            "udp" => Some(Protocol::Udp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortMapping {
    /// Port the container listens on.
    pub container: u16,
    /// Port exposed by the network service; defaults to `container`.
    pub published: Option<u16>,
    pub protocol: Protocol,
}

impl PortMapping {
    pub fn new(container: u16) -> Self {
        Self {
            container,
            published: None,
            protocol: Protocol::Tcp,
        }
    }

    pub fn service_port(&self) -> u16 {
        self.published.unwrap_or(self.container)
    }

    /// `p-<port>-<protocol>`, unique per port and protocol.
    pub fn port_name(&self) -> String {
        format!(
            "p-{}-{}",
            self.service_port(),
            self.protocol.as_str().to_ascii_lowercase()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSource {
    /// Host path; has no cluster counterpart.
    Bind(String),
    /// Top-level named volume.
    Named(String),
    Anonymous,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub source: MountSource,
    pub target: String,
    pub read_only: bool,
}

/// A top-level `volumes:` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedVolume {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub size: String,
    pub storage_class: Option<String>,
    pub keep: bool,
}

impl NamedVolume {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            size: DEFAULT_VOLUME_SIZE.to_string(),
            storage_class: None,
            keep: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Healthcheck {
    /// Compose `test`, with the leading `CMD`/`CMD-SHELL` marker removed and
    /// `CMD-SHELL` turned into an `sh -c` invocation.
    pub test: Vec<String>,
    pub http: Option<HttpCheck>,
    pub interval_secs: Option<u32>,
    pub timeout_secs: Option<u32>,
    pub start_period_secs: Option<u32>,
    pub retries: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpCheck {
    pub path: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    #[default]
    Always,
    UnlessStopped,
    OnFailure,
    No,
}

impl RestartPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "always" | "any" => Some(RestartPolicy::Always),
            "unless-stopped" => Some(RestartPolicy::UnlessStopped),
            "on-failure" => Some(RestartPolicy::OnFailure),
            "no" | "none" => Some(RestartPolicy::No),
            _ => None,
        }
    }

    /// Whether the service runs to completion instead of forever.
    pub fn runs_to_completion(self) -> bool {
        matches!(self, RestartPolicy::OnFailure | RestartPolicy::No)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resources {
    pub cpus: Option<String>,
    pub memory: Option<String>,
}

impl Resources {
    pub fn is_empty(&self) -> bool {
        self.cpus.is_none() && self.memory.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointMode {
    /// Stable cluster-assigned address.
    Vip,
    /// Headless; clients resolve every replica through DNS.
    Dnsrr,
}

impl std::str::FromStr for EndpointMode {
    type Err = ();

    // Case-sensitive, like compose itself.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vip" => Ok(EndpointMode::Vip),
            "dnsrr" => Ok(EndpointMode::Dnsrr),
            _ => Err(()),
        }
    }
}

impl fmt::Display for EndpointMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointMode::Vip => f.write_str("vip"),
            EndpointMode::Dnsrr => f.write_str("dnsrr"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        vip = { Some("vip"), true },
        dnsrr = { Some("dnsrr"), true },
        unset = { None, true },
        uppercase = { Some("VIP"), false },
        garbage = { Some("round-robin"), false },
        empty = { Some(""), false },
    )]
    fn test_endpoint_mode(value: Option<&str>, valid: bool) {
        let mut svc = ServiceDeclaration::new("api");
        svc.endpoint_mode = value.map(str::to_string);
        assert_eq!(svc.endpoint_mode().is_ok(), valid);
    }

    #[test]
    fn test_invalid_endpoint_mode_names_service_and_value() {
        let mut svc = ServiceDeclaration::new("frontend");
        svc.endpoint_mode = Some("VIP".to_string());
        let msg = svc.endpoint_mode().unwrap_err().to_string();
        assert!(msg.contains("services[frontend].deploy.endpoint_mode"));
        assert!(msg.contains("'VIP'"));
    }

    #[test]
    fn test_port_name_uses_published_port() {
        let port = PortMapping {
            container: 80,
            published: Some(8080),
            protocol: Protocol::Udp,
        };
        assert_eq!(port.port_name(), "p-8080-udp");
        assert_eq!(PortMapping::new(443).port_name(), "p-443-tcp");
    }

    #[test]
    fn test_bind_mounts_do_not_count_as_volumes() {
        let mut svc = ServiceDeclaration::new("api");
        svc.volumes.push(VolumeMount {
            source: MountSource::Bind("./src".to_string()),
            target: "/src".to_string(),
            read_only: true,
        });
        assert!(!svc.has_volumes());

        svc.volumes.push(VolumeMount {
            source: MountSource::Anonymous,
            target: "/data".to_string(),
            read_only: false,
        });
        assert!(svc.has_volumes());
        assert_eq!(svc.anonymous_mounts().count(), 1);
    }
}
