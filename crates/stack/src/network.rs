//! The network-facing service in front of each workload.

use crate::labels;
use crate::model::{EndpointMode, PortMapping, ServiceDeclaration};
use crate::resource::{ObjectMeta, Resource, ResourceKind, ResourceSpec, ServicePort, ServiceSpec};
use crate::translate::Scope;
use deckhand_core::naming::sanitize_name;
use std::collections::HashSet;

/// Builds the service for `svc`, or `None` when it has no ports.
///
/// `vip` leaves the address to the cluster, `dnsrr` renders a headless
/// service so every replica is resolvable by name.
pub fn network_service(
    scope: &Scope<'_>,
    svc: &ServiceDeclaration,
    mode: EndpointMode,
    ports: &[PortMapping],
) -> Option<Resource> {
    if ports.is_empty() {
        return None;
    }

    let mut seen = HashSet::new();
    let ports: Vec<ServicePort> = ports
        .iter()
        .filter(|p| seen.insert((p.service_port(), p.protocol)))
        .map(|p| ServicePort {
            name: p.port_name(),
            port: p.service_port(),
            target_port: p.container,
            protocol: p.protocol,
        })
        .collect();

    let name = sanitize_name(&svc.name);
    Some(Resource {
        kind: ResourceKind::Service,
        metadata: ObjectMeta {
            name: name.clone(),
            namespace: scope.namespace.to_string(),
            labels: labels::merge_user(labels::service(scope.owner, scope.stack, &name), &svc.labels),
            annotations: svc.annotations.clone(),
        },
        spec: ResourceSpec::Service(ServiceSpec {
            selector: labels::selector(scope.stack, &name),
            ports,
            headless: mode == EndpointMode::Dnsrr,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Protocol;

    const SCOPE: Scope<'static> = Scope {
        stack: "shop",
        namespace: "dev",
        owner: "shop",
    };

    fn spec(resource: &Resource) -> &ServiceSpec {
        match &resource.spec {
            ResourceSpec::Service(s) => s,
            other => panic!("expected service spec, got {other:?}"),
        }
    }

    #[test]
    fn test_no_ports_no_service() {
        let svc = ServiceDeclaration::new("worker");
        assert!(network_service(&SCOPE, &svc, EndpointMode::Vip, &[]).is_none());
    }

    #[test]
    fn test_endpoint_modes() {
        let svc = ServiceDeclaration::new("db");
        let ports = [PortMapping::new(5432)];
        let vip = network_service(&SCOPE, &svc, EndpointMode::Vip, &ports).unwrap();
        let dnsrr = network_service(&SCOPE, &svc, EndpointMode::Dnsrr, &ports).unwrap();
        assert!(!spec(&vip).headless);
        assert!(spec(&dnsrr).headless);
        assert_eq!(dnsrr.to_manifest()["spec"]["clusterIP"], "None");
    }

    #[test]
    fn test_duplicate_ports_collapse() {
        let svc = ServiceDeclaration::new("api");
        let ports = [
            PortMapping::new(8080),
            PortMapping::new(8080),
            PortMapping {
                container: 8080,
                published: None,
                protocol: Protocol::Udp,
            },
        ];
        let service = network_service(&SCOPE, &svc, EndpointMode::Vip, &ports).unwrap();
        let names: Vec<&str> = spec(&service).ports.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["p-8080-tcp", "p-8080-udp"]);
        assert_eq!(spec(&service).selector[labels::STACK_SERVICE], "api");
    }
}
