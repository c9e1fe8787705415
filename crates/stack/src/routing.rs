//! Routing backends: path-based Ingress or gateway-attached HTTPRoute.
//!
//! A stack is routed by exactly one backend at a time; reconciliation
//! removes routes of the other kind.

use crate::labels;
use crate::model::Stack;
use crate::resource::{ObjectMeta, Resource, ResourceKind, ResourceSpec, RouteRule, RouteSpec};
use crate::translate::Scope;
use deckhand_core::manifest::{EndpointDeclaration, EndpointRule};
use deckhand_core::naming::sanitize_name;
use deckhand_core::RoutingBackend;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayRef {
    pub name: String,
    pub namespace: String,
}

pub trait Router: Send + Sync {
    fn kind(&self) -> ResourceKind;

    fn route(&self, metadata: ObjectMeta, rules: Vec<RouteRule>) -> Resource;
}

pub struct IngressRouter;

impl Router for IngressRouter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Ingress
    }

    fn route(&self, metadata: ObjectMeta, rules: Vec<RouteRule>) -> Resource {
        Resource {
            kind: ResourceKind::Ingress,
            metadata,
            spec: ResourceSpec::Route(RouteSpec {
                rules,
                gateway: None,
            }),
        }
    }
}

pub struct GatewayRouter {
    gateway: GatewayRef,
}

impl GatewayRouter {
    pub fn new(gateway: GatewayRef) -> Self {
        Self { gateway }
    }
}

impl Router for GatewayRouter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::HttpRoute
    }

    fn route(&self, metadata: ObjectMeta, rules: Vec<RouteRule>) -> Resource {
        Resource {
            kind: ResourceKind::HttpRoute,
            metadata,
            spec: ResourceSpec::Route(RouteSpec {
                rules,
                gateway: Some(self.gateway.clone()),
            }),
        }
    }
}

pub fn router_for(backend: RoutingBackend, gateway: GatewayRef) -> Box<dyn Router> {
    match backend {
        RoutingBackend::Ingress => Box::new(IngressRouter),
        RoutingBackend::Gateway => Box::new(GatewayRouter::new(gateway)),
    }
}

/// Route kinds the given backend does not produce.
pub fn excluded_kinds(backend: RoutingBackend) -> Vec<ResourceKind> {
    let selected = match backend {
        RoutingBackend::Ingress => ResourceKind::Ingress,
        RoutingBackend::Gateway => ResourceKind::HttpRoute,
    };
    ResourceKind::all()
        .iter()
        .copied()
        .filter(|k| k.is_route() && *k != selected)
        .collect()
}

/// Named endpoints use their sanitized name, unnamed ones `<stack>-<index>`.
pub fn endpoint_name(stack: &str, index: usize, endpoint: &EndpointDeclaration) -> String {
    match endpoint.name.as_deref().map(sanitize_name) {
        Some(name) if !name.is_empty() => name,
        _ => sanitize_name(&format!("{stack}-{index}")),
    }
}

/// Endpoints implied by `x-public: true` services.
///
/// One published port yields an endpoint named after the service, several
/// yield one `<service>-<port>` endpoint each.
pub fn public_endpoints(stack: &Stack) -> Vec<EndpointDeclaration> {
    let mut endpoints = Vec::new();
    for service in stack.services.values().filter(|s| s.public) {
        let mut ports: Vec<u16> = service.ports.iter().map(|p| p.service_port()).collect();
        let mut seen = HashSet::new();
        ports.retain(|p| seen.insert(*p));
        let single = ports.len() == 1;
        for port in ports {
            let name = if single {
                service.name.clone()
            } else {
                format!("{}-{}", service.name, port)
            };
            endpoints.push(EndpointDeclaration {
                name: Some(name),
                rules: vec![EndpointRule {
                    path: "/".to_string(),
                    service: service.name.clone(),
                    port,
                }],
            });
        }
    }
    endpoints
}

pub(crate) fn translate_endpoint(
    router: &dyn Router,
    scope: &Scope<'_>,
    name: &str,
    endpoint: &EndpointDeclaration,
) -> Resource {
    let mut annotations = labels::Labels::new();
    annotations.insert(labels::GENERATE_HOST_ANNOTATION.to_string(), "true".to_string());

    let metadata = ObjectMeta {
        name: name.to_string(),
        namespace: scope.namespace.to_string(),
        labels: labels::endpoint(scope.owner, scope.stack, name),
        annotations,
    };
    let rules = endpoint
        .rules
        .iter()
        .map(|r| RouteRule {
            path: r.path.clone(),
            service: sanitize_name(&r.service),
            port: r.port,
        })
        .collect();

    router.route(metadata, rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PortMapping, ServiceDeclaration};

    fn endpoint(name: Option<&str>) -> EndpointDeclaration {
        EndpointDeclaration {
            name: name.map(str::to_string),
            rules: vec![EndpointRule {
                path: "/".to_string(),
                service: "web".to_string(),
                port: 80,
            }],
        }
    }

    #[test]
    fn test_endpoint_names() {
        assert_eq!(endpoint_name("shop", 0, &endpoint(None)), "shop-0");
        assert_eq!(endpoint_name("shop", 3, &endpoint(Some("Admin_UI"))), "admin-ui");
        assert_eq!(endpoint_name("shop", 1, &endpoint(Some("__"))), "shop-1");
    }

    #[test]
    fn test_excluded_kinds() {
        assert_eq!(excluded_kinds(RoutingBackend::Ingress), vec![ResourceKind::HttpRoute]);
        assert_eq!(excluded_kinds(RoutingBackend::Gateway), vec![ResourceKind::Ingress]);
    }

    #[test]
    fn test_public_endpoints_naming() {
        let mut stack = Stack::new("shop");
        let mut web = ServiceDeclaration::new("web");
        web.public = true;
        web.ports.push(PortMapping::new(80));
        let mut admin = ServiceDeclaration::new("admin");
        admin.public = true;
        admin.ports.push(PortMapping::new(8080));
        admin.ports.push(PortMapping::new(9090));
        let mut private = ServiceDeclaration::new("db");
        private.ports.push(PortMapping::new(5432));
        for svc in [web, admin, private] {
            stack.services.insert(svc.name.clone(), svc);
        }

        let names: Vec<String> = public_endpoints(&stack)
            .into_iter()
            .filter_map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["admin-8080", "admin-9090", "web"]);
    }

    #[test]
    fn test_gateway_router_attaches_parent() {
        let router = router_for(
            RoutingBackend::Gateway,
            GatewayRef {
                name: "edge".to_string(),
                namespace: "gw".to_string(),
            },
        );
        let scope = Scope {
            stack: "shop",
            namespace: "dev",
            owner: "shop",
        };
        let route = translate_endpoint(router.as_ref(), &scope, "web", &endpoint(Some("web")));
        assert_eq!(route.kind, ResourceKind::HttpRoute);
        assert_eq!(route.metadata.labels[labels::STACK_ENDPOINT], "web");
        assert_eq!(route.metadata.annotations[labels::GENERATE_HOST_ANNOTATION], "true");
        match route.spec {
            ResourceSpec::Route(spec) => assert_eq!(spec.gateway.unwrap().name, "edge"),
            other => panic!("expected route spec, got {other:?}"),
        }
    }
}
