//! Whole-stack checks that run before anything is translated or applied.

use crate::kind::{KindId, KindRegistry};
use crate::model::{DependsOnCondition, MountSource, Stack};
use std::collections::HashMap;
use deckhand_core::naming::sanitize_name;
use deckhand_core::ValidationError;

/// Validates every service of `stack`, regardless of which ones a partial
/// deploy selects.
///
/// `depends_on` edges are checked for the whole set first, so a broken edge
/// is reported even when a later check would also fail.
pub fn validate(stack: &Stack, registry: &KindRegistry) -> Result<(), ValidationError> {
    for service in stack.services.values() {
        for dependency in &service.depends_on {
            if !stack.services.contains_key(&dependency.service) {
                return Err(ValidationError::UndefinedDependency {
                    service: service.name.clone(),
                    dependency: dependency.service.clone(),
                });
            }
        }
    }

    for service in stack.services.values() {
        for dependency in &service.depends_on {
            let condition = &dependency.condition;
            if condition.is_custom() {
                return Err(ValidationError::InvalidDependsOnCondition {
                    service: service.name.clone(),
                    dependency: dependency.service.clone(),
                    value: condition.as_str().to_string(),
                });
            }
            if *condition == DependsOnCondition::CompletedSuccessfully {
                if let Some(target) = stack.service(&dependency.service) {
                    if registry.kind_for(target)?.id() != KindId::Job {
                        return Err(ValidationError::DependencyNeverCompletes {
                            service: service.name.clone(),
                            dependency: dependency.service.clone(),
                        });
                    }
                }
            }
        }
    }
    check_service_cycles(stack)?;

    for service in stack.services.values() {
        if sanitize_name(&service.name).is_empty() {
            return Err(ValidationError::InvalidName {
                name: service.name.clone(),
                reason: "service names need at least one alphanumeric character".to_string(),
            });
        }

        service.endpoint_mode()?;
        registry.kind_for(service)?;

        for mount in &service.volumes {
            if let MountSource::Named(volume) = &mount.source {
                if !stack.volumes.contains_key(volume) {
                    return Err(ValidationError::UndefinedVolume {
                        service: service.name.clone(),
                        volume: volume.clone(),
                    });
                }
            }
        }
    }

    for (index, endpoint) in stack.endpoints.iter().enumerate() {
        for rule in &endpoint.rules {
            if !stack.services.contains_key(&rule.service) {
                return Err(ValidationError::UndefinedEndpointService {
                    endpoint: endpoint
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("#{index}")),
                    service: rule.service.clone(),
                });
            }
        }
    }

    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

fn check_service_cycles(stack: &Stack) -> Result<(), ValidationError> {
    fn visit<'a>(
        stack: &'a Stack,
        name: &'a str,
        state: &mut HashMap<&'a str, Visit>,
        path: &mut Vec<&'a str>,
    ) -> Result<(), ValidationError> {
        match state.get(name) {
            Some(Visit::Done) => return Ok(()),
            Some(Visit::InProgress) => {
                let start = path.iter().position(|n| *n == name).unwrap_or(0);
                let mut chain: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
                chain.push(name.to_string());
                return Err(ValidationError::ServiceCycle { chain });
            }
            None => {}
        }
        state.insert(name, Visit::InProgress);
        path.push(name);
        if let Some(service) = stack.service(name) {
            for dependency in service.dependency_names() {
                visit(stack, dependency, state, path)?;
            }
        }
        path.pop();
        state.insert(name, Visit::Done);
        Ok(())
    }

    let mut state = HashMap::new();
    for name in stack.service_names() {
        visit(stack, name, &mut state, &mut Vec::new())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NamedVolume, ServiceDeclaration, ServiceDependency, VolumeMount};
    use deckhand_core::manifest::{EndpointDeclaration, EndpointRule};

    fn stack(services: Vec<ServiceDeclaration>) -> Stack {
        let mut stack = Stack::new("shop");
        for svc in services {
            stack.services.insert(svc.name.clone(), svc);
        }
        stack
    }

    fn service(name: &str, deps: &[&str]) -> ServiceDeclaration {
        let mut svc = ServiceDeclaration::new(name);
        svc.image = Some(format!("{name}:latest"));
        svc.depends_on = deps.iter().map(|d| ServiceDependency::started(*d)).collect();
        svc
    }

    #[test]
    fn test_valid_stack() {
        let stack = stack(vec![service("api", &["db"]), service("db", &[])]);
        assert!(validate(&stack, &KindRegistry::with_defaults()).is_ok());
    }

    #[test]
    fn test_undefined_dependency_names_both() {
        let stack = stack(vec![service("api", &["db"])]);
        let err = validate(&stack, &KindRegistry::with_defaults()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UndefinedDependency {
                service: "api".to_string(),
                dependency: "db".to_string(),
            }
        );
    }

    #[test]
    fn test_dependency_checked_before_endpoint_mode() {
        let mut bad_mode = service("web", &[]);
        bad_mode.endpoint_mode = Some("VIP".to_string());
        let stack = stack(vec![service("api", &["db"]), bad_mode]);
        let err = validate(&stack, &KindRegistry::with_defaults()).unwrap_err();
        assert!(matches!(err, ValidationError::UndefinedDependency { .. }));
    }

    #[test]
    fn test_invalid_endpoint_mode() {
        let mut svc = service("frontend", &[]);
        svc.endpoint_mode = Some("VIP".to_string());
        let err = validate(&stack(vec![svc]), &KindRegistry::with_defaults()).unwrap_err();
        assert!(err
            .to_string()
            .contains("services[frontend].deploy.endpoint_mode: invalid value 'VIP'"));
    }

    #[test]
    fn test_undefined_named_volume() {
        let mut svc = service("db", &[]);
        svc.volumes.push(VolumeMount {
            source: MountSource::Named("data".to_string()),
            target: "/var/lib/db".to_string(),
            read_only: false,
        });
        let mut stack = stack(vec![svc]);
        let registry = KindRegistry::with_defaults();
        assert!(matches!(
            validate(&stack, &registry),
            Err(ValidationError::UndefinedVolume { .. })
        ));

        stack.volumes.insert("data".to_string(), NamedVolume::new("data"));
        assert!(validate(&stack, &registry).is_ok());
    }

    #[test]
    fn test_unknown_kind() {
        let mut svc = service("api", &[]);
        svc.kind = Some("daemonset".to_string());
        let err = validate(&stack(vec![svc]), &KindRegistry::with_defaults()).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownServiceKind { .. }));
    }

    #[test]
    fn test_endpoint_to_undefined_service() {
        let mut stack = stack(vec![service("api", &[])]);
        stack.endpoints.push(EndpointDeclaration {
            name: None,
            rules: vec![EndpointRule {
                path: "/".to_string(),
                service: "web".to_string(),
                port: 80,
            }],
        });
        let err = validate(&stack, &KindRegistry::with_defaults()).unwrap_err();
        assert!(err.to_string().contains("'web'"));
    }

    #[test]
    fn test_unknown_depends_on_condition() {
        let mut api = service("api", &[]);
        api.depends_on.push(ServiceDependency::new(
            "db",
            DependsOnCondition::from_name("service_ready"),
        ));
        let stack = stack(vec![api, service("db", &[])]);
        let err = validate(&stack, &KindRegistry::with_defaults()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidDependsOnCondition {
                service: "api".to_string(),
                dependency: "db".to_string(),
                value: "service_ready".to_string(),
            }
        );
        assert!(err.to_string().contains("services[api].depends_on.db.condition"));
    }

    #[test]
    fn test_completion_wait_needs_a_job() {
        let mut api = service("api", &[]);
        api.depends_on.push(ServiceDependency::new(
            "migrate",
            DependsOnCondition::CompletedSuccessfully,
        ));
        let mut migrate = service("migrate", &[]);
        let registry = KindRegistry::with_defaults();

        let err = validate(&stack(vec![api.clone(), migrate.clone()]), &registry).unwrap_err();
        assert!(matches!(err, ValidationError::DependencyNeverCompletes { .. }));

        migrate.kind = Some("job".to_string());
        assert!(validate(&stack(vec![api, migrate]), &registry).is_ok());
    }

    #[test]
    fn test_services_depending_on_each_other() {
        let stack = stack(vec![
            service("api", &["db"]),
            service("db", &["cache"]),
            service("cache", &["api"]),
        ]);
        let err = validate(&stack, &KindRegistry::with_defaults()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::ServiceCycle {
                chain: vec![
                    "api".to_string(),
                    "db".to_string(),
                    "cache".to_string(),
                    "api".to_string(),
                ],
            }
        );
    }
}
