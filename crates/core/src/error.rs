use thiserror::Error;

/// Problems detected before anything touches the cluster.
///
/// Every variant carries the offending names or values so the caller can
/// report them verbatim. None of them ever carries a variable value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("service '{service}' depends on '{dependency}', which is not defined in the stack")]
    UndefinedDependency { service: String, dependency: String },

    #[error("services[{service}].deploy.endpoint_mode: invalid value '{value}', expected 'vip' or 'dnsrr'")]
    InvalidEndpointMode { service: String, value: String },

    #[error("services[{service}].depends_on.{dependency}.condition: invalid value '{value}', expected 'service_started', 'service_healthy' or 'service_completed_successfully'")]
    InvalidDependsOnCondition {
        service: String,
        dependency: String,
        value: String,
    },

    #[error("service '{service}' waits for '{dependency}' to complete, but '{dependency}' is not a job")]
    DependencyNeverCompletes { service: String, dependency: String },

    #[error("services depend on each other: {}", chain.join(" -> "))]
    ServiceCycle { chain: Vec<String> },

    #[error("variable reference cycle: {}", chain.join(" -> "))]
    VariableCycle { chain: Vec<String> },

    #[error("build target '{target}' depends on '{dependency}', which is not a build target")]
    UndefinedBuildDependency { target: String, dependency: String },

    #[error("build targets form a cycle: {}", chain.join(" -> "))]
    BuildCycle { chain: Vec<String> },

    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("endpoint '{endpoint}' routes to undefined service '{service}'")]
    UndefinedEndpointService { endpoint: String, service: String },

    #[error("service '{service}' mounts undefined volume '{volume}'")]
    UndefinedVolume { service: String, volume: String },

    #[error("pipeline dependency cycle: {}", chain.join(" -> "))]
    DependencyCycle { chain: Vec<String> },

    #[error("unknown service kind '{kind}' declared by service '{service}'")]
    UnknownServiceKind { service: String, kind: String },
}
