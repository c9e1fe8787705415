use crate::naming::sanitize_name;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_GATEWAY_NAME: &str = "deckhand";
const DEFAULT_GATEWAY_NAMESPACE: &str = "gateway-system";
const DEFAULT_REGISTRY: &str = "registry.local";
const DEFAULT_SHELL: &str = "sh";
const DEFAULT_REMOTE_IMAGE: &str = "alpine:3.20";
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 0;
const DEFAULT_KUBECTL: &str = "kubectl";
const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 300;
const MAX_COMMAND_TIMEOUT_SECS: u64 = 86_400;

/// Which kind of routing resource endpoints are translated into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RoutingBackend {
    /// Path-based Ingress resources.
    #[default]
    Ingress,
    /// Gateway API HTTPRoute resources attached to a shared gateway.
    Gateway,
}

impl RoutingBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            RoutingBackend::Ingress => "ingress",
            RoutingBackend::Gateway => "gateway",
        }
    }
}

impl FromStr for RoutingBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ingress" => Ok(RoutingBackend::Ingress),
            "gateway" | "httproute" => Ok(RoutingBackend::Gateway),
            other => Err(ConfigError::InvalidRoutingBackend(other.to_string())),
        }
    }
}

impl fmt::Display for RoutingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid routing backend: {0}. Valid options: ingress, gateway")]
    InvalidRoutingBackend(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },
}

#[derive(Debug, Clone)]
pub struct DeckhandConfig {
    pub namespace: String,
    pub log_level: String,
    pub routing_backend: RoutingBackend,
    pub gateway_name: String,
    pub gateway_namespace: String,
    pub registry: String,
    pub state_dir: PathBuf,
    pub platform_vars_path: Option<PathBuf>,
    pub shell: String,
    pub remote_image: String,
    pub command_timeout_secs: u64,
    /// How long a service waits for its `depends_on` conditions.
    pub wait_timeout_secs: u64,
    pub kubectl: String,
}

fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(env::temp_dir)
        .join("deckhand")
}

fn default_platform_vars_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("deckhand").join("variables.env"))
}

impl Default for DeckhandConfig {
    fn default() -> Self {
        let namespace =
            env::var("DECKHAND_NAMESPACE").unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());

        let log_level = env::var("DECKHAND_LOG_LEVEL")
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        let routing_backend = env::var("DECKHAND_ROUTING_BACKEND")
            .ok()
            .and_then(|v| v.parse::<RoutingBackend>().ok())
            .unwrap_or_default();

        let gateway_name =
            env::var("DECKHAND_GATEWAY_NAME").unwrap_or_else(|_| DEFAULT_GATEWAY_NAME.to_string());

        let gateway_namespace = env::var("DECKHAND_GATEWAY_NAMESPACE")
            .unwrap_or_else(|_| DEFAULT_GATEWAY_NAMESPACE.to_string());

        let registry =
            env::var("DECKHAND_REGISTRY").unwrap_or_else(|_| DEFAULT_REGISTRY.to_string());

        let state_dir = env::var("DECKHAND_STATE_DIR")
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(default_state_dir);

        let platform_vars_path = env::var("DECKHAND_PLATFORM_VARS")
            .ok()
            .map(PathBuf::from)
            .or_else(default_platform_vars_path);

        let shell = env::var("DECKHAND_SHELL").unwrap_or_else(|_| DEFAULT_SHELL.to_string());

        let remote_image =
            env::var("DECKHAND_REMOTE_IMAGE").unwrap_or_else(|_| DEFAULT_REMOTE_IMAGE.to_string());

        let command_timeout_secs = env::var("DECKHAND_COMMAND_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS);

        let wait_timeout_secs = env::var("DECKHAND_WAIT_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_WAIT_TIMEOUT_SECS);

        let kubectl = env::var("DECKHAND_KUBECTL").unwrap_or_else(|_| DEFAULT_KUBECTL.to_string());

        Self {
            namespace,
            log_level,
            routing_backend,
            gateway_name,
            gateway_namespace,
            registry,
            state_dir,
            platform_vars_path,
            shell,
            remote_image,
            command_timeout_secs,
            wait_timeout_secs,
            kubectl,
        }
    }
}

impl DeckhandConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.is_empty() || sanitize_name(&self.namespace) != self.namespace {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid namespace: {}. Namespaces must be lowercase alphanumeric or '-'",
                self.namespace
            )));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        if self.registry.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Registry cannot be empty".to_string(),
            ));
        }

        if self.shell.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Shell cannot be empty".to_string(),
            ));
        }

        if self.command_timeout_secs > MAX_COMMAND_TIMEOUT_SECS {
            return Err(ConfigError::ValidationFailed(
                "Command timeout cannot exceed 24 hours".to_string(),
            ));
        }

        if self.wait_timeout_secs == 0 || self.wait_timeout_secs > MAX_COMMAND_TIMEOUT_SECS {
            return Err(ConfigError::ValidationFailed(
                "Wait timeout must be between 1 second and 24 hours".to_string(),
            ));
        }

        if self.routing_backend == RoutingBackend::Gateway && self.gateway_name.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Gateway name is required when the gateway routing backend is selected"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Location of the run record for one manifest identity.
    pub fn record_path(&self, namespace: &str, name: &str) -> PathBuf {
        let safe = |s: &str| s.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.state_dir
            .join("records")
            .join(safe(namespace))
            .join(format!("{}.json", safe(name)))
    }

    pub fn to_display_map(&self) -> std::collections::HashMap<String, String> {
        let mut map = std::collections::HashMap::new();

        map.insert("namespace".to_string(), self.namespace.clone());
        map.insert("log_level".to_string(), self.log_level.clone());
        map.insert(
            "routing_backend".to_string(),
            self.routing_backend.to_string(),
        );
        map.insert("gateway_name".to_string(), self.gateway_name.clone());
        map.insert(
            "gateway_namespace".to_string(),
            self.gateway_namespace.clone(),
        );
        map.insert("registry".to_string(), self.registry.clone());
        map.insert(
            "state_dir".to_string(),
            self.state_dir.display().to_string(),
        );
        if let Some(ref path) = self.platform_vars_path {
            map.insert(
                "platform_vars_path".to_string(),
                path.display().to_string(),
            );
        }
        map.insert("shell".to_string(), self.shell.clone());
        map.insert("remote_image".to_string(), self.remote_image.clone());
        map.insert(
            "command_timeout_secs".to_string(),
            self.command_timeout_secs.to_string(),
        );
        map.insert(
            "wait_timeout_secs".to_string(),
            self.wait_timeout_secs.to_string(),
        );
        map.insert("kubectl".to_string(), self.kubectl.clone());

        map
    }
}

impl fmt::Display for DeckhandConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Deckhand Configuration:")?;
        writeln!(f, "  Namespace: {}", self.namespace)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        writeln!(f, "  Routing Backend: {}", self.routing_backend)?;
        if self.routing_backend == RoutingBackend::Gateway {
            writeln!(
                f,
                "  Gateway: {}/{}",
                self.gateway_namespace, self.gateway_name
            )?;
        }
        writeln!(f, "  Registry: {}", self.registry)?;
        writeln!(f, "  State Dir: {}", self.state_dir.display())?;
        if let Some(ref path) = self.platform_vars_path {
            writeln!(f, "  Platform Variables: {}", path.display())?;
        }
        writeln!(f, "  Shell: {}", self.shell)?;
        writeln!(f, "  Remote Image: {}", self.remote_image)?;
        if self.command_timeout_secs > 0 {
            writeln!(f, "  Command Timeout: {}s", self.command_timeout_secs)?;
        } else {
            writeln!(f, "  Command Timeout: none")?;
        }
        writeln!(f, "  Wait Timeout: {}s", self.wait_timeout_secs)?;
        writeln!(f, "  Kubectl: {}", self.kubectl)?;
        Ok(())
    }
}
