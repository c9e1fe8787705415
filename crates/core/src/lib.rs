pub mod config;
pub mod error;
pub mod manifest;
pub mod naming;
pub mod progress;
pub mod vars;

pub use config::{ConfigError, DeckhandConfig, RoutingBackend};
pub use error::ValidationError;
pub use manifest::{Manifest, ManifestError, PhaseKind};
pub use progress::{LoggingHandler, NoOpHandler, PipelineEvent, ProgressHandler};
pub use vars::{Masker, ResolvedVars, Tier, VarSource, Variable, VarsError};
