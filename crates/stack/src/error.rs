use deckhand_core::ValidationError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StackError {
    #[error("failed to read compose file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse compose file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid compose file {}: {message}", path.display())]
    Invalid { path: PathBuf, message: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("service '{service}' has no image and no build output")]
    MissingImage { service: String },

    #[error("service '{name}' is not defined in the stack")]
    UnknownService { name: String },
}
