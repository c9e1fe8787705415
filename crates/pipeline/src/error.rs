use crate::pipeline::state::PipelineState;
use deckhand_core::PhaseKind;
use deckhand_stack::ResourceKey;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single phase command. The command text is always masked.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    #[error("error executing command '{command}': {cause}")]
    Command {
        phase: PhaseKind,
        command: String,
        cause: String,
    },

    #[error("error executing command '{command}': cancelled")]
    Cancelled { phase: PhaseKind, command: String },

    #[error("failed to provision execution container from '{image}': {message}")]
    Provision { image: String, message: String },
}

impl ExecError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecError::Cancelled { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalFailure {
    pub key: ResourceKey,
    pub message: String,
}

fn removal_summary(failures: &[RemovalFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("  {}: {}", f.key, f.message))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("illegal state transition from {from} to {to}")]
    IllegalTransition {
        from: PipelineState,
        to: PipelineState,
    },

    #[error("{error}")]
    Phase { phase: PhaseKind, error: ExecError },

    #[error("dependency '{name}' failed: {message}")]
    Dependency { name: String, message: String },

    #[error("failed to build target '{target}': {message}")]
    Build { target: String, message: String },

    #[error("failed to apply {key}: {message}")]
    Apply { key: ResourceKey, message: String },

    #[error("service '{service}' failed before '{dependent}' could start")]
    ServiceFailed { service: String, dependent: String },

    #[error("service '{service}' is taking too long to reach '{condition}' (waited {waited:?})")]
    WaitTimeout {
        service: String,
        condition: String,
        waited: Duration,
    },

    #[error("failed to remove {} resource(s):\n{}", failures.len(), removal_summary(failures))]
    Removal { failures: Vec<RemovalFailure> },

    #[error("pipeline cancelled")]
    Cancelled,
}
