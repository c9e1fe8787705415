use crate::error::PipelineError;
use deckhand_core::{PipelineEvent, ProgressHandler};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Pending,
    ResolvingDependencies,
    Building,
    Deploying,
    Destroying,
    Testing,
    Reconciling,
    Done,
    Failed,
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Pending => "pending",
            PipelineState::ResolvingDependencies => "resolving-dependencies",
            PipelineState::Building => "building",
            PipelineState::Deploying => "deploying",
            PipelineState::Destroying => "destroying",
            PipelineState::Testing => "testing",
            PipelineState::Reconciling => "reconciling",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Pending, ResolvingDependencies) => true,
            (ResolvingDependencies, Building | Destroying) => true,
            (Building, Deploying | Testing) => true,
            (Deploying | Destroying, Reconciling) => true,
            (Testing | Reconciling, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state of one invocation. Every transition is reported to the
/// progress handler.
pub struct StateMachine {
    name: String,
    state: PipelineState,
    progress: Arc<dyn ProgressHandler>,
}

impl StateMachine {
    pub fn new(name: impl Into<String>, progress: Arc<dyn ProgressHandler>) -> Self {
        Self {
            name: name.into(),
            state: PipelineState::Pending,
            progress,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn transition(&mut self, next: PipelineState) -> Result<(), PipelineError> {
        if !self.state.can_transition_to(next) {
            return Err(PipelineError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(pipeline = %self.name, from = %self.state, to = %next, "State transition");
        self.state = next;
        self.progress.on_progress(&PipelineEvent::StateChanged {
            name: self.name.clone(),
            state: next.to_string(),
        });
        Ok(())
    }

    /// Moves to `Failed` unless the invocation already finished.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            let _ = self.transition(PipelineState::Failed);
        }
    }
}
