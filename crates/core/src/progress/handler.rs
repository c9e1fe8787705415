//! Progress handler trait and events

use crate::manifest::PhaseKind;
use std::time::Duration;

/// Events emitted while a pipeline runs
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A deploy, destroy or test invocation started
    Started { name: String, action: String },

    /// The coordinator entered a new state
    StateChanged { name: String, state: String },

    /// A phase command started; `command` is already masked
    CommandStarted {
        phase: PhaseKind,
        index: usize,
        total: usize,
        command: String,
    },

    /// A phase command finished
    CommandComplete {
        phase: PhaseKind,
        index: usize,
        total: usize,
        duration: Duration,
        success: bool,
    },

    /// A build target will be built
    BuildStarted { target: String, forced: bool },

    /// A build target was skipped
    BuildSkipped { target: String, reason: String },

    /// A build target finished
    BuildComplete {
        target: String,
        image: String,
        cache_hit: bool,
        duration: Duration,
    },

    /// A dependency pipeline was dispatched
    DependencyStarted { name: String, wait: bool },

    /// A dependency pipeline finished
    DependencyComplete {
        name: String,
        success: bool,
        duration: Duration,
    },

    /// A resource was applied to the cluster
    ResourceApplied {
        kind: String,
        name: String,
        outcome: String,
    },

    /// A resource was removed from the cluster
    ResourceDeleted { kind: String, name: String },

    /// A resource was left in place by its keep policy
    ResourceKept { kind: String, name: String },

    /// A service is held back until `dependency` meets `condition`
    ServiceWaiting {
        service: String,
        dependency: String,
        condition: String,
    },

    /// A `depends_on` condition was met
    ServiceReady {
        dependency: String,
        duration: Duration,
    },

    /// Invocation finished successfully
    Completed { name: String, duration: Duration },

    /// Invocation failed; `error` is already masked
    Failed { name: String, error: String },
}

/// Trait for handling progress events during a pipeline run
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &PipelineEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &PipelineEvent) {}
}
