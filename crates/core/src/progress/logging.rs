//! Logging-based progress handler

use super::{PipelineEvent, ProgressHandler};
use tracing::{debug, error, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::Started { name, action } => {
                info!(pipeline = %name, action = %action, "Starting pipeline");
            }
            PipelineEvent::StateChanged { name, state } => {
                debug!(pipeline = %name, state = %state, "State changed");
            }
            PipelineEvent::CommandStarted {
                phase,
                index,
                total,
                command,
            } => {
                info!(
                    phase = %phase,
                    progress = format!("{}/{}", index, total),
                    "Running '{}'",
                    command
                );
            }
            PipelineEvent::CommandComplete {
                phase,
                index,
                total,
                duration,
                success,
            } => {
                if *success {
                    debug!(
                        phase = %phase,
                        progress = format!("{}/{}", index, total),
                        duration_ms = duration.as_millis(),
                        "Command complete"
                    );
                } else {
                    warn!(
                        phase = %phase,
                        progress = format!("{}/{}", index, total),
                        duration_ms = duration.as_millis(),
                        "Command failed"
                    );
                }
            }
            PipelineEvent::BuildStarted { target, forced } => {
                if *forced {
                    info!(target_name = %target, "Force build from manifest definition");
                } else {
                    info!(target_name = %target, "Building");
                }
            }
            PipelineEvent::BuildSkipped { target, reason } => {
                info!(target_name = %target, reason = %reason, "Skipping build");
            }
            PipelineEvent::BuildComplete {
                target,
                image,
                cache_hit,
                duration,
            } => {
                info!(
                    target_name = %target,
                    image = %image,
                    cache_hit,
                    duration_ms = duration.as_millis(),
                    "Build complete"
                );
            }
            PipelineEvent::DependencyStarted { name, wait } => {
                info!(dependency = %name, wait, "Deploying dependency");
            }
            PipelineEvent::DependencyComplete {
                name,
                success,
                duration,
            } => {
                if *success {
                    info!(
                        dependency = %name,
                        duration_ms = duration.as_millis(),
                        "Dependency deployed"
                    );
                } else {
                    warn!(
                        dependency = %name,
                        duration_ms = duration.as_millis(),
                        "Dependency failed"
                    );
                }
            }
            PipelineEvent::ResourceApplied {
                kind,
                name,
                outcome,
            } => {
                info!(kind = %kind, name = %name, outcome = %outcome, "Applied resource");
            }
            PipelineEvent::ResourceDeleted { kind, name } => {
                info!(kind = %kind, name = %name, "Deleted resource");
            }
            PipelineEvent::ResourceKept { kind, name } => {
                info!(kind = %kind, name = %name, "Keeping resource");
            }
            PipelineEvent::ServiceWaiting {
                service,
                dependency,
                condition,
            } => {
                info!(
                    service = %service,
                    dependency = %dependency,
                    condition = %condition,
                    "Waiting for service"
                );
            }
            PipelineEvent::ServiceReady {
                dependency,
                duration,
            } => {
                info!(
                    dependency = %dependency,
                    duration_ms = duration.as_millis(),
                    "Service is ready"
                );
            }
            PipelineEvent::Completed { name, duration } => {
                info!(
                    pipeline = %name,
                    total_time_ms = duration.as_millis(),
                    "Pipeline complete"
                );
            }
            PipelineEvent::Failed { name, error } => {
                error!(pipeline = %name, error = %error, "Pipeline failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PhaseKind;
    use std::time::Duration;

    #[test]
    fn test_logging_all_events() {
        let handler = LoggingHandler;

        let events = vec![
            PipelineEvent::Started {
                name: "shop".to_string(),
                action: "deploy".to_string(),
            },
            PipelineEvent::StateChanged {
                name: "shop".to_string(),
                state: "building".to_string(),
            },
            PipelineEvent::CommandStarted {
                phase: PhaseKind::Deploy,
                index: 1,
                total: 2,
                command: "make deploy".to_string(),
            },
            PipelineEvent::CommandComplete {
                phase: PhaseKind::Deploy,
                index: 1,
                total: 2,
                duration: Duration::from_millis(10),
                success: false,
            },
            PipelineEvent::BuildStarted {
                target: "api".to_string(),
                forced: true,
            },
            PipelineEvent::BuildSkipped {
                target: "web".to_string(),
                reason: "build inputs unchanged".to_string(),
            },
            PipelineEvent::BuildComplete {
                target: "api".to_string(),
                image: "registry.local/api:1".to_string(),
                cache_hit: false,
                duration: Duration::from_secs(3),
            },
            PipelineEvent::DependencyStarted {
                name: "db".to_string(),
                wait: true,
            },
            PipelineEvent::DependencyComplete {
                name: "db".to_string(),
                success: true,
                duration: Duration::from_secs(1),
            },
            PipelineEvent::ResourceApplied {
                kind: "Deployment".to_string(),
                name: "api".to_string(),
                outcome: "created".to_string(),
            },
            PipelineEvent::ResourceDeleted {
                kind: "Service".to_string(),
                name: "api".to_string(),
            },
            PipelineEvent::ResourceKept {
                kind: "PersistentVolumeClaim".to_string(),
                name: "data".to_string(),
            },
            PipelineEvent::ServiceWaiting {
                service: "api".to_string(),
                dependency: "db".to_string(),
                condition: "service_healthy".to_string(),
            },
            PipelineEvent::ServiceReady {
                dependency: "db".to_string(),
                duration: Duration::from_millis(250),
            },
            PipelineEvent::Completed {
                name: "shop".to_string(),
                duration: Duration::from_secs(9),
            },
            PipelineEvent::Failed {
                name: "shop".to_string(),
                error: "boom".to_string(),
            },
        ];

        for event in events {
            handler.on_progress(&event);
        }
    }
}
