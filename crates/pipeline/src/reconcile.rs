//! Brings the cluster in line with a translated resource set.

use crate::cancel::CancelToken;
use crate::cluster::{ApplyOutcome, ClusterApi, ObjectRef};
use crate::error::{PipelineError, RemovalFailure};
use deckhand_core::{PipelineEvent, ProgressHandler};
use deckhand_stack::labels;
use deckhand_stack::{DependsOnCondition, ResourceKey, ResourceKind, TranslatedResourceSet};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Volumes first, then network services, workloads and routes.
fn apply_rank(kind: ResourceKind) -> u8 {
    match kind {
        ResourceKind::PersistentVolumeClaim => 0,
        ResourceKind::Service => 1,
        kind if kind.is_workload() => 2,
        _ => 3,
    }
}

pub struct Reconciler<'a> {
    cluster: &'a dyn ClusterApi,
    progress: &'a dyn ProgressHandler,
    wait_timeout: Duration,
    poll_interval: Duration,
    cancel: Option<CancelToken>,
}

impl<'a> Reconciler<'a> {
    pub fn new(cluster: &'a dyn ClusterApi, progress: &'a dyn ProgressHandler) -> Self {
        Self {
            cluster,
            progress,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: None,
        }
    }

    /// Upper bound for each `depends_on` wait.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Applies every resource in [`apply_rank`] order. A workload is applied
    /// only once each of its `depends_on` entries meets its condition, so
    /// workloads go out in dependency order.
    pub async fn apply(
        &self,
        set: &TranslatedResourceSet,
    ) -> Result<Vec<(ResourceKey, ApplyOutcome)>, PipelineError> {
        let mut ordered: Vec<_> = set.iter().collect();
        ordered.sort_by_key(|r| {
            let depth = set
                .service_of(&r.key())
                .map(|service| set.dependency_depth(service))
                .unwrap_or(0);
            (apply_rank(r.kind), depth)
        });

        let mut applied = Vec::with_capacity(ordered.len());
        for resource in ordered {
            let key = resource.key();
            if let Some(service) = set.service_of(&key) {
                self.wait_for_dependencies(set, service).await?;
            }

            let outcome = self
                .cluster
                .apply(resource)
                .await
                .map_err(|e| PipelineError::Apply {
                    key: key.clone(),
                    message: format!("{:#}", e),
                })?;
            debug!(resource = %key, outcome = %outcome, "Applied resource");
            self.progress.on_progress(&PipelineEvent::ResourceApplied {
                kind: key.kind.to_string(),
                name: key.name.clone(),
                outcome: outcome.to_string(),
            });
            applied.push((key, outcome));
        }
        Ok(applied)
    }

    async fn wait_for_dependencies(
        &self,
        set: &TranslatedResourceSet,
        service: &str,
    ) -> Result<(), PipelineError> {
        for dependency in set.dependencies_of(service) {
            let Some(key) = set.workload_of(&dependency.service) else {
                continue;
            };
            self.progress.on_progress(&PipelineEvent::ServiceWaiting {
                service: service.to_string(),
                dependency: dependency.service.clone(),
                condition: dependency.condition.to_string(),
            });

            let started = Instant::now();
            self.wait_for(key, &dependency.condition, service).await?;
            self.progress.on_progress(&PipelineEvent::ServiceReady {
                dependency: dependency.service.clone(),
                duration: started.elapsed(),
            });
        }
        Ok(())
    }

    /// Polls the status of `key` until it meets `condition`.
    async fn wait_for(
        &self,
        key: &ResourceKey,
        condition: &DependsOnCondition,
        dependent: &str,
    ) -> Result<(), PipelineError> {
        let started = Instant::now();
        loop {
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                return Err(PipelineError::Cancelled);
            }

            match self.cluster.status(key).await {
                Ok(Some(status)) if status.satisfies(condition) => return Ok(()),
                Ok(Some(status))
                    if status.has_failed() && *condition != DependsOnCondition::Started =>
                {
                    return Err(PipelineError::ServiceFailed {
                        service: key.name.clone(),
                        dependent: dependent.to_string(),
                    });
                }
                Ok(_) => {}
                Err(e) => debug!(resource = %key, error = %e, "Failed to read status"),
            }

            let waited = started.elapsed();
            if waited >= self.wait_timeout {
                return Err(PipelineError::WaitTimeout {
                    service: key.name.clone(),
                    condition: condition.to_string(),
                    waited,
                });
            }
            let pause = self.poll_interval.min(self.wait_timeout - waited);
            match &self.cancel {
                Some(cancel) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
                None => tokio::time::sleep(pause).await,
            }
        }
    }

    /// Removes objects of `kinds` owned by `owner` that are not in `desired`.
    ///
    /// Kept objects are left alone. Every removal is attempted; failures are
    /// returned together.
    pub async fn prune(
        &self,
        namespace: &str,
        owner: &str,
        kinds: &[ResourceKind],
        desired: &BTreeSet<ResourceKey>,
    ) -> Result<Vec<ResourceKey>, PipelineError> {
        let selector = labels::owner(owner);
        let mut kinds = kinds.to_vec();
        kinds.sort_by_key(|k| k.teardown_rank());
        kinds.dedup();

        let mut removed = Vec::new();
        let mut failures = Vec::new();

        for kind in kinds {
            let objects: Vec<ObjectRef> = match self.cluster.list(namespace, kind, &selector).await {
                Ok(objects) => objects,
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Failed to list resources");
                    failures.push(RemovalFailure {
                        key: ResourceKey::new(kind, namespace, "*"),
                        message: format!("listing failed: {:#}", e),
                    });
                    continue;
                }
            };

            for object in objects.into_iter().filter(|o| !desired.contains(&o.key)) {
                if object.is_kept() {
                    info!(resource = %object.key, "Keeping resource");
                    self.progress.on_progress(&PipelineEvent::ResourceKept {
                        kind: kind.to_string(),
                        name: object.key.name.clone(),
                    });
                    continue;
                }

                match self.cluster.delete(&object.key).await {
                    Ok(()) => {
                        debug!(resource = %object.key, "Removed resource");
                        self.progress.on_progress(&PipelineEvent::ResourceDeleted {
                            kind: kind.to_string(),
                            name: object.key.name.clone(),
                        });
                        removed.push(object.key);
                    }
                    Err(e) => {
                        warn!(resource = %object.key, error = %e, "Failed to remove resource");
                        failures.push(RemovalFailure {
                            key: object.key,
                            message: format!("{:#}", e),
                        });
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(removed)
        } else {
            Err(PipelineError::Removal { failures })
        }
    }

    /// Removes everything `owner` created in `namespace`.
    pub async fn teardown(&self, namespace: &str, owner: &str) -> Result<Vec<ResourceKey>, PipelineError> {
        self.prune(namespace, owner, ResourceKind::all(), &BTreeSet::new())
            .await
    }
}
