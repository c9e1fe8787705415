//! The cluster seam: create-or-update, delete, label-selected listing and
//! workload rollout status.

use anyhow::{bail, Result};
use async_trait::async_trait;
use deckhand_stack::labels::{self, Labels};
use deckhand_stack::{DependsOnCondition, Resource, ResourceKey, ResourceKind};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

impl ApplyOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplyOutcome::Created => "created",
            ApplyOutcome::Updated => "updated",
            ApplyOutcome::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An object that exists in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub key: ResourceKey,
    pub labels: Labels,
    pub annotations: Labels,
}

impl ObjectRef {
    pub fn is_kept(&self) -> bool {
        labels::is_kept(&self.annotations)
    }
}

/// Rollout progress of a workload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkloadStatus {
    /// Pods the workload asks for: replicas, or completions for a job.
    pub desired: u32,
    /// Pods created and not finished.
    pub running: u32,
    pub ready: u32,
    pub succeeded: u32,
    pub failed: u32,
}

impl WorkloadStatus {
    pub fn satisfies(&self, condition: &DependsOnCondition) -> bool {
        if self.desired == 0 {
            return !condition.is_custom();
        }
        match condition {
            DependsOnCondition::Started => self.running > 0 || self.succeeded > 0,
            DependsOnCondition::Healthy => {
                self.ready >= self.desired || self.succeeded >= self.desired
            }
            DependsOnCondition::CompletedSuccessfully => self.succeeded >= self.desired,
            DependsOnCondition::Custom(_) => false,
        }
    }

    /// Jobs never retry, so one failed pod fails the job.
    pub fn has_failed(&self) -> bool {
        self.failed > 0
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Creates the object if absent, updates it if present.
    async fn apply(&self, resource: &Resource) -> Result<ApplyOutcome>;

    /// Removes one object. Removing an absent object succeeds.
    async fn delete(&self, key: &ResourceKey) -> Result<()>;

    /// Objects of `kind` in `namespace` carrying every label of `selector`.
    async fn list(
        &self,
        namespace: &str,
        kind: ResourceKind,
        selector: &Labels,
    ) -> Result<Vec<ObjectRef>>;

    /// Rollout status of a workload, `None` when it does not exist.
    async fn status(&self, key: &ResourceKey) -> Result<Option<WorkloadStatus>>;
}

#[derive(Debug, Clone)]
struct StoredObject {
    manifest: Value,
    labels: Labels,
    annotations: Labels,
    cluster_ip: Option<String>,
}

#[derive(Debug, Default)]
struct ClusterState {
    objects: BTreeMap<ResourceKey, StoredObject>,
    next_ip: u32,
    failing_deletes: HashSet<ResourceKey>,
    statuses: HashMap<ResourceKey, WorkloadStatus>,
    history: Vec<(ResourceKey, ApplyOutcome)>,
}

/// A cluster that lives in process memory. Used by `--dry-run` and tests.
///
/// Network services without `clusterIP: None` are assigned an address on
/// creation that survives later updates, like a real API server does.
/// Workloads are fully rolled out as soon as they are applied unless a
/// status was set for them.
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ClusterState>> {
        match self.state.lock() {
            Ok(guard) => Ok(guard),
            Err(_) => bail!("in-memory cluster state is poisoned"),
        }
    }

    /// Makes every later delete of `key` fail.
    pub fn fail_delete(&self, key: ResourceKey) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_deletes.insert(key);
        }
    }

    pub fn keys(&self) -> Vec<ResourceKey> {
        self.state
            .lock()
            .map(|s| s.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.state
            .lock()
            .map(|s| s.objects.contains_key(key))
            .unwrap_or(false)
    }

    /// Stored manifest, with the assigned address filled in for services.
    pub fn get(&self, key: &ResourceKey) -> Option<Value> {
        let state = self.state.lock().ok()?;
        let object = state.objects.get(key)?;
        let mut manifest = object.manifest.clone();
        if let (Some(ip), Some(spec)) = (&object.cluster_ip, manifest.get_mut("spec")) {
            if let Some(spec) = spec.as_object_mut() {
                spec.insert("clusterIP".to_string(), Value::String(ip.clone()));
            }
        }
        Some(manifest)
    }

    pub fn cluster_ip(&self, key: &ResourceKey) -> Option<String> {
        let state = self.state.lock().ok()?;
        state.objects.get(key)?.cluster_ip.clone()
    }

    /// Every apply in call order.
    pub fn history(&self) -> Vec<(ResourceKey, ApplyOutcome)> {
        self.state
            .lock()
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }

    /// Reports `status` for `key` from now on, whether or not it exists yet.
    pub fn set_status(&self, key: ResourceKey, status: WorkloadStatus) {
        if let Ok(mut state) = self.state.lock() {
            state.statuses.insert(key, status);
        }
    }

    /// Seeds an object as if some earlier run had created it.
    pub fn insert(&self, key: ResourceKey, labels: Labels, annotations: Labels) {
        if let Ok(mut state) = self.state.lock() {
            state.objects.insert(
                key,
                StoredObject {
                    manifest: Value::Null,
                    labels,
                    annotations,
                    cluster_ip: None,
                },
            );
        }
    }
}

fn rolled_out(kind: ResourceKind, manifest: &Value) -> WorkloadStatus {
    let count = |field: &str| {
        manifest["spec"][field]
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
    };
    if kind == ResourceKind::Job {
        let desired = count("completions").unwrap_or(1);
        WorkloadStatus {
            desired,
            succeeded: desired,
            ..Default::default()
        }
    } else {
        let desired = count("replicas").unwrap_or(1);
        WorkloadStatus {
            desired,
            running: desired,
            ready: desired,
            ..Default::default()
        }
    }
}

fn wants_cluster_ip(resource: &Resource, manifest: &Value) -> bool {
    resource.kind == ResourceKind::Service && manifest["spec"].get("clusterIP").is_none()
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn apply(&self, resource: &Resource) -> Result<ApplyOutcome> {
        let key = resource.key();
        let manifest = resource.to_manifest();
        let mut state = self.lock()?;

        let outcome = match state.objects.get(&key) {
            Some(existing) if existing.manifest == manifest => ApplyOutcome::Unchanged,
            Some(_) => ApplyOutcome::Updated,
            None => ApplyOutcome::Created,
        };

        let cluster_ip = match state.objects.get(&key) {
            Some(existing) if wants_cluster_ip(resource, &manifest) => existing.cluster_ip.clone(),
            _ => None,
        }
        .or_else(|| {
            wants_cluster_ip(resource, &manifest).then(|| {
                state.next_ip += 1;
                format!("10.96.{}.{}", state.next_ip / 250, state.next_ip % 250 + 1)
            })
        });

        state.objects.insert(
            key.clone(),
            StoredObject {
                manifest,
                labels: resource.metadata.labels.clone(),
                annotations: resource.metadata.annotations.clone(),
                cluster_ip,
            },
        );
        state.history.push((key, outcome));
        Ok(outcome)
    }

    async fn delete(&self, key: &ResourceKey) -> Result<()> {
        let mut state = self.lock()?;
        if state.failing_deletes.contains(key) {
            bail!("deletion of {} refused", key);
        }
        state.objects.remove(key);
        Ok(())
    }

    async fn list(
        &self,
        namespace: &str,
        kind: ResourceKind,
        selector: &Labels,
    ) -> Result<Vec<ObjectRef>> {
        let state = self.lock()?;
        Ok(state
            .objects
            .iter()
            .filter(|(key, _)| key.kind == kind && key.namespace == namespace)
            .filter(|(_, object)| {
                selector
                    .iter()
                    .all(|(k, v)| object.labels.get(k) == Some(v))
            })
            .map(|(key, object)| ObjectRef {
                key: key.clone(),
                labels: object.labels.clone(),
                annotations: object.annotations.clone(),
            })
            .collect())
    }

    async fn status(&self, key: &ResourceKey) -> Result<Option<WorkloadStatus>> {
        let state = self.lock()?;
        let Some(object) = state.objects.get(key) else {
            return Ok(None);
        };
        Ok(Some(
            state
                .statuses
                .get(key)
                .copied()
                .unwrap_or_else(|| rolled_out(key.kind, &object.manifest)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckhand_stack::resource::{ServicePort, ServiceSpec};
    use deckhand_stack::{ObjectMeta, Protocol, ResourceSpec};

    fn service(name: &str, port: u16, headless: bool) -> Resource {
        Resource {
            kind: ResourceKind::Service,
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: "dev".to_string(),
                labels: labels::owner("shop"),
                annotations: Labels::new(),
            },
            spec: ResourceSpec::Service(ServiceSpec {
                selector: Labels::new(),
                ports: vec![ServicePort {
                    name: format!("p-{port}-tcp"),
                    port,
                    target_port: port,
                    protocol: Protocol::Tcp,
                }],
                headless,
            }),
        }
    }

    #[tokio::test]
    async fn test_apply_reports_created_unchanged_updated() {
        let cluster = InMemoryCluster::new();
        assert_eq!(cluster.apply(&service("api", 80, false)).await.unwrap(), ApplyOutcome::Created);
        assert_eq!(cluster.apply(&service("api", 80, false)).await.unwrap(), ApplyOutcome::Unchanged);
        assert_eq!(cluster.apply(&service("api", 81, false)).await.unwrap(), ApplyOutcome::Updated);
    }

    #[tokio::test]
    async fn test_cluster_ip_is_stable_across_updates() {
        let cluster = InMemoryCluster::new();
        let key = service("api", 80, false).key();
        cluster.apply(&service("api", 80, false)).await.unwrap();
        let first = cluster.cluster_ip(&key).unwrap();
        cluster.apply(&service("api", 81, false)).await.unwrap();
        assert_eq!(cluster.cluster_ip(&key).unwrap(), first);
        assert_eq!(cluster.get(&key).unwrap()["spec"]["clusterIP"], first.as_str());
    }

    #[tokio::test]
    async fn test_headless_service_gets_no_address() {
        let cluster = InMemoryCluster::new();
        let resource = service("db", 5432, true);
        cluster.apply(&resource).await.unwrap();
        assert!(cluster.cluster_ip(&resource.key()).is_none());
        assert_eq!(cluster.get(&resource.key()).unwrap()["spec"]["clusterIP"], "None");
    }

    #[tokio::test]
    async fn test_list_filters_by_selector() {
        let cluster = InMemoryCluster::new();
        cluster.apply(&service("api", 80, false)).await.unwrap();
        cluster.insert(
            ResourceKey::new(ResourceKind::Service, "dev", "foreign"),
            labels::owner("other"),
            Labels::new(),
        );

        let owned = cluster
            .list("dev", ResourceKind::Service, &labels::owner("shop"))
            .await
            .unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].key.name, "api");
        assert!(cluster
            .list("prod", ResourceKind::Service, &labels::owner("shop"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_failing_delete() {
        let cluster = InMemoryCluster::new();
        let resource = service("api", 80, false);
        cluster.apply(&resource).await.unwrap();
        cluster.fail_delete(resource.key());
        assert!(cluster.delete(&resource.key()).await.is_err());
        assert!(cluster.contains(&resource.key()));
    }

    #[test]
    fn test_status_conditions() {
        let rolling = WorkloadStatus {
            desired: 2,
            running: 2,
            ready: 1,
            ..Default::default()
        };
        assert!(rolling.satisfies(&DependsOnCondition::Started));
        assert!(!rolling.satisfies(&DependsOnCondition::Healthy));
        assert!(!rolling.satisfies(&DependsOnCondition::CompletedSuccessfully));

        let finished = WorkloadStatus {
            desired: 1,
            succeeded: 1,
            ..Default::default()
        };
        assert!(finished.satisfies(&DependsOnCondition::Started));
        assert!(finished.satisfies(&DependsOnCondition::CompletedSuccessfully));
        assert!(!finished.satisfies(&DependsOnCondition::from_name("service_ready")));
    }

    #[tokio::test]
    async fn test_applied_workloads_report_rolled_out_status() {
        let cluster = InMemoryCluster::new();
        let key = ResourceKey::new(ResourceKind::Deployment, "dev", "api");
        assert_eq!(cluster.status(&key).await.unwrap(), None);

        cluster.insert(key.clone(), labels::owner("shop"), Labels::new());
        let status = cluster.status(&key).await.unwrap().unwrap();
        assert!(status.satisfies(&DependsOnCondition::Healthy));

        let stuck = WorkloadStatus {
            desired: 1,
            ..Default::default()
        };
        cluster.set_status(key.clone(), stuck);
        assert_eq!(cluster.status(&key).await.unwrap(), Some(stuck));
    }
}
