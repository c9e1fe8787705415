//! [`ClusterApi`] backed by the `kubectl` binary of the current context.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use deckhand_pipeline::{ApplyOutcome, ClusterApi, ObjectRef, WorkloadStatus};
use deckhand_stack::labels::Labels;
use deckhand_stack::{Resource, ResourceKey, ResourceKind};
use serde_json::Value;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

pub struct KubectlCluster {
    kubectl: String,
}

impl KubectlCluster {
    pub fn new(kubectl: impl Into<String>) -> Self {
        Self {
            kubectl: kubectl.into(),
        }
    }

    async fn run(&self, args: &[String], stdin: Option<&[u8]>) -> Result<String> {
        debug!(kubectl = %self.kubectl, args = ?args, "Running kubectl");
        let mut child = Command::new(&self.kubectl)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to run '{}'", self.kubectl))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input)
                .await
                .context("Failed to write manifest to kubectl")?;
        }

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for kubectl")?;
        if !output.status.success() {
            bail!(
                "kubectl {} failed: {}",
                args.first().map(String::as_str).unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Reads the outcome from `kubectl apply` output such as
/// `deployment.apps/web configured`.
pub(crate) fn parse_apply_outcome(output: &str) -> ApplyOutcome {
    match output.split_whitespace().last() {
        Some("created") => ApplyOutcome::Created,
        Some("unchanged") => ApplyOutcome::Unchanged,
        _ => ApplyOutcome::Updated,
    }
}

pub(crate) fn selector_arg(selector: &Labels) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

fn string_map(value: Option<&Value>) -> Labels {
    value
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Parses the `items` of a `kubectl get -o json` list.
pub(crate) fn parse_list(kind: ResourceKind, namespace: &str, json: &str) -> Result<Vec<ObjectRef>> {
    let list: Value = serde_json::from_str(json).context("kubectl returned invalid JSON")?;
    let Some(items) = list.get("items").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    Ok(items
        .iter()
        .filter_map(|item| {
            let metadata = item.get("metadata")?;
            let name = metadata.get("name")?.as_str()?;
            Some(ObjectRef {
                key: ResourceKey::new(kind, namespace, name),
                labels: string_map(metadata.get("labels")),
                annotations: string_map(metadata.get("annotations")),
            })
        })
        .collect())
}

/// Reads rollout counters from a `kubectl get -o json` workload. Empty
/// output means the object does not exist.
pub(crate) fn parse_status(kind: ResourceKind, json: &str) -> Result<Option<WorkloadStatus>> {
    if json.trim().is_empty() {
        return Ok(None);
    }
    let object: Value = serde_json::from_str(json).context("kubectl returned invalid JSON")?;
    let count = |section: &str, field: &str| {
        object[section][field]
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
    };

    let status = if kind == ResourceKind::Job {
        WorkloadStatus {
            desired: count("spec", "completions").unwrap_or(1),
            running: count("status", "active").unwrap_or(0),
            ready: count("status", "ready").unwrap_or(0),
            succeeded: count("status", "succeeded").unwrap_or(0),
            failed: count("status", "failed").unwrap_or(0),
        }
    } else {
        WorkloadStatus {
            desired: count("spec", "replicas").unwrap_or(1),
            running: count("status", "replicas").unwrap_or(0),
            ready: count("status", "readyReplicas").unwrap_or(0),
            ..Default::default()
        }
    };
    Ok(Some(status))
}

#[async_trait]
impl ClusterApi for KubectlCluster {
    async fn apply(&self, resource: &Resource) -> Result<ApplyOutcome> {
        let manifest = serde_json::to_vec(&resource.to_manifest())?;
        let args = vec![
            "apply".to_string(),
            "-n".to_string(),
            resource.metadata.namespace.clone(),
            "-f".to_string(),
            "-".to_string(),
        ];
        let output = self
            .run(&args, Some(&manifest))
            .await
            .with_context(|| format!("Failed to apply {}", resource.key()))?;
        Ok(parse_apply_outcome(&output))
    }

    async fn delete(&self, key: &ResourceKey) -> Result<()> {
        let args = vec![
            "delete".to_string(),
            key.kind.kubectl_resource().to_string(),
            key.name.clone(),
            "-n".to_string(),
            key.namespace.clone(),
            "--ignore-not-found".to_string(),
            "--wait=false".to_string(),
        ];
        self.run(&args, None)
            .await
            .with_context(|| format!("Failed to delete {}", key))?;
        Ok(())
    }

    async fn list(
        &self,
        namespace: &str,
        kind: ResourceKind,
        selector: &Labels,
    ) -> Result<Vec<ObjectRef>> {
        let mut args = vec![
            "get".to_string(),
            kind.kubectl_resource().to_string(),
            "-n".to_string(),
            namespace.to_string(),
            "-o".to_string(),
            "json".to_string(),
        ];
        if !selector.is_empty() {
            args.push("-l".to_string());
            args.push(selector_arg(selector));
        }
        let output = self
            .run(&args, None)
            .await
            .with_context(|| format!("Failed to list {} in {}", kind, namespace))?;
        parse_list(kind, namespace, &output)
    }

    async fn status(&self, key: &ResourceKey) -> Result<Option<WorkloadStatus>> {
        let args = vec![
            "get".to_string(),
            key.kind.kubectl_resource().to_string(),
            key.name.clone(),
            "-n".to_string(),
            key.namespace.clone(),
            "-o".to_string(),
            "json".to_string(),
            "--ignore-not-found".to_string(),
        ];
        let output = self
            .run(&args, None)
            .await
            .with_context(|| format!("Failed to read status of {}", key))?;
        parse_status(key.kind, &output)
    }
}
