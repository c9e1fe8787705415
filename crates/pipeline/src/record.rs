//! Run records: what the last invocation of a manifest left behind.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deckhand_core::{ResolvedVars, Tier, Variable};
use deckhand_stack::ResourceKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Progressing,
    Deployed,
    Error,
    Destroying,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedVariable {
    pub name: String,
    pub value: String,
    pub tier: Tier,
    pub masked: bool,
}

impl From<&Variable> for RecordedVariable {
    fn from(var: &Variable) -> Self {
        Self {
            name: var.name.clone(),
            value: var.value.clone(),
            tier: var.tier,
            masked: var.masked,
        }
    }
}

impl From<&RecordedVariable> for Variable {
    fn from(var: &RecordedVariable) -> Self {
        Variable::new(&var.name, &var.value, var.tier).with_masked(var.masked)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutput {
    pub fingerprint: String,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub name: String,
    pub namespace: String,
    pub status: RecordStatus,
    pub manifest_path: PathBuf,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub variables: Vec<RecordedVariable>,
    #[serde(default)]
    pub builds: BTreeMap<String, BuildOutput>,
    /// Values deploy commands exported through `$DECKHAND_ENV`.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    #[serde(default)]
    pub resources: Vec<ResourceKey>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, manifest_path: &Path) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            status: RecordStatus::Progressing,
            manifest_path: manifest_path.to_path_buf(),
            repository: None,
            branch: None,
            commit: None,
            variables: Vec::new(),
            builds: BTreeMap::new(),
            outputs: BTreeMap::new(),
            resources: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Replaces the recorded variables with the effective environment.
    /// Engine-computed values are recomputed on every run and not stored.
    pub fn record_variables(&mut self, vars: &ResolvedVars) {
        self.variables = vars
            .iter()
            .filter(|v| v.tier != Tier::Builtin)
            .map(RecordedVariable::from)
            .collect();
    }

    /// Recorded variables grouped by tier, in tier order.
    pub fn variables_by_tier(&self) -> Vec<(Tier, Vec<Variable>)> {
        let mut grouped: HashMap<Tier, Vec<Variable>> = HashMap::new();
        for var in &self.variables {
            grouped.entry(var.tier).or_default().push(Variable::from(var));
        }
        Tier::all()
            .iter()
            .filter_map(|tier| grouped.remove(tier).map(|vars| (*tier, vars)))
            .collect()
    }

    pub fn touch(&mut self, status: RecordStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RunRecordStore: Send + Sync {
    async fn load(&self, namespace: &str, name: &str) -> Result<Option<RunRecord>>;
    async fn save(&self, record: &RunRecord) -> Result<()>;
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// JSON files under `<state_dir>/records/<namespace>/<name>.json`.
#[derive(Debug, Clone)]
pub struct FileRunRecordStore {
    root: PathBuf,
}

impl FileRunRecordStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: state_dir.into(),
        }
    }

    pub fn path(&self, namespace: &str, name: &str) -> PathBuf {
        let safe = |s: &str| s.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.root
            .join("records")
            .join(safe(namespace))
            .join(format!("{}.json", safe(name)))
    }
}

#[async_trait]
impl RunRecordStore for FileRunRecordStore {
    async fn load(&self, namespace: &str, name: &str) -> Result<Option<RunRecord>> {
        let path = self.path(namespace, name);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        let record = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse run record {}", path.display()))?;
        Ok(Some(record))
    }

    async fn save(&self, record: &RunRecord) -> Result<()> {
        let path = self.path(&record.namespace, &record.name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(record)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!(path = %path.display(), status = ?record.status, "Saved run record");
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let path = self.path(namespace, name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryRunRecordStore {
    records: Mutex<BTreeMap<(String, String), RunRecord>>,
}

impl MemoryRunRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<RunRecord> {
        self.records
            .lock()
            .ok()?
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl RunRecordStore for MemoryRunRecordStore {
    async fn load(&self, namespace: &str, name: &str) -> Result<Option<RunRecord>> {
        Ok(self.get(namespace, name))
    }

    async fn save(&self, record: &RunRecord) -> Result<()> {
        if let Ok(mut records) = self.records.lock() {
            records.insert(
                (record.namespace.clone(), record.name.clone()),
                record.clone(),
            );
        }
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        if let Ok(mut records) = self.records.lock() {
            records.remove(&(namespace.to_string(), name.to_string()));
        }
        Ok(())
    }
}
