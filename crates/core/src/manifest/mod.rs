//! In-memory model of a deckhand manifest.

mod load;
mod raw;

pub use load::{discover, load, load_from_str, MANIFEST_FILE_NAMES};
pub use raw::endpoints_from_value;

use crate::error::ValidationError;
use crate::naming;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("no manifest found in {} (looked for {})", dir.display(), MANIFEST_FILE_NAMES.join(", "))]
    NotFound { dir: PathBuf },

    #[error("failed to read manifest {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid manifest {}: {message}", path.display())]
    Invalid { path: PathBuf, message: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseKind {
    Build,
    Deploy,
    Destroy,
    Test,
}

impl PhaseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseKind::Build => "build",
            PhaseKind::Deploy => "deploy",
            PhaseKind::Destroy => "destroy",
            PhaseKind::Test => "test",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub name: Option<String>,
    /// File the manifest was read from.
    pub path: PathBuf,
    pub image: Option<String>,
    pub remote: bool,
    /// `variables:` in declaration order.
    pub variables: Vec<(String, String)>,
    pub build: Vec<BuildTarget>,
    pub dependencies: Vec<Dependency>,
    pub deploy: Phase,
    pub destroy: Phase,
    pub test: Phase,
}

/// One ordered command list plus its execution options.
#[derive(Debug, Clone, PartialEq)]
pub struct Phase {
    pub kind: PhaseKind,
    pub commands: Vec<Command>,
    pub image: Option<String>,
    pub remote: Option<bool>,
    /// Compose files translated into cluster resources after the commands run.
    pub compose: Vec<PathBuf>,
    pub endpoints: Vec<EndpointDeclaration>,
}

impl Phase {
    pub fn empty(kind: PhaseKind) -> Self {
        Self {
            kind,
            commands: Vec::new(),
            image: None,
            remote: None,
            compose: Vec::new(),
            endpoints: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.compose.is_empty() && self.endpoints.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Shell {
        name: Option<String>,
        command: String,
    },
    Pipeline(PipelineCommand),
}

impl Command {
    pub fn shell(command: impl Into<String>) -> Self {
        Command::Shell {
            name: None,
            command: command.into(),
        }
    }

    /// Human-readable label used in logs and errors.
    pub fn display_name(&self) -> String {
        match self {
            Command::Shell { name: Some(n), .. } => n.clone(),
            Command::Shell { command, .. } => command.clone(),
            Command::Pipeline(p) => p
                .name
                .clone()
                .unwrap_or_else(|| format!("pipeline {}", p.file.display())),
        }
    }
}

/// A deploy (or destroy) of another manifest invoked as a command.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineCommand {
    pub name: Option<String>,
    pub file: PathBuf,
    /// Identity of the nested pipeline; defaults to the nested manifest's name.
    pub pipeline_name: Option<String>,
    pub namespace: Option<String>,
    pub variables: Vec<(String, String)>,
    /// Overrides the nested manifest's execution image.
    pub image: Option<String>,
    pub wait: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildTarget {
    pub name: String,
    pub context: PathBuf,
    /// Relative to `context`.
    pub dockerfile: PathBuf,
    pub image: Option<String>,
    pub target: Option<String>,
    pub args: Vec<(String, String)>,
    pub secrets: Vec<(String, String)>,
    pub cache_from: Vec<String>,
    pub depends_on: Vec<String>,
}

impl BuildTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: PathBuf::from("."),
            dockerfile: PathBuf::from("Dockerfile"),
            image: None,
            target: None,
            args: Vec::new(),
            secrets: Vec::new(),
            cache_from: Vec::new(),
            depends_on: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dependency {
    pub name: String,
    pub file: PathBuf,
    pub namespace: Option<String>,
    pub variables: Vec<(String, String)>,
    pub wait: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDeclaration {
    pub name: Option<String>,
    pub rules: Vec<EndpointRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRule {
    #[serde(default = "default_endpoint_path")]
    pub path: String,
    pub service: String,
    pub port: u16,
}

fn default_endpoint_path() -> String {
    "/".to_string()
}

/// Where and how a phase's commands run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub remote: bool,
    pub image: Option<String>,
}

impl Manifest {
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Sanitized identity of this manifest, used for run records and labels.
    pub fn identity(&self) -> String {
        naming::stack_name(self.name.as_deref(), self.base_dir())
    }

    pub fn phase(&self, kind: PhaseKind) -> Option<&Phase> {
        match kind {
            PhaseKind::Build => None,
            PhaseKind::Deploy => Some(&self.deploy),
            PhaseKind::Destroy => Some(&self.destroy),
            PhaseKind::Test => Some(&self.test),
        }
    }

    /// Phase options fall back to the manifest-level `remote` and `image`.
    pub fn exec_spec(&self, phase: &Phase) -> ExecSpec {
        ExecSpec {
            remote: phase.remote.unwrap_or(self.remote),
            image: phase.image.clone().or_else(|| self.image.clone()),
        }
    }

    pub fn build_target(&self, name: &str) -> Option<&BuildTarget> {
        self.build.iter().find(|t| t.name == name)
    }

    /// Build targets grouped into waves: every target only depends on targets
    /// of earlier waves, targets inside a wave are independent.
    pub fn build_waves(&self) -> Result<Vec<Vec<&BuildTarget>>, ValidationError> {
        build_waves(&self.build)
    }
}

pub fn build_waves(targets: &[BuildTarget]) -> Result<Vec<Vec<&BuildTarget>>, ValidationError> {
    let names: HashSet<&str> = targets.iter().map(|t| t.name.as_str()).collect();
    for target in targets {
        for dep in &target.depends_on {
            if !names.contains(dep.as_str()) {
                return Err(ValidationError::UndefinedBuildDependency {
                    target: target.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    let mut placed: HashMap<&str, usize> = HashMap::new();
    let mut waves: Vec<Vec<&BuildTarget>> = Vec::new();
    let mut remaining: Vec<&BuildTarget> = targets.iter().collect();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<&BuildTarget>, Vec<&BuildTarget>) = remaining
            .into_iter()
            .partition(|t| t.depends_on.iter().all(|d| placed.contains_key(d.as_str())));

        if ready.is_empty() {
            let mut chain: Vec<String> = blocked.iter().map(|t| t.name.clone()).collect();
            if let Some(first) = chain.first().cloned() {
                chain.push(first);
            }
            return Err(ValidationError::BuildCycle { chain });
        }

        let wave = waves.len();
        for target in &ready {
            placed.insert(target.name.as_str(), wave);
        }
        waves.push(ready);
        remaining = blocked;
    }

    Ok(waves)
}
