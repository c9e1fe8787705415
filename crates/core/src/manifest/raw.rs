//! Serde shapes of the manifest file and their conversion into the model.

use super::{
    BuildTarget, Command, Dependency, EndpointDeclaration, EndpointRule, Manifest, Phase,
    PhaseKind, PipelineCommand,
};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
pub(super) struct RawManifest {
    name: Option<String>,
    image: Option<String>,
    #[serde(default)]
    remote: bool,
    variables: Option<RawPairs>,
    build: Option<Mapping>,
    dependencies: Option<Mapping>,
    deploy: Option<RawPhase>,
    destroy: Option<RawPhase>,
    test: Option<RawPhase>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum RawPairs {
    Map(Mapping),
    List(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPhase {
    Commands(Vec<RawCommand>),
    Full(RawPhaseObject),
}

#[derive(Debug, Deserialize)]
struct RawPhaseObject {
    image: Option<String>,
    remote: Option<bool>,
    #[serde(default)]
    commands: Vec<RawCommand>,
    compose: Option<StringOrList>,
    endpoints: Option<RawEndpoints>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCommand {
    Text(String),
    Pipeline {
        name: Option<String>,
        pipeline: RawPipelineRef,
    },
    Named {
        name: Option<String>,
        command: String,
    },
}

#[derive(Debug, Deserialize)]
struct RawPipelineRef {
    file: PathBuf,
    name: Option<String>,
    namespace: Option<String>,
    variables: Option<RawPairs>,
    image: Option<String>,
    #[serde(default = "default_true")]
    wait: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    fn into_vec(self) -> Vec<String> {
        match self {
            StringOrList::One(s) => vec![s],
            StringOrList::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEndpoints {
    Named(Mapping),
    List(Vec<RawEndpointItem>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEndpointItem {
    Declared {
        name: Option<String>,
        rules: Vec<EndpointRule>,
    },
    Rule(EndpointRule),
}

#[derive(Debug, Default, Deserialize)]
struct RawBuild {
    context: Option<PathBuf>,
    dockerfile: Option<PathBuf>,
    image: Option<String>,
    target: Option<String>,
    args: Option<RawPairs>,
    secrets: Option<RawPairs>,
    cache_from: Option<StringOrList>,
    #[serde(default)]
    depends_on: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDependency {
    Path(PathBuf),
    Full {
        file: PathBuf,
        name: Option<String>,
        namespace: Option<String>,
        variables: Option<RawPairs>,
        #[serde(default = "default_true")]
        wait: bool,
    },
}

fn default_true() -> bool {
    true
}

pub(super) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

fn mapping_key(key: &Value) -> Result<String, String> {
    scalar_to_string(key)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| format!("expected a string key, found {:?}", key))
}

impl RawPairs {
    pub(super) fn into_pairs(self, field: &str) -> Result<Vec<(String, String)>, String> {
        match self {
            RawPairs::Map(map) => map
                .iter()
                .map(|(k, v)| {
                    let key = mapping_key(k)?;
                    let value = scalar_to_string(v)
                        .ok_or_else(|| format!("{}.{} must be a scalar value", field, key))?;
                    Ok((key, value))
                })
                .collect(),
            RawPairs::List(items) => items
                .into_iter()
                .map(|item| match item.split_once('=') {
                    Some((k, v)) => Ok((k.trim().to_string(), v.to_string())),
                    None => Ok((item.trim().to_string(), String::new())),
                })
                .collect(),
        }
    }
}

fn pairs(raw: Option<RawPairs>, field: &str) -> Result<Vec<(String, String)>, String> {
    raw.map(|r| r.into_pairs(field)).transpose().map(Option::unwrap_or_default)
}

impl RawCommand {
    fn into_command(self, phase: PhaseKind) -> Result<Command, String> {
        match self {
            RawCommand::Text(command) => non_empty_command(command, phase),
            RawCommand::Named { name, command } => match non_empty_command(command, phase)? {
                Command::Shell { command, .. } => Ok(Command::Shell { name, command }),
                other => Ok(other),
            },
            RawCommand::Pipeline { name, pipeline } => Ok(Command::Pipeline(PipelineCommand {
                name,
                file: pipeline.file,
                pipeline_name: pipeline.name,
                namespace: pipeline.namespace,
                variables: pairs(pipeline.variables, "pipeline.variables")?,
                image: pipeline.image,
                wait: pipeline.wait,
            })),
        }
    }
}

fn non_empty_command(command: String, phase: PhaseKind) -> Result<Command, String> {
    if command.trim().is_empty() {
        return Err(format!("{} contains an empty command", phase));
    }
    Ok(Command::shell(command))
}

impl RawEndpoints {
    fn into_declarations(self) -> Result<Vec<EndpointDeclaration>, String> {
        match self {
            RawEndpoints::Named(map) => map
                .into_iter()
                .map(|(k, v)| {
                    let name = mapping_key(&k)?;
                    let rules: Vec<EndpointRule> = serde_yaml::from_value(v)
                        .map_err(|e| format!("endpoints.{}: {}", name, e))?;
                    Ok(EndpointDeclaration {
                        name: Some(name),
                        rules,
                    })
                })
                .collect(),
            RawEndpoints::List(items) => Ok(items
                .into_iter()
                .map(|item| match item {
                    RawEndpointItem::Declared { name, rules } => EndpointDeclaration { name, rules },
                    RawEndpointItem::Rule(rule) => EndpointDeclaration {
                        name: None,
                        rules: vec![rule],
                    },
                })
                .collect()),
        }
    }
}

fn convert_phase(raw: Option<RawPhase>, kind: PhaseKind) -> Result<Phase, String> {
    let Some(raw) = raw else {
        return Ok(Phase::empty(kind));
    };

    let (obj_image, obj_remote, raw_commands, compose, endpoints) = match raw {
        RawPhase::Commands(commands) => (None, None, commands, None, None),
        RawPhase::Full(obj) => (obj.image, obj.remote, obj.commands, obj.compose, obj.endpoints),
    };

    let commands = raw_commands
        .into_iter()
        .map(|c| c.into_command(kind))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Phase {
        kind,
        commands,
        image: obj_image,
        remote: obj_remote,
        compose: compose
            .map(StringOrList::into_vec)
            .unwrap_or_default()
            .into_iter()
            .map(PathBuf::from)
            .collect(),
        endpoints: endpoints
            .map(RawEndpoints::into_declarations)
            .transpose()?
            .unwrap_or_default(),
    })
}

fn convert_build(map: Mapping) -> Result<Vec<BuildTarget>, String> {
    let mut targets = Vec::with_capacity(map.len());
    for (key, value) in map {
        let name = mapping_key(&key)?;
        let raw: RawBuild = if value.is_null() {
            RawBuild::default()
        } else {
            serde_yaml::from_value(value).map_err(|e| format!("build.{}: {}", name, e))?
        };

        let defaults = BuildTarget::new(name.clone());
        targets.push(BuildTarget {
            context: raw.context.unwrap_or(defaults.context),
            dockerfile: raw.dockerfile.unwrap_or(defaults.dockerfile),
            image: raw.image,
            target: raw.target,
            args: pairs(raw.args, &format!("build.{}.args", name))?,
            secrets: pairs(raw.secrets, &format!("build.{}.secrets", name))?,
            cache_from: raw.cache_from.map(StringOrList::into_vec).unwrap_or_default(),
            depends_on: raw.depends_on,
            name,
        });
    }
    Ok(targets)
}

fn convert_dependencies(map: Mapping) -> Result<Vec<Dependency>, String> {
    let mut deps = Vec::with_capacity(map.len());
    for (key, value) in map {
        let key = mapping_key(&key)?;
        let raw: RawDependency =
            serde_yaml::from_value(value).map_err(|e| format!("dependencies.{}: {}", key, e))?;
        deps.push(match raw {
            RawDependency::Path(file) => Dependency {
                name: key,
                file,
                namespace: None,
                variables: Vec::new(),
                wait: true,
            },
            RawDependency::Full {
                file,
                name,
                namespace,
                variables,
                wait,
            } => Dependency {
                variables: pairs(variables, &format!("dependencies.{}.variables", key))?,
                name: name.unwrap_or(key),
                file,
                namespace,
                wait,
            },
        });
    }
    Ok(deps)
}

impl RawManifest {
    pub(super) fn into_manifest(self, path: &Path) -> Result<Manifest, String> {
        Ok(Manifest {
            name: self.name,
            path: path.to_path_buf(),
            image: self.image,
            remote: self.remote,
            variables: pairs(self.variables, "variables")?,
            build: self.build.map(convert_build).transpose()?.unwrap_or_default(),
            dependencies: self
                .dependencies
                .map(convert_dependencies)
                .transpose()?
                .unwrap_or_default(),
            deploy: convert_phase(self.deploy, PhaseKind::Deploy)?,
            destroy: convert_phase(self.destroy, PhaseKind::Destroy)?,
            test: convert_phase(self.test, PhaseKind::Test)?,
        })
    }
}

/// Parses an `endpoints:` value in either its named (map) or list form.
pub fn endpoints_from_value(value: Value) -> Result<Vec<EndpointDeclaration>, String> {
    let raw: RawEndpoints = serde_yaml::from_value(value).map_err(|e| e.to_string())?;
    raw.into_declarations()
}
