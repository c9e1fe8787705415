//! Serde shapes of the compose file format.
//!
//! Compose accepts several spellings for most fields (a string or a list, a
//! map or a `K=V` list, short or long port syntax). The raw types accept all
//! of them and [`super`] normalizes them into [`crate::model`].

use crate::model::{DependsOnCondition, ServiceDependency};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawCompose {
    pub name: Option<String>,
    pub services: BTreeMap<String, Option<RawService>>,
    pub volumes: BTreeMap<String, Option<RawVolume>>,
    #[serde(alias = "x-endpoints")]
    pub endpoints: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawService {
    pub image: Option<String>,
    pub build: Option<RawServiceBuild>,
    pub entrypoint: Option<StringOrList>,
    pub command: Option<StringOrList>,
    pub environment: Option<RawPairs>,
    pub env_file: Option<StringOrList>,
    pub ports: Vec<RawPort>,
    pub expose: Vec<Value>,
    pub volumes: Vec<RawMount>,
    pub labels: Option<RawPairs>,
    pub annotations: Option<RawPairs>,
    pub depends_on: Option<RawDependsOn>,
    pub healthcheck: Option<RawHealthcheck>,
    pub deploy: Option<RawDeploy>,
    pub restart: Option<String>,
    pub working_dir: Option<String>,
    #[serde(rename = "x-kind")]
    pub kind: Option<String>,
    #[serde(rename = "x-public")]
    pub public: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawServiceBuild {
    Context(String),
    Full {
        #[serde(default)]
        context: Option<String>,
        #[serde(default)]
        dockerfile: Option<String>,
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        args: Option<RawPairs>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    /// Strings are split on whitespace, lists are kept as given.
    pub fn into_args(self) -> Vec<String> {
        match self {
            StringOrList::One(s) => s.split_whitespace().map(str::to_string).collect(),
            StringOrList::Many(v) => v,
        }
    }

    pub fn into_list(self) -> Vec<String> {
        match self {
            StringOrList::One(s) => vec![s],
            StringOrList::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawPairs {
    Map(Mapping),
    List(Vec<String>),
}

/// One `KEY=value` or `KEY: value` entry; `None` when only the key is given.
pub(crate) type RawPair = (String, Option<String>);

impl RawPairs {
    pub fn into_pairs(self) -> Result<Vec<RawPair>, String> {
        match self {
            RawPairs::Map(map) => map
                .into_iter()
                .map(|(k, v)| {
                    let key = scalar_to_string(&k).ok_or_else(|| format!("invalid key {k:?}"))?;
                    let value = match v {
                        Value::Null => None,
                        other => Some(
                            scalar_to_string(&other)
                                .ok_or_else(|| format!("value of '{key}' must be a scalar"))?,
                        ),
                    };
                    Ok((key, value))
                })
                .collect(),
            RawPairs::List(items) => Ok(items
                .into_iter()
                .map(|item| match item.split_once('=') {
                    Some((k, v)) => (k.to_string(), Some(v.to_string())),
                    None => (item, None),
                })
                .collect()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawPort {
    Number(u16),
    Short(String),
    Long {
        target: u16,
        #[serde(default)]
        published: Option<Value>,
        #[serde(default)]
        protocol: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawMount {
    Short(String),
    Long {
        #[serde(rename = "type", default)]
        kind: Option<String>,
        #[serde(default)]
        source: Option<String>,
        target: String,
        #[serde(default)]
        read_only: bool,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawDependsOn {
    List(Vec<String>),
    Map(BTreeMap<String, Value>),
}

impl RawDependsOn {
    /// List entries wait for `service_started`, as do map entries without a
    /// `condition`.
    pub fn into_dependencies(self) -> Result<Vec<ServiceDependency>, String> {
        match self {
            RawDependsOn::List(v) => Ok(v.into_iter().map(ServiceDependency::started).collect()),
            RawDependsOn::Map(m) => m
                .into_iter()
                .map(|(service, value)| {
                    let condition = match value.get("condition") {
                        None | Some(Value::Null) => DependsOnCondition::Started,
                        Some(Value::String(c)) => DependsOnCondition::from_name(c),
                        Some(_) => {
                            return Err(format!("depends_on.{service}.condition must be a string"))
                        }
                    };
                    Ok(ServiceDependency::new(service, condition))
                })
                .collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawHealthcheck {
    pub test: Option<StringOrList>,
    pub interval: Option<String>,
    pub timeout: Option<String>,
    pub start_period: Option<String>,
    pub retries: Option<u32>,
    pub disable: bool,
    pub http: Option<RawHttpCheck>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawHttpCheck {
    #[serde(default = "default_http_path")]
    pub path: String,
    pub port: u16,
}

fn default_http_path() -> String {
    "/".to_string()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawDeploy {
    pub replicas: Option<u32>,
    pub labels: Option<RawPairs>,
    pub endpoint_mode: Option<String>,
    pub restart_policy: Option<RawRestartPolicy>,
    pub resources: Option<RawResources>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawRestartPolicy {
    pub condition: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawResources {
    pub limits: Option<RawLimits>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawLimits {
    pub cpus: Option<Value>,
    pub memory: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawVolume {
    pub labels: Option<RawPairs>,
    pub annotations: Option<RawPairs>,
    pub driver_opts: BTreeMap<String, Value>,
    #[serde(rename = "x-storage-class")]
    pub storage_class: Option<String>,
    #[serde(rename = "x-keep")]
    pub keep: bool,
}

pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
