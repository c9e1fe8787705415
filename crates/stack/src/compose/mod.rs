//! Compose file loading.
//!
//! Files are interpolated with the effective variables first, then parsed
//! and normalized into a [`Stack`]. Several files are layered in order
//! before conversion; [`merge`] has the per-field rules.

mod merge;
mod raw;

use crate::error::StackError;
use crate::model::{
    Healthcheck, HttpCheck, MountSource, NamedVolume, PortMapping, Protocol, Resources,
    RestartPolicy, ServiceBuild, ServiceDeclaration, Stack, VolumeMount,
};
use deckhand_core::manifest::endpoints_from_value;
use deckhand_core::naming::sanitize_name;
use deckhand_core::vars::load_dotenv;
use deckhand_core::ResolvedVars;
use raw::{RawCompose, RawMount, RawPairs, RawPort, RawService, RawVolume};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Reads and merges `files` (relative to `base_dir`) into one stack.
pub fn load_stack(
    files: &[PathBuf],
    base_dir: &Path,
    default_name: &str,
    vars: &ResolvedVars,
) -> Result<Stack, StackError> {
    let mut document = Value::Null;
    let mut project_file = None;

    for file in files {
        let path = base_dir.join(file);
        let content = std::fs::read_to_string(&path).map_err(|source| StackError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "Read compose file");

        merge::merge_documents(&mut document, read_document(&content, &path, vars)?);
        project_file.get_or_insert(path);
    }

    let path = project_file.unwrap_or_else(|| base_dir.join("docker-compose.yml"));
    stack_from_document(document, &path, default_name, vars)
}

/// Parses one compose document located at `path`.
pub fn parse_compose(
    content: &str,
    path: &Path,
    default_name: &str,
    vars: &ResolvedVars,
) -> Result<Stack, StackError> {
    let document = read_document(content, path, vars)?;
    stack_from_document(document, path, default_name, vars)
}

fn read_document(content: &str, path: &Path, vars: &ResolvedVars) -> Result<Value, StackError> {
    let interpolated = vars.expand(content);
    if interpolated.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_yaml::from_str(&interpolated).map_err(|source| StackError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Relative paths in `document` resolve against the directory of `path`.
fn stack_from_document(
    document: Value,
    path: &Path,
    default_name: &str,
    vars: &ResolvedVars,
) -> Result<Stack, StackError> {
    let raw: RawCompose = if document.is_null() {
        RawCompose::default()
    } else {
        serde_yaml::from_value(document).map_err(|source| StackError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    };

    let invalid = |message: String| StackError::Invalid {
        path: path.to_path_buf(),
        message,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let name = raw
        .name
        .as_deref()
        .map(sanitize_name)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| default_name.to_string());
    let mut stack = Stack::new(name);

    for (svc_name, raw_svc) in raw.services {
        let service = convert_service(&svc_name, raw_svc.unwrap_or_default(), dir, vars)
            .map_err(|e| invalid(format!("services[{svc_name}]: {e}")))?;
        stack.services.insert(svc_name, service);
    }

    for (vol_name, raw_vol) in raw.volumes {
        let volume = convert_volume(&vol_name, raw_vol.unwrap_or_default())
            .map_err(|e| invalid(format!("volumes[{vol_name}]: {e}")))?;
        stack.volumes.insert(vol_name, volume);
    }

    if let Some(value) = raw.endpoints {
        stack.endpoints = endpoints_from_value(value).map_err(|e| invalid(format!("endpoints: {e}")))?;
    }

    Ok(stack)
}

fn convert_service(
    name: &str,
    raw: RawService,
    dir: &Path,
    vars: &ResolvedVars,
) -> Result<ServiceDeclaration, String> {
    let mut svc = ServiceDeclaration::new(name);
    svc.image = raw.image;
    svc.working_dir = raw.working_dir;
    svc.kind = raw.kind;
    svc.public = raw.public;
    svc.entrypoint = raw.entrypoint.map(|e| e.into_args()).unwrap_or_default();
    svc.command = raw.command.map(|c| c.into_args()).unwrap_or_default();
    svc.depends_on = raw.depends_on.map(|d| d.into_dependencies()).transpose()?.unwrap_or_default();

    svc.build = raw.build.map(|build| convert_build(build, dir)).transpose()?;

    for file in raw.env_file.map(|f| f.into_list()).unwrap_or_default() {
        let env_path = dir.join(&file);
        if !env_path.is_file() {
            return Err(format!("env_file '{file}' not found"));
        }
        let pairs = load_dotenv(&env_path).map_err(|e| e.to_string())?;
        svc.environment.extend(pairs);
    }
    if let Some(env) = raw.environment {
        for (key, value) in env.into_pairs()? {
            // A bare key takes its value from the effective environment.
            match value.or_else(|| vars.lookup(&key)) {
                Some(value) => svc.environment.push((key, value)),
                None => debug!(service = %name, variable = %key, "Skipping unset environment entry"),
            }
        }
    }

    for port in raw.ports {
        svc.ports.push(convert_port(port)?);
    }
    for exposed in raw.expose {
        let text = raw::scalar_to_string(&exposed).ok_or("expose entries must be scalars")?;
        let (port, protocol) = split_protocol(&text)?;
        svc.ports.push(PortMapping {
            container: parse_port(port)?,
            published: None,
            protocol,
        });
    }

    for mount in raw.volumes {
        svc.volumes.push(convert_mount(mount)?);
    }

    svc.labels = into_map(raw.labels)?;
    svc.annotations = into_map(raw.annotations)?;

    if let Some(restart) = raw.restart {
        svc.restart =
            RestartPolicy::parse(&restart).ok_or_else(|| format!("invalid restart policy '{restart}'"))?;
    }

    if let Some(deploy) = raw.deploy {
        if let Some(replicas) = deploy.replicas {
            svc.replicas = replicas;
        }
        svc.labels.extend(into_map(deploy.labels)?);
        svc.endpoint_mode = deploy.endpoint_mode;
        if let Some(condition) = deploy.restart_policy.and_then(|p| p.condition) {
            svc.restart = RestartPolicy::parse(&condition)
                .ok_or_else(|| format!("invalid restart_policy.condition '{condition}'"))?;
        }
        if let Some(limits) = deploy.resources.and_then(|r| r.limits) {
            svc.resources = Resources {
                cpus: limits.cpus.as_ref().and_then(raw::scalar_to_string),
                memory: limits.memory,
            };
        }
    }

    svc.healthcheck = raw.healthcheck.map(convert_healthcheck).transpose()?.flatten();

    Ok(svc)
}

fn convert_build(build: raw::RawServiceBuild, dir: &Path) -> Result<ServiceBuild, String> {
    Ok(match build {
        raw::RawServiceBuild::Context(context) => ServiceBuild {
            context: dir.join(context),
            ..Default::default()
        },
        raw::RawServiceBuild::Full {
            context,
            dockerfile,
            target,
            args,
        } => ServiceBuild {
            context: dir.join(context.unwrap_or_else(|| ".".to_string())),
            dockerfile: dockerfile.map(PathBuf::from),
            target,
            args: args
                .map(|a| a.into_pairs())
                .transpose()?
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| (k, v.unwrap_or_default()))
                .collect(),
        },
    })
}

fn into_map(pairs: Option<RawPairs>) -> Result<BTreeMap<String, String>, String> {
    Ok(pairs
        .map(|p| p.into_pairs())
        .transpose()?
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.unwrap_or_default()))
        .collect())
}

fn parse_port(text: &str) -> Result<u16, String> {
    if text.contains('-') {
        return Err(format!("port ranges are not supported: '{text}'"));
    }
    text.trim()
        .parse::<u16>()
        .map_err(|_| format!("invalid port '{text}'"))
}

fn split_protocol(text: &str) -> Result<(&str, Protocol), String> {
    match text.split_once('/') {
        Some((port, proto)) => Protocol::parse(proto)
            .map(|p| (port, p))
            .ok_or_else(|| format!("invalid protocol '{proto}'")),
        None => Ok((text, Protocol::Tcp)),
    }
}

/// Short syntax: `80`, `8080:80`, `127.0.0.1:8080:80`, each with an
/// optional `/udp` suffix.
fn convert_port(port: RawPort) -> Result<PortMapping, String> {
    match port {
        RawPort::Number(container) => Ok(PortMapping::new(container)),
        RawPort::Short(text) => {
            let (spec, protocol) = split_protocol(&text)?;
            let parts: Vec<&str> = spec.split(':').collect();
            let (published, container) = match parts.as_slice() {
                [container] => (None, *container),
                [published, container] => (Some(*published), *container),
                [_host, published, container] => (Some(*published), *container),
                _ => return Err(format!("invalid port '{text}'")),
            };
            Ok(PortMapping {
                container: parse_port(container)?,
                published: published
                    .filter(|p| !p.is_empty())
                    .map(parse_port)
                    .transpose()?,
                protocol,
            })
        }
        RawPort::Long {
            target,
            published,
            protocol,
        } => {
            let published = match published.as_ref().and_then(raw::scalar_to_string) {
                Some(p) => Some(parse_port(&p)?),
                None => None,
            };
            let protocol = match protocol {
                Some(p) => Protocol::parse(&p).ok_or_else(|| format!("invalid protocol '{p}'"))?,
                None => Protocol::Tcp,
            };
            Ok(PortMapping {
                container: target,
                published,
                protocol,
            })
        }
    }
}

fn is_host_path(source: &str) -> bool {
    source.starts_with('.') || source.starts_with('/') || source.starts_with('~')
}

fn convert_mount(mount: RawMount) -> Result<VolumeMount, String> {
    match mount {
        RawMount::Short(text) => {
            let parts: Vec<&str> = text.split(':').collect();
            let (source, target, mode) = match parts.as_slice() {
                [target] => (None, *target, None),
                [source, target] => (Some(*source), *target, None),
                [source, target, mode] => (Some(*source), *target, Some(*mode)),
                _ => return Err(format!("invalid volume '{text}'")),
            };
            let source = match source {
                None => MountSource::Anonymous,
                Some(s) if is_host_path(s) => MountSource::Bind(s.to_string()),
                Some(s) => MountSource::Named(s.to_string()),
            };
            Ok(VolumeMount {
                source,
                target: target.to_string(),
                read_only: mode
                    .map(|m| m.split(',').any(|opt| opt == "ro"))
                    .unwrap_or(false),
            })
        }
        RawMount::Long {
            kind,
            source,
            target,
            read_only,
        } => {
            let source = match (kind.as_deref(), source) {
                (Some("bind"), Some(s)) => MountSource::Bind(s),
                (Some("bind"), None) => return Err(format!("bind mount '{target}' needs a source")),
                (Some("volume") | None, Some(s)) => MountSource::Named(s),
                (Some("volume") | None, None) => MountSource::Anonymous,
                (Some(other), _) => return Err(format!("unsupported volume type '{other}'")),
            };
            Ok(VolumeMount {
                source,
                target,
                read_only,
            })
        }
    }
}

fn convert_healthcheck(raw: raw::RawHealthcheck) -> Result<Option<Healthcheck>, String> {
    if raw.disable {
        return Ok(None);
    }

    let test = match raw.test {
        None => Vec::new(),
        Some(raw::StringOrList::One(cmd)) => shell_check(cmd),
        Some(raw::StringOrList::Many(items)) => match items.split_first() {
            Some((marker, _)) if marker == "NONE" => return Ok(None),
            Some((marker, rest)) if marker == "CMD" => rest.to_vec(),
            Some((marker, rest)) if marker == "CMD-SHELL" => shell_check(rest.join(" ")),
            _ => items,
        },
    };

    let http = raw.http.map(|h| HttpCheck {
        path: h.path,
        port: h.port,
    });
    if test.is_empty() && http.is_none() {
        return Ok(None);
    }

    Ok(Some(Healthcheck {
        test,
        http,
        interval_secs: raw.interval.as_deref().map(parse_duration_secs).transpose()?,
        timeout_secs: raw.timeout.as_deref().map(parse_duration_secs).transpose()?,
        start_period_secs: raw.start_period.as_deref().map(parse_duration_secs).transpose()?,
        retries: raw.retries,
    }))
}

fn shell_check(cmd: String) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), cmd]
}

/// Compose durations such as `30s`, `1m30s` or `2h`, rounded down to whole
/// seconds.
pub(crate) fn parse_duration_secs(text: &str) -> Result<u32, String> {
    let invalid = || format!("invalid duration '{text}'");
    let mut total_ms: u64 = 0;
    let mut digits = String::new();
    let mut chars = text.trim().chars().peekable();

    if text.trim().is_empty() {
        return Err(invalid());
    }

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let value: u64 = digits.parse().map_err(|_| invalid())?;
        digits.clear();
        let unit_ms = match c {
            'h' => 3_600_000,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                1
            }
            'm' => 60_000,
            's' => 1_000,
            _ => return Err(invalid()),
        };
        total_ms += value * unit_ms;
    }
    if !digits.is_empty() {
        // bare numbers are seconds
        total_ms += digits.parse::<u64>().map_err(|_| invalid())? * 1_000;
    }

    u32::try_from(total_ms / 1_000).map_err(|_| invalid())
}

fn convert_volume(name: &str, raw: RawVolume) -> Result<NamedVolume, String> {
    let mut volume = NamedVolume::new(name);
    volume.labels = into_map(raw.labels)?;
    volume.annotations = into_map(raw.annotations)?;
    volume.storage_class = raw.storage_class;
    volume.keep = raw.keep;

    if let Some(size) = raw.driver_opts.get("size") {
        volume.size = raw::scalar_to_string(size).ok_or("driver_opts.size must be a scalar")?;
    }
    for key in raw.driver_opts.keys().filter(|k| k.as_str() != "size") {
        warn!(volume = %name, option = %key, "Ignoring unsupported driver option");
    }

    Ok(volume)
}
