//! Assembly of the variable sources of one invocation.

use crate::build::split_image;
use crate::record::RunRecord;
use anyhow::{Context, Result};
use deckhand_core::naming::env_fragment;
use deckhand_core::vars::load_dotenv;
use deckhand_core::{DeckhandConfig, Manifest, ResolvedVars, Tier, VarSource, Variable};
use std::collections::BTreeSet;

pub const NAMESPACE_VAR: &str = "DECKHAND_NAMESPACE";
pub const NAME_VAR: &str = "DECKHAND_NAME";

pub fn builtin_source(namespace: &str, name: &str) -> VarSource {
    VarSource::new(
        Tier::Builtin,
        [(NAMESPACE_VAR, namespace), (NAME_VAR, name)],
    )
}

/// Every source of a fresh invocation, local environment included.
///
/// The local environment only contributes names one of the other sources
/// or the manifest declares.
pub fn current_sources(
    config: &DeckhandConfig,
    manifest: &Manifest,
    flags: &[(String, String)],
    namespace: &str,
    name: &str,
) -> Result<Vec<VarSource>> {
    let dotenv_path = manifest.base_dir().join(".env");
    let dotenv = load_dotenv(&dotenv_path)
        .with_context(|| format!("Failed to load {}", dotenv_path.display()))?;

    let platform = match &config.platform_vars_path {
        Some(path) => load_dotenv(path)
            .with_context(|| format!("Failed to load platform variables {}", path.display()))?,
        None => Vec::new(),
    };

    let mut sources = vec![
        builtin_source(namespace, name),
        VarSource::new(Tier::Flag, flags.iter().cloned()),
        VarSource::new(Tier::DotEnv, dotenv),
        VarSource::new(Tier::Platform, platform),
    ];

    let declared: BTreeSet<String> = sources
        .iter()
        .filter(|s| s.tier != Tier::Builtin)
        .flat_map(|s| s.names().map(str::to_string).collect::<Vec<_>>())
        .chain(manifest.variables.iter().map(|(k, _)| k.clone()))
        .collect();
    sources.push(VarSource::local_environment(declared.iter().map(String::as_str)));

    Ok(sources)
}

/// The variables a record saved, one source per tier, masking preserved.
pub fn record_sources(record: &RunRecord) -> Vec<VarSource> {
    record
        .variables_by_tier()
        .into_iter()
        .map(|(tier, vars)| VarSource::from_variables(tier, vars))
        .collect()
}

pub fn dependency_variable_name(dependency: &str, key: &str) -> String {
    format!(
        "DECKHAND_DEPENDENCY_{}_VARIABLE_{}",
        env_fragment(dependency),
        key
    )
}

/// What a dependency's record exposes to its dependents: its non-local
/// variables and exported outputs, each under a namespaced name.
pub fn dependency_variables(dependency: &str, record: &RunRecord) -> Vec<Variable> {
    let recorded = record
        .variables
        .iter()
        .filter(|v| v.tier != Tier::Local && v.tier != Tier::Builtin)
        .map(|v| {
            Variable::new(
                dependency_variable_name(dependency, &v.name),
                &v.value,
                Tier::Builtin,
            )
            .with_masked(v.masked)
        });
    let outputs = record.outputs.iter().map(|(k, v)| {
        Variable::new(dependency_variable_name(dependency, k), v, Tier::Builtin).with_masked(true)
    });
    recorded.chain(outputs).collect()
}

pub fn expose(vars: &mut ResolvedVars, exposed: Vec<Variable>) {
    for var in exposed {
        vars.set_builtin(var.name, var.value, var.masked);
    }
}

/// `DECKHAND_BUILD_<TARGET>_{IMAGE,REPOSITORY,TAG}` for one built image.
pub fn build_variables(target: &str, image: &str) -> Vec<(String, String)> {
    let prefix = format!("DECKHAND_BUILD_{}", env_fragment(target));
    let (repository, tag) = split_image(image);
    vec![
        (format!("{prefix}_IMAGE"), image.to_string()),
        (format!("{prefix}_REPOSITORY"), repository.to_string()),
        (format!("{prefix}_TAG"), tag.to_string()),
    ]
}
