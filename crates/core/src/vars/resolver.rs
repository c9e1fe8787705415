use super::{expand, Masker, Tier, VarSource, Variable, VarsError};
use crate::error::ValidationError;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::warn;

/// A definition that lost to a higher-precedence tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrecedenceNotice {
    pub name: String,
    pub winner: Tier,
    pub ignored: Tier,
}

impl PrecedenceNotice {
    pub fn message(&self) -> String {
        format!(
            "Variable '{}' defined {} takes precedence over the same variable defined {}, which will be ignored",
            self.name,
            self.winner.describe(),
            self.ignored.describe()
        )
    }
}

/// The effective environment of one pipeline invocation.
#[derive(Debug, Clone, Default)]
pub struct ResolvedVars {
    values: BTreeMap<String, Variable>,
    notices: Vec<PrecedenceNotice>,
    /// Names no source defines are looked up in the process environment
    /// during expansion. They never become part of `values`.
    include_local: bool,
}

fn local_value(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

impl ResolvedVars {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|v| v.value.as_str())
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.values.get(name)
    }

    pub fn tier_of(&self, name: &str) -> Option<Tier> {
        self.values.get(name).map(|v| v.tier)
    }

    pub fn is_masked(&self, name: &str) -> bool {
        self.values.get(name).map(|v| v.masked).unwrap_or(false)
    }

    pub fn masked_names(&self) -> BTreeSet<String> {
        self.values
            .values()
            .filter(|v| v.masked)
            .map(|v| v.name.clone())
            .collect()
    }

    pub fn notices(&self) -> &[PrecedenceNotice] {
        &self.notices
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.values.values()
    }

    /// `(name, value)` pairs in name order, ready for a child process.
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        self.values
            .values()
            .map(|v| (v.name.clone(), v.value.clone()))
            .collect()
    }

    pub fn masker(&self) -> Masker {
        Masker::new(self.values.values().filter(|v| v.masked).map(|v| v.value.as_str()))
    }

    /// Adds or replaces an engine-computed value after resolution.
    pub fn set_builtin(&mut self, name: impl Into<String>, value: impl Into<String>, masked: bool) {
        let variable = Variable::new(name, value, Tier::Builtin).with_masked(masked);
        self.values.insert(variable.name.clone(), variable);
    }

    /// Effective value of `name`, falling back to the process environment
    /// when the set was resolved with [`resolve_including_local`].
    pub fn lookup(&self, name: &str) -> Option<String> {
        match self.get(name) {
            Some(value) => Some(value.to_string()),
            None if self.include_local => local_value(name),
            None => None,
        }
    }

    /// Expands `$NAME` references in arbitrary text against the effective
    /// values. Unknown names become empty strings.
    pub fn expand(&self, template: &str) -> String {
        let mut lookup = |name: &str| -> Result<Option<String>, std::convert::Infallible> {
            Ok(self.lookup(name))
        };
        match expand(template, &mut lookup) {
            Ok(s) => s,
            Err(never) => match never {},
        }
    }
}

/// Merges `sources` and the manifest defaults into one environment.
///
/// Sources are ordered by [`Tier::rank`] before merging, so the relative
/// order the caller passes them in does not change precedence. Within a
/// single source the last definition of a name wins.
pub fn resolve(
    sources: &[VarSource],
    manifest_defaults: &[(String, String)],
) -> Result<ResolvedVars, VarsError> {
    resolve_with(sources, manifest_defaults, false)
}

/// Like [`resolve`], but references to names no source defines expand to
/// the caller's process environment. Only declared names end up in the
/// resolved set, so nothing else is ever forwarded to a container.
pub fn resolve_including_local(
    sources: &[VarSource],
    manifest_defaults: &[(String, String)],
) -> Result<ResolvedVars, VarsError> {
    resolve_with(sources, manifest_defaults, true)
}

fn resolve_with(
    sources: &[VarSource],
    manifest_defaults: &[(String, String)],
    include_local: bool,
) -> Result<ResolvedVars, VarsError> {
    let mut ordered: Vec<VarSource> = sources.to_vec();
    if !manifest_defaults.is_empty() {
        ordered.push(VarSource::new(Tier::Manifest, manifest_defaults.iter().cloned()));
    }
    ordered.sort_by_key(|s| s.tier.rank());

    let mut winners: BTreeMap<String, Variable> = BTreeMap::new();
    let mut notices = Vec::new();

    for source in &ordered {
        for var in dedupe_last_wins(&source.vars) {
            match winners.get(&var.name) {
                None => {
                    winners.insert(var.name.clone(), var);
                }
                Some(winner) if winner.tier == var.tier => {}
                Some(winner) => {
                    let notice = PrecedenceNotice {
                        name: var.name.clone(),
                        winner: winner.tier,
                        ignored: var.tier,
                    };
                    if !notices.contains(&notice) {
                        warn!("{}", notice.message());
                        notices.push(notice);
                    }
                }
            }
        }
    }

    let expanded = expand_all(&winners, include_local)?;
    let values = winners
        .into_iter()
        .map(|(name, mut var)| {
            if let Some(value) = expanded.get(&name) {
                var.value = value.clone();
            }
            (name, var)
        })
        .collect();

    Ok(ResolvedVars {
        values,
        notices,
        include_local,
    })
}

fn dedupe_last_wins(vars: &[Variable]) -> Vec<Variable> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut out: Vec<Variable> = Vec::with_capacity(vars.len());
    for var in vars {
        match index.get(var.name.as_str()) {
            Some(&i) => out[i] = var.clone(),
            None => {
                index.insert(var.name.as_str(), out.len());
                out.push(var.clone());
            }
        }
    }
    out
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

struct Expander<'a> {
    winners: &'a BTreeMap<String, Variable>,
    include_local: bool,
    state: HashMap<String, Visit>,
    done: HashMap<String, String>,
    stack: Vec<String>,
}

impl<'a> Expander<'a> {
    fn value_of(&mut self, name: &str) -> Result<Option<String>, ValidationError> {
        let winners = self.winners;
        let Some(var) = winners.get(name) else {
            return Ok(if self.include_local { local_value(name) } else { None });
        };
        if !var.tier.expands() {
            return Ok(Some(var.value.clone()));
        }

        match self.state.get(name) {
            Some(Visit::Done) => return Ok(self.done.get(name).cloned()),
            Some(Visit::InProgress) => {
                let start = self.stack.iter().position(|n| n == name).unwrap_or(0);
                let mut chain: Vec<String> = self.stack[start..].to_vec();
                chain.push(name.to_string());
                return Err(ValidationError::VariableCycle { chain });
            }
            None => {}
        }

        self.state.insert(name.to_string(), Visit::InProgress);
        self.stack.push(name.to_string());

        let template = var.value.clone();
        let mut lookup = |n: &str| self.value_of(n);
        let value = expand(&template, &mut lookup)?;

        self.stack.pop();
        self.state.insert(name.to_string(), Visit::Done);
        self.done.insert(name.to_string(), value.clone());
        Ok(Some(value))
    }
}

fn expand_all(
    winners: &BTreeMap<String, Variable>,
    include_local: bool,
) -> Result<HashMap<String, String>, ValidationError> {
    let mut expander = Expander {
        winners,
        include_local,
        state: HashMap::new(),
        done: HashMap::new(),
        stack: Vec::new(),
    };

    for (name, var) in winners {
        if var.tier.expands() {
            expander.value_of(name)?;
        }
    }

    Ok(expander.done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn source(tier: Tier, pairs: &[(&str, &str)]) -> VarSource {
        VarSource::new(tier, pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())))
    }

    fn defaults(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_flag_beats_dotenv_beats_manifest() {
        let manifest = defaults(&[("VAR", "manifest-value")]);
        let dotenv = source(Tier::DotEnv, &[("VAR", "dotenv-value")]);
        let flag = source(Tier::Flag, &[("VAR", "flag-value")]);

        let resolved = resolve(&[dotenv.clone(), flag], &manifest).unwrap();
        assert_eq!(resolved.get("VAR"), Some("flag-value"));
        assert_eq!(resolved.tier_of("VAR"), Some(Tier::Flag));

        let resolved = resolve(&[dotenv], &manifest).unwrap();
        assert_eq!(resolved.get("VAR"), Some("dotenv-value"));
    }

    #[test]
    fn test_caller_order_does_not_change_precedence() {
        let platform = source(Tier::Platform, &[("REGION", "eu")]);
        let local = source(Tier::Local, &[("REGION", "us")]);

        let a = resolve(&[platform.clone(), local.clone()], &[]).unwrap();
        let b = resolve(&[local, platform], &[]).unwrap();
        assert_eq!(a.get("REGION"), Some("us"));
        assert_eq!(b.get("REGION"), Some("us"));
    }

    #[test]
    fn test_shadowed_definitions_are_reported() {
        let flag = source(Tier::Flag, &[("VAR", "a")]);
        let resolved = resolve(&[flag], &defaults(&[("VAR", "b")])).unwrap();

        assert_eq!(resolved.notices().len(), 1);
        let notice = &resolved.notices()[0];
        assert_eq!(notice.winner, Tier::Flag);
        assert_eq!(notice.ignored, Tier::Manifest);
        assert_eq!(
            notice.message(),
            "Variable 'VAR' defined as --var takes precedence over the same variable defined in the manifest, which will be ignored"
        );
    }

    #[test]
    fn test_last_definition_within_a_tier_wins() {
        let flag = source(Tier::Flag, &[("VAR", "first"), ("VAR", "second")]);
        let resolved = resolve(&[flag], &[]).unwrap();
        assert_eq!(resolved.get("VAR"), Some("second"));
        assert!(resolved.notices().is_empty());
    }

    #[test]
    fn test_masked_names_follow_tiers() {
        let local = source(Tier::Local, &[("USER_NAME", "alice")]);
        let platform = source(Tier::Platform, &[("API_TOKEN", "tok-123")]);
        let resolved = resolve(&[local, platform], &defaults(&[("DB_PASSWORD", "hunter2")])).unwrap();

        let masked = resolved.masked_names();
        assert!(masked.contains("API_TOKEN"));
        assert!(masked.contains("DB_PASSWORD"));
        assert!(!masked.contains("USER_NAME"));

        let masker = resolved.masker();
        assert_eq!(masker.mask("alice hunter2 tok-123"), "alice *** ***");
    }

    #[test]
    fn test_expansion_uses_effective_values() {
        let local = source(Tier::Local, &[("HOST", "example.com")]);
        let resolved = resolve(
            &[local],
            &defaults(&[("URL", "https://${HOST}/api"), ("HOST", "ignored.local")]),
        )
        .unwrap();
        assert_eq!(resolved.get("URL"), Some("https://example.com/api"));
    }

    #[test]
    fn test_expansion_chains_across_tiers() {
        let flag = source(Tier::Flag, &[("TAG", "v${MAJOR}.1")]);
        let resolved = resolve(
            &[flag],
            &defaults(&[("MAJOR", "2"), ("IMAGE", "app:$TAG")]),
        )
        .unwrap();
        assert_eq!(resolved.get("IMAGE"), Some("app:v2.1"));
    }

    #[test]
    fn test_local_values_are_literal() {
        let local = source(Tier::Local, &[("PS", "$HOME is here")]);
        let resolved = resolve(&[local], &[]).unwrap();
        assert_eq!(resolved.get("PS"), Some("$HOME is here"));
    }

    #[test]
    fn test_reference_cycle_is_fatal() {
        let err = resolve(&[], &defaults(&[("A", "$B"), ("B", "x-${A}")])).unwrap_err();
        match err {
            VarsError::Validation(ValidationError::VariableCycle { chain }) => {
                assert_eq!(chain, vec!["A", "B", "A"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        assert!(resolve(&[], &defaults(&[("A", "${A}x")])).is_err());
    }

    #[test]
    fn test_set_builtin_and_expand() {
        let mut resolved = resolve(&[], &defaults(&[("NAME", "shop")])).unwrap();
        resolved.set_builtin("DECKHAND_NAMESPACE", "dev", false);
        assert_eq!(resolved.expand("$NAME.$DECKHAND_NAMESPACE"), "shop.dev");
        assert!(!resolved.is_masked("DECKHAND_NAMESPACE"));
    }

    #[test]
    #[serial]
    fn test_undefined_names_expand_from_the_process_environment() {
        std::env::set_var("DECKHAND_TEST_SHELL_TAG", "v42");
        let manifest = defaults(&[("CFG", "${DECKHAND_TEST_SHELL_TAG}-x")]);

        let including = resolve_including_local(&[], &manifest).unwrap();
        let excluding = resolve(&[], &manifest).unwrap();
        let text = including.expand("nginx:${DECKHAND_TEST_SHELL_TAG}");
        std::env::remove_var("DECKHAND_TEST_SHELL_TAG");

        assert_eq!(including.get("CFG"), Some("v42-x"));
        assert_eq!(text, "nginx:v42");
        assert_eq!(including.get("DECKHAND_TEST_SHELL_TAG"), None);
        assert!(including.env_pairs().iter().all(|(k, _)| k == "CFG"));
        assert_eq!(excluding.get("CFG"), Some("-x"));
    }

    #[test]
    #[serial]
    fn test_defined_names_win_over_the_process_environment() {
        std::env::set_var("DECKHAND_TEST_SHELL_REGION", "shell");
        let flag = source(Tier::Flag, &[("DECKHAND_TEST_SHELL_REGION", "flag")]);
        let resolved =
            resolve_including_local(&[flag], &defaults(&[("URL", "$DECKHAND_TEST_SHELL_REGION.example")]))
                .unwrap();
        std::env::remove_var("DECKHAND_TEST_SHELL_REGION");

        assert_eq!(resolved.get("URL"), Some("flag.example"));
    }
}
