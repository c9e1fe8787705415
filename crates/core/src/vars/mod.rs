//! Variable sources, precedence and masking.

mod dotenv;
mod expand;
mod mask;
mod resolver;

pub use dotenv::{load_dotenv, parse_dotenv};
pub use expand::{expand, references};
pub use mask::{Masker, MASK_PLACEHOLDER};
pub use resolver::{resolve, resolve_including_local, PrecedenceNotice, ResolvedVars};

use crate::error::ValidationError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

/// Prefix of every variable the engine itself defines.
pub const RESERVED_PREFIX: &str = "DECKHAND_";

#[derive(Debug, Error)]
pub enum VarsError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid variable assignment '{input}', expected NAME=value")]
    InvalidAssignment { input: String },

    #[error("invalid variable name '{name}'")]
    InvalidName { name: String },

    #[error("{}:{line}: {message}", path.display())]
    DotEnvParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where a variable definition came from.
///
/// The declaration order is the precedence order: earlier tiers win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Values the engine computes (namespace, build outputs, dependency outputs).
    Builtin,
    /// `--var NAME=value` on the command line.
    Flag,
    /// The caller's process environment.
    Local,
    /// `.env` file next to the manifest.
    #[serde(rename = "dotenv")]
    DotEnv,
    /// `variables:` block of the manifest.
    Manifest,
    /// Administrator-provided defaults.
    Platform,
}

impl Tier {
    pub fn all() -> &'static [Tier] {
        &[
            Tier::Builtin,
            Tier::Flag,
            Tier::Local,
            Tier::DotEnv,
            Tier::Manifest,
            Tier::Platform,
        ]
    }

    pub fn rank(self) -> u8 {
        match self {
            Tier::Builtin => 0,
            Tier::Flag => 1,
            Tier::Local => 2,
            Tier::DotEnv => 3,
            Tier::Manifest => 4,
            Tier::Platform => 5,
        }
    }

    /// Local and engine values are shown in clear text, everything else is
    /// masked in output.
    pub fn masked_by_default(self) -> bool {
        !matches!(self, Tier::Local | Tier::Builtin)
    }

    /// Whether `$NAME` references inside values of this tier are expanded.
    ///
    /// Local and platform values are taken literally.
    pub fn expands(self) -> bool {
        matches!(self, Tier::Flag | Tier::DotEnv | Tier::Manifest)
    }

    pub fn describe(self) -> &'static str {
        match self {
            Tier::Builtin => "by deckhand",
            Tier::Flag => "as --var",
            Tier::Local => "in the local environment",
            Tier::DotEnv => "in the .env file",
            Tier::Manifest => "in the manifest",
            Tier::Platform => "by the platform",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: String,
    pub tier: Tier,
    pub masked: bool,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: impl Into<String>, tier: Tier) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            tier,
            masked: tier.masked_by_default(),
        }
    }

    pub fn with_masked(mut self, masked: bool) -> Self {
        self.masked = masked;
        self
    }
}

/// One ordered set of definitions from a single tier.
#[derive(Debug, Clone)]
pub struct VarSource {
    pub tier: Tier,
    pub vars: Vec<Variable>,
}

impl VarSource {
    pub fn new<I, K, V>(tier: Tier, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            tier,
            vars: pairs
                .into_iter()
                .map(|(k, v)| Variable::new(k, v, tier))
                .collect(),
        }
    }

    pub fn from_variables(tier: Tier, vars: Vec<Variable>) -> Self {
        Self { tier, vars }
    }

    /// Local environment entries for the given names only.
    ///
    /// The caller's whole environment is never forwarded, only the values of
    /// names some other source declares.
    pub fn local_environment<'a>(declared: impl IntoIterator<Item = &'a str>) -> Self {
        let pairs: Vec<(String, String)> = declared
            .into_iter()
            .filter_map(|name| std::env::var(name).ok().map(|v| (name.to_string(), v)))
            .collect();
        Self::new(Tier::Local, pairs)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(|v| v.name.as_str())
    }
}

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"))
}

pub fn is_valid_name(name: &str) -> bool {
    name_regex().is_match(name)
}

/// Parses a `NAME=value` assignment as given to `--var`.
pub fn parse_assignment(input: &str) -> Result<(String, String), VarsError> {
    let (name, value) = input
        .split_once('=')
        .ok_or_else(|| VarsError::InvalidAssignment {
            input: input.to_string(),
        })?;
    let name = name.trim();
    if !is_valid_name(name) {
        return Err(VarsError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok((name.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_tier_precedence_is_pinned() {
        let ranks: Vec<u8> = Tier::all().iter().map(|t| t.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3, 4, 5]);
        assert!(Tier::Local.rank() < Tier::Platform.rank());
        assert!(Tier::Flag.rank() < Tier::Local.rank());
        assert!(Tier::DotEnv.rank() < Tier::Manifest.rank());
    }

    #[test]
    fn test_masking_defaults() {
        assert!(!Tier::Local.masked_by_default());
        assert!(Tier::Manifest.masked_by_default());
        assert!(Tier::Platform.masked_by_default());
        assert!(Tier::Flag.masked_by_default());
        assert!(Tier::DotEnv.masked_by_default());
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("TOKEN=a=b").unwrap(),
            ("TOKEN".to_string(), "a=b".to_string())
        );
        assert_eq!(
            parse_assignment("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert!(matches!(
            parse_assignment("NOVALUE"),
            Err(VarsError::InvalidAssignment { .. })
        ));
        assert!(matches!(
            parse_assignment("1BAD=x"),
            Err(VarsError::InvalidName { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_local_environment_only_forwards_declared_names() {
        std::env::set_var("DECKHAND_TEST_DECLARED", "yes");
        std::env::set_var("DECKHAND_TEST_UNDECLARED", "no");

        let source = VarSource::local_environment(["DECKHAND_TEST_DECLARED", "MISSING_NAME"]);

        std::env::remove_var("DECKHAND_TEST_DECLARED");
        std::env::remove_var("DECKHAND_TEST_UNDECLARED");

        assert_eq!(source.vars.len(), 1);
        assert_eq!(source.vars[0].name, "DECKHAND_TEST_DECLARED");
        assert_eq!(source.vars[0].value, "yes");
        assert!(!source.vars[0].masked);
    }
}
