//! Content digest of a build target's inputs.

use crate::build::BuildRequest;
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub digest: String,
    /// False when some input could not be read. An unreliable fingerprint
    /// never matches a recorded one.
    pub reliable: bool,
}

impl Fingerprint {
    pub fn short(&self) -> &str {
        &self.digest[..12.min(self.digest.len())]
    }
}

/// The parts of a target that determine its image.
#[derive(Debug, Clone, Copy)]
pub struct FingerprintInput<'a> {
    pub commit: Option<&'a str>,
    pub target: &'a str,
    pub stage: Option<&'a str>,
    pub context: &'a Path,
    pub dockerfile: &'a Path,
    pub args: &'a [(String, String)],
    pub secrets: &'a [(String, String)],
    /// Explicitly requested image reference, if any.
    pub image: Option<&'a str>,
}

impl<'a> FingerprintInput<'a> {
    pub fn from_request(request: &'a BuildRequest, commit: Option<&'a str>, image: Option<&'a str>) -> Self {
        Self {
            commit,
            target: &request.target,
            stage: request.stage.as_deref(),
            context: &request.context,
            dockerfile: &request.dockerfile,
            args: &request.args,
            secrets: &request.secrets,
            image,
        }
    }
}

pub fn fingerprint(input: &FingerprintInput<'_>) -> Fingerprint {
    match compute(input) {
        Ok(digest) => Fingerprint {
            digest,
            reliable: true,
        },
        Err(e) => {
            warn!(
                target_name = %input.target,
                error = %e,
                "Could not fingerprint build inputs, forcing rebuild"
            );
            Fingerprint {
                digest: hex::encode(Sha256::digest(uuid::Uuid::new_v4().as_bytes())),
                reliable: false,
            }
        }
    }
}

fn sorted_pairs(pairs: &[(String, String)]) -> String {
    let mut entries: Vec<String> = pairs.iter().map(|(k, v)| format!("{k}={v}")).collect();
    entries.sort();
    entries.join(",")
}

fn compute(input: &FingerprintInput<'_>) -> io::Result<String> {
    let dockerfile_path = input.context.join(input.dockerfile);
    let dockerfile = fs::read_to_string(&dockerfile_path)?;

    let mut hasher = Sha256::new();
    hasher.update(format!("commit:{};", input.commit.unwrap_or("none")));
    hasher.update(format!(
        "target:{}:{};",
        input.target,
        input.stage.unwrap_or("none")
    ));
    hasher.update(format!("build_args:{};", sorted_pairs(input.args)));
    hasher.update(format!("secrets:{};", sorted_pairs(input.secrets)));
    hasher.update(format!("context:{};", context_digest(input.context)?));
    hasher.update(format!(
        "dockerfile_content:{};",
        hex::encode(Sha256::digest(dockerfile.as_bytes()))
    ));
    hasher.update(format!("base_images:{};", base_images(&dockerfile).join(",")));
    hasher.update(format!("image:{};", input.image.unwrap_or("none")));
    Ok(hex::encode(hasher.finalize()))
}

/// Digest of every file under `context` that `.dockerignore` does not
/// exclude, keyed by relative path.
pub fn context_digest(context: &Path) -> io::Result<String> {
    if !context.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("build context {} is not a directory", context.display()),
        ));
    }

    let walker = WalkBuilder::new(context)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .ignore(false)
        .parents(false)
        .add_custom_ignore_filename(".dockerignore")
        .build();

    let mut files: Vec<(String, String)> = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(context)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let content = fs::read(entry.path())?;
        files.push((relative, hex::encode(Sha256::digest(&content))));
    }
    files.sort();

    let mut hasher = Sha256::new();
    for (path, digest) in files {
        hasher.update(format!("{path}:{digest}\n"));
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Images named by `FROM` instructions, stage references included.
pub fn base_images(dockerfile: &str) -> Vec<String> {
    dockerfile
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            let keyword = words.next()?;
            if !keyword.eq_ignore_ascii_case("FROM") {
                return None;
            }
            words.find(|w| !w.starts_with("--")).map(str::to_string)
        })
        .collect()
}

/// Image reference used when a target does not name one.
pub fn default_image(registry: &str, namespace: &str, stack: &str, target: &str, fp: &Fingerprint) -> String {
    format!(
        "{}/{}/{}-{}:{}",
        registry.trim_end_matches('/'),
        namespace,
        stack,
        deckhand_core::naming::sanitize_name(target),
        fp.short()
    )
}
