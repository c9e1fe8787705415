use super::raw::RawManifest;
use super::{Manifest, ManifestError};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File names probed, in order, when only a directory is given.
pub const MANIFEST_FILE_NAMES: &[&str] = &["deckhand.yml", "deckhand.yaml", ".deckhand/deckhand.yml"];

/// Finds the manifest inside `dir`.
pub fn discover(dir: &Path) -> Result<PathBuf, ManifestError> {
    MANIFEST_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| ManifestError::NotFound {
            dir: dir.to_path_buf(),
        })
}

/// Reads a manifest from a file, or from the discovered file when `path` is a
/// directory.
pub fn load(path: &Path) -> Result<Manifest, ManifestError> {
    let file = if path.is_dir() {
        discover(path)?
    } else {
        path.to_path_buf()
    };
    let file = file.canonicalize().map_err(|source| ManifestError::Io {
        path: file.clone(),
        source,
    })?;

    let content = std::fs::read_to_string(&file).map_err(|source| ManifestError::Io {
        path: file.clone(),
        source,
    })?;
    debug!(path = %file.display(), bytes = content.len(), "Read manifest");

    load_from_str(&content, &file)
}

/// Parses manifest text as if it had been read from `path`.
pub fn load_from_str(content: &str, path: &Path) -> Result<Manifest, ManifestError> {
    let raw: RawManifest = if content.trim().is_empty() {
        serde_yaml::from_str("{}")
    } else {
        serde_yaml::from_str(content)
    }
    .map_err(|source| ManifestError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let manifest = raw
        .into_manifest(path)
        .map_err(|message| ManifestError::Invalid {
            path: path.to_path_buf(),
            message,
        })?;

    manifest.build_waves()?;
    Ok(manifest)
}
