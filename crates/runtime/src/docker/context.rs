//! Tar archive of a build context, as the Docker build endpoint expects it.

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use std::path::Path;

/// Archives `context`, honouring its `.dockerignore`. The Dockerfile is
/// always included, even when an ignore rule matches it.
pub fn archive(context: &Path, dockerfile: &Path) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);

    let walker = WalkBuilder::new(context)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .parents(false)
        .add_custom_ignore_filename(".dockerignore")
        .build();

    let mut has_dockerfile = false;
    for entry in walker {
        let entry = entry.context("Failed to walk build context")?;
        let path = entry.path();
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let rel = path
            .strip_prefix(context)
            .with_context(|| format!("{} is outside the build context", path.display()))?;
        if rel == dockerfile {
            has_dockerfile = true;
        }
        builder
            .append_path_with_name(path, rel)
            .with_context(|| format!("Failed to add {} to build context", rel.display()))?;
    }

    if !has_dockerfile {
        let path = context.join(dockerfile);
        builder
            .append_path_with_name(&path, dockerfile)
            .with_context(|| format!("Failed to add {} to build context", path.display()))?;
    }

    builder.into_inner().context("Failed to finish build context archive")
}
