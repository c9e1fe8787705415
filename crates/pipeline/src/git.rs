//! Best-effort source control metadata for run records and fingerprints.

use std::path::Path;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitInfo {
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub commit: Option<String>,
}

async fn git(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}

/// Missing git, or a directory outside any repository, yields empty fields.
pub async fn detect(dir: &Path) -> GitInfo {
    let info = GitInfo {
        commit: git(dir, &["rev-parse", "HEAD"]).await,
        branch: git(dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await,
        repository: git(dir, &["config", "--get", "remote.origin.url"]).await,
    };
    debug!(commit = ?info.commit, branch = ?info.branch, "Detected git metadata");
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_outside_repository_is_empty() {
        let dir = TempDir::new().unwrap();
        let info = detect(dir.path()).await;
        assert!(info.commit.is_none());
        assert!(info.repository.is_none());
    }
}
