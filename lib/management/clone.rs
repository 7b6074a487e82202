//! Shallow git clones into the per-sandbox cache.

use std::path::Path;

use tokio::{fs, process::Command};

use crate::{DcsandboxError, DcsandboxResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Clones `url` at `branch` into `dest` as a shallow, single-branch clone.
///
/// A leftover directory from a previous failed attempt with the same id is
/// wiped first.
pub async fn clone_repository(url: &str, branch: &str, dest: &Path) -> DcsandboxResult<()> {
    if dest.exists() {
        tracing::debug!(dest = %dest.display(), "wiping stale clone directory");
        fs::remove_dir_all(dest).await?;
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }

    tracing::info!(url = %url, branch = %branch, "cloning repository");

    let output = Command::new("git")
        .arg("clone")
        .arg("--depth")
        .arg("1")
        .arg("--single-branch")
        .arg("--branch")
        .arg(branch)
        .arg(url)
        .arg(dest)
        .output()
        .await
        .map_err(|e| DcsandboxError::CloneFailed {
            url: url.to_string(),
            message: format!("failed to run git: {}", e),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        // Leave no half-clone behind for the retry path.
        let _ = fs::remove_dir_all(dest).await;
        return Err(DcsandboxError::CloneFailed {
            url: url.to_string(),
            message: stderr.trim().to_string(),
        });
    }

    Ok(())
}

/// Derives a sandbox name from a repository URL's basename.
pub fn repository_basename(url: &str) -> Option<String> {
    let trimmed = url.trim_end_matches('/');
    let base = trimmed.rsplit('/').next()?;
    let base = base.strip_suffix(".git").unwrap_or(base);
    if base.is_empty() {
        None
    } else {
        Some(base.to_string())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_repository_basename() {
        assert_eq!(
            repository_basename("https://github.com/acme/widget.git").as_deref(),
            Some("widget")
        );
        assert_eq!(
            repository_basename("https://github.com/acme/widget").as_deref(),
            Some("widget")
        );
        assert_eq!(
            repository_basename("git@host:acme/widget.git/").as_deref(),
            Some("widget")
        );
        assert_eq!(repository_basename(""), None);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_clone_failed() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("clone");

        let err = clone_repository("https://example.invalid/x.git", "main", &dest)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CLONE_FAILED");
        assert!(!dest.exists(), "failed clone must not leave a directory");
    }
}
