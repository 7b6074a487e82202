//! Build-context materialization.
//!
//! Turns a template plus an optional clone into the on-disk context the
//! image build consumes: `workspace/`, a synthesized `Dockerfile`, and a
//! `.devcontainer/devcontainer.json`, written atomically.

use std::path::Path;

use serde_json::json;
use tokio::fs;

use crate::{
    template::Template,
    utils::{
        CONTAINER_WORKSPACE_DIR, DEVCONTAINER_FILENAME, DEVCONTAINER_SUBDIR, DOCKERFILE_FILENAME,
        WORKSPACE_SUBDIR,
    },
    DcsandboxError, DcsandboxResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Known feature names and the Debian packages they install. Features are
/// collected into a single apt layer; unknown names are skipped with a
/// warning.
const FEATURE_PACKAGES: &[(&str, &str)] = &[
    ("git", "git"),
    ("curl", "curl"),
    ("wget", "wget"),
    ("build-essential", "build-essential"),
    ("python3", "python3 python3-pip"),
    ("openssh-client", "openssh-client"),
    ("jq", "jq"),
];

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Materializes the build context for a sandbox.
///
/// ## Arguments
///
/// * `sandbox_dir` - The sandbox's own directory
/// * `clone_dir` - A cloned source tree to seed the workspace from, if any
/// * `template` - The resolved template driving the recipe
/// * `name` - The sandbox name, used in the devcontainer descriptor
pub async fn materialize(
    sandbox_dir: &Path,
    clone_dir: Option<&Path>,
    template: &Template,
    name: &str,
) -> DcsandboxResult<()> {
    let workspace = sandbox_dir.join(WORKSPACE_SUBDIR);
    fs::create_dir_all(&workspace)
        .await
        .map_err(|e| DcsandboxError::WorkspaceSetup(e.to_string()))?;

    if let Some(source) = clone_dir {
        copy_tree(source, &workspace)
            .await
            .map_err(|e| DcsandboxError::WorkspaceSetup(e.to_string()))?;
    }

    write_atomic(
        &sandbox_dir.join(DOCKERFILE_FILENAME),
        synthesize_dockerfile(template).as_bytes(),
    )
    .await?;

    let devcontainer_dir = sandbox_dir.join(DEVCONTAINER_SUBDIR);
    fs::create_dir_all(&devcontainer_dir).await?;
    write_atomic(
        &devcontainer_dir.join(DEVCONTAINER_FILENAME),
        synthesize_devcontainer(template, name).as_bytes(),
    )
    .await?;

    Ok(())
}

/// Synthesizes the Dockerfile for a template.
pub fn synthesize_dockerfile(template: &Template) -> String {
    let mut out = String::new();
    out.push_str(&format!("FROM {}\n\n", template.base_image));

    let packages: Vec<&str> = template
        .features
        .iter()
        .filter_map(|feature| {
            let found = FEATURE_PACKAGES
                .iter()
                .find(|(name, _)| name == feature)
                .map(|(_, pkgs)| *pkgs);
            if found.is_none() {
                tracing::warn!(feature = %feature, "unknown template feature, skipping");
            }
            found
        })
        .collect();

    if !packages.is_empty() {
        out.push_str(&format!(
            "RUN apt-get update \\\n    && apt-get install -y --no-install-recommends {} \\\n    && rm -rf /var/lib/apt/lists/*\n\n",
            packages.join(" ")
        ));
    }

    out.push_str(&format!("WORKDIR {}\n", CONTAINER_WORKSPACE_DIR));
    out.push_str(&format!(
        "COPY {}/ {}/\n\n",
        WORKSPACE_SUBDIR, CONTAINER_WORKSPACE_DIR
    ));

    let mut env_keys: Vec<&String> = template.env.keys().collect();
    env_keys.sort();
    for key in env_keys {
        out.push_str(&format!("ENV {}={}\n", key, template.env[key]));
    }
    if !template.env.is_empty() {
        out.push('\n');
    }

    for port in &template.ports {
        out.push_str(&format!("EXPOSE {}\n", port));
    }
    if !template.ports.is_empty() {
        out.push('\n');
    }

    out.push_str("SHELL [\"/bin/bash\", \"-c\"]\n");
    out.push_str("CMD [\"sleep\", \"infinity\"]\n");
    out
}

/// Synthesizes the devcontainer descriptor for a template.
pub fn synthesize_devcontainer(template: &Template, name: &str) -> String {
    let descriptor = json!({
        "name": name,
        "build": {
            "dockerfile": format!("../{}", DOCKERFILE_FILENAME),
            "context": "..",
        },
        "workspaceFolder": CONTAINER_WORKSPACE_DIR,
        "forwardPorts": template.ports,
        "remoteEnv": template.env,
        "postCreateCommand": template.post_create.join(" && "),
    });
    serde_json::to_string_pretty(&descriptor).unwrap_or_else(|_| "{}".to_string())
}

/// Writes a file via a sibling temp file and rename.
async fn write_atomic(path: &Path, contents: &[u8]) -> DcsandboxResult<()> {
    let temp = path.with_extension("tmp");
    fs::write(&temp, contents).await?;
    fs::rename(&temp, path).await?;
    Ok(())
}

/// Recursively copies a directory tree.
fn copy_tree<'a>(
    from: &'a Path,
    to: &'a Path,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        fs::create_dir_all(to).await?;
        let mut entries = fs::read_dir(from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = to.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                copy_tree(&entry.path(), &target).await?;
            } else {
                fs::copy(entry.path(), &target).await?;
            }
        }
        std::io::Result::Ok(())
    })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::template::TemplateRegistry;

    use super::*;

    #[test]
    fn test_dockerfile_shape() {
        let registry = TemplateRegistry::builtin();
        let dockerfile = synthesize_dockerfile(registry.get("node").unwrap());

        assert!(dockerfile.starts_with("FROM node:20-bookworm\n"));
        assert!(dockerfile.contains("apt-get install -y --no-install-recommends git curl"));
        assert!(dockerfile.contains("WORKDIR /workspace"));
        assert!(dockerfile.contains("COPY workspace/ /workspace/"));
        assert!(dockerfile.contains("ENV NODE_ENV=development"));
        assert!(dockerfile.contains("EXPOSE 3000"));
        assert!(dockerfile.ends_with("CMD [\"sleep\", \"infinity\"]\n"));
    }

    #[tokio::test]
    async fn test_materialize_copies_clone_and_writes_recipes() {
        let temp = TempDir::new().unwrap();
        let clone = temp.path().join("clone");
        std::fs::create_dir_all(clone.join("src")).unwrap();
        std::fs::write(clone.join("src/index.js"), "console.log(1)").unwrap();
        std::fs::write(clone.join("package.json"), "{}").unwrap();

        let sandbox_dir = temp.path().join("sandbox");
        std::fs::create_dir_all(&sandbox_dir).unwrap();

        let registry = TemplateRegistry::builtin();
        materialize(
            &sandbox_dir,
            Some(&clone),
            registry.get("node").unwrap(),
            "demo",
        )
        .await
        .unwrap();

        assert!(sandbox_dir.join("workspace/src/index.js").exists());
        assert!(sandbox_dir.join("workspace/package.json").exists());
        assert!(sandbox_dir.join("Dockerfile").exists());

        let descriptor =
            std::fs::read_to_string(sandbox_dir.join(".devcontainer/devcontainer.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&descriptor).unwrap();
        assert_eq!(parsed["name"], json!("demo"));
        assert_eq!(parsed["workspaceFolder"], json!("/workspace"));
    }

    #[tokio::test]
    async fn test_materialize_without_clone_yields_empty_workspace() {
        let temp = TempDir::new().unwrap();
        let sandbox_dir = temp.path().join("sandbox");
        std::fs::create_dir_all(&sandbox_dir).unwrap();

        let registry = TemplateRegistry::builtin();
        materialize(&sandbox_dir, None, registry.get("base").unwrap(), "empty")
            .await
            .unwrap();

        let workspace = sandbox_dir.join("workspace");
        assert!(workspace.exists());
        assert_eq!(std::fs::read_dir(&workspace).unwrap().count(), 0);
    }
}
