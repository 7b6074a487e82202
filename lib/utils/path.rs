use std::path::PathBuf;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The directory under the user's home where sandbox state lives.
pub const DCSANDBOX_HOME_DIR: &str = ".dcsandbox";

/// The directory under the user's config dir holding dcsandbox configuration.
pub const DCSANDBOX_CONFIG_DIR: &str = "dcsandbox";

/// The global configuration filename.
pub const CONFIG_FILENAME: &str = "config.yaml";

/// The sub directory holding custom template files.
pub const TEMPLATES_SUBDIR: &str = "templates";

/// The sub directory holding one directory per sandbox.
pub const SANDBOXES_SUBDIR: &str = "sandboxes";

/// The sub directory holding shallow git clones, keyed by sandbox id.
pub const GIT_CACHE_SUBDIR: &str = "git-cache";

/// The per-sandbox record filename.
pub const RECORD_FILENAME: &str = "config.json";

/// The per-sandbox workspace directory, bind-mounted into the container.
pub const WORKSPACE_SUBDIR: &str = "workspace";

/// The synthesized build recipe filename.
pub const DOCKERFILE_FILENAME: &str = "Dockerfile";

/// The synthesized devcontainer descriptor, relative to the sandbox directory.
pub const DEVCONTAINER_SUBDIR: &str = ".devcontainer";

/// The devcontainer descriptor filename.
pub const DEVCONTAINER_FILENAME: &str = "devcontainer.json";

/// The per-sandbox PID file naming the process serving its MCP endpoint.
pub const SERVE_PID_FILENAME: &str = "serve.pid";

/// The mount point of the workspace inside the container.
pub const CONTAINER_WORKSPACE_DIR: &str = "/workspace";

/// Prefix for image tags owned by dcsandbox.
pub const IMAGE_TAG_PREFIX: &str = "dcsandbox";

/// Prefix for container names owned by dcsandbox.
pub const CONTAINER_NAME_PREFIX: &str = "dcsandbox";

/// Label attached to every container dcsandbox creates.
pub const SANDBOX_LABEL: &str = "io.dcsandbox.id";

/// The environment variable that overrides the dcsandbox home path.
pub const DCSANDBOX_HOME_ENV_VAR: &str = "DCSANDBOX_HOME";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the path where all dcsandbox state (sandboxes, git cache) is stored.
pub fn dcsandbox_home_path() -> PathBuf {
    if let Result::Ok(home) = std::env::var(DCSANDBOX_HOME_ENV_VAR) {
        PathBuf::from(home)
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DCSANDBOX_HOME_DIR)
    }
}

/// Returns the path of the dcsandbox configuration directory.
pub fn dcsandbox_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DCSANDBOX_CONFIG_DIR)
}

/// Returns the image tag for a sandbox id.
pub fn image_tag(id: &str) -> String {
    format!("{}:{}", IMAGE_TAG_PREFIX, id)
}

/// Returns the container name for a sandbox id.
pub fn container_name(id: &str) -> String {
    format!("{}-{}", CONTAINER_NAME_PREFIX, id)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_and_container_naming() {
        assert_eq!(image_tag("ab12cd34ef"), "dcsandbox:ab12cd34ef");
        assert_eq!(container_name("ab12cd34ef"), "dcsandbox-ab12cd34ef");
    }
}
