//! Global configuration types and loading.

use std::path::{Path, PathBuf};

use getset::Getters;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{
    config::{
        DEFAULT_CPUS, DEFAULT_DISK, DEFAULT_INACTIVE_TIMEOUT, DEFAULT_MEMORY, DEFAULT_NETWORK,
        DEFAULT_PORT_RANGE, DEFAULT_PROXY_HOST, DEFAULT_TIMEOUT_MINUTES,
    },
    DcsandboxResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The global dcsandbox configuration, read from `config.yaml`.
///
/// Every field has a default; a missing file or a file with only some keys
/// set both yield a usable configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default, rename_all = "camelCase")]
pub struct GlobalConfig {
    /// Default resource limits for new sandboxes.
    defaults: DefaultsConfig,

    /// Container runtime selection and networking.
    container: ContainerConfig,

    /// MCP proxy host and port range.
    mcp: McpConfig,

    /// Cleanup policy for inactive sandboxes.
    cleanup: CleanupConfig,

    /// Template lookup configuration.
    templates: TemplatesConfig,
}

/// Default resource limits applied when the CLI omits a flag.
#[derive(Debug, Clone, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default, rename_all = "camelCase")]
pub struct DefaultsConfig {
    /// Memory limit string, e.g. `2G`.
    memory: String,

    /// CPU count.
    cpu: f64,

    /// Disk budget string, e.g. `10G`.
    disk: String,

    /// Sandbox timeout in minutes.
    timeout: u64,

    /// Whether stopped sandboxes are removed automatically on exit.
    auto_cleanup: bool,
}

/// Container runtime selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default, rename_all = "camelCase")]
pub struct ContainerConfig {
    /// Which local container runtime to drive.
    runtime: RuntimeKind,

    /// Network mode passed to the runtime.
    network: Network,
}

/// The supported local container runtimes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// The Docker daemon.
    #[default]
    Docker,

    /// Podman through its docker-compatible socket.
    Podman,
}

/// Newtype for the container network mode so the default is `bridge`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network(
    /// The network mode string passed to the runtime.
    pub String,
);

/// MCP proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default, rename_all = "camelCase")]
pub struct McpConfig {
    /// The host the per-sandbox WebSocket listeners bind to.
    proxy_host: String,

    /// Inclusive port range the proxy allocates from.
    port_range: (u16, u16),
}

/// Cleanup policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default, rename_all = "camelCase")]
pub struct CleanupConfig {
    /// How long a sandbox may sit idle before the reaper stops it, as
    /// `N{s,m,h,d}`.
    inactive_timeout: String,

    /// Whether to clean up sandboxes when the host process exits.
    on_exit: bool,

    /// Whether explicitly named sandboxes are exempt from cleanup.
    preserve_named: bool,
}

/// Template lookup configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default, rename_all = "camelCase")]
pub struct TemplatesConfig {
    /// Directory of custom templates that shadow the built-ins. Defaults to
    /// `<config>/dcsandbox/templates/` when unset.
    custom_path: Option<PathBuf>,

    /// Whether built-in templates are refreshed automatically.
    auto_update: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl GlobalConfig {
    /// Loads the configuration from the given path, falling back to defaults
    /// when the file does not exist.
    pub async fn load(path: impl AsRef<Path>) -> DcsandboxResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("no config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).await?;
        let config: GlobalConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            memory: DEFAULT_MEMORY.to_string(),
            cpu: DEFAULT_CPUS,
            disk: DEFAULT_DISK.to_string(),
            timeout: DEFAULT_TIMEOUT_MINUTES,
            auto_cleanup: true,
        }
    }
}

impl Default for Network {
    fn default() -> Self {
        Network(DEFAULT_NETWORK.to_string())
    }
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            proxy_host: DEFAULT_PROXY_HOST.to_string(),
            port_range: DEFAULT_PORT_RANGE,
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            inactive_timeout: DEFAULT_INACTIVE_TIMEOUT.to_string(),
            on_exit: false,
            preserve_named: true,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
