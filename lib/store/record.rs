//! The persisted sandbox record and its embedded value types.

use std::{collections::HashMap, fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A sandbox record, the single persisted entity. One `config.json` per
/// sandbox directory.
///
/// After the initial write, only `status`, `container_id`, and the bound MCP
/// port change; every mutation happens under the engine's per-sandbox lock
/// and ends with an atomic rewrite of the record file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxRecord {
    /// The unique identifier for the sandbox; also its directory key.
    pub id: String,

    /// The human-visible name, unique across active records.
    pub name: String,

    /// The current lifecycle status.
    pub status: SandboxStatus,

    /// When the sandbox was created.
    pub created_at: DateTime<Utc>,

    /// The template name resolved at create time; never changes.
    pub template: String,

    /// The git source the workspace was cloned from, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSource>,

    /// MCP proxy settings and capability server roster.
    pub mcp: McpSettings,

    /// Resource limits enforced on the container.
    pub resources: Resources,

    /// The runtime-assigned container id; absent until after runtime create.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
}

/// The lifecycle status of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    /// The record exists but create has not finished.
    Creating,

    /// The container is running and the MCP endpoint is serving.
    Running,

    /// The container is stopped; no MCP port is held.
    Stopped,

    /// A create step failed or the container disappeared externally.
    Error,
}

/// A git source recorded on the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    /// The repository URL.
    pub url: String,

    /// The branch that was cloned.
    pub branch: String,

    /// Where the shallow clone lives inside the git cache.
    pub clone_path: PathBuf,
}

/// MCP settings embedded in a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpSettings {
    /// Whether an MCP endpoint is served for this sandbox.
    pub enabled: bool,

    /// The capability servers to spawn, in order.
    pub servers: Vec<CapabilityServerSpec>,

    /// The bound host port while the sandbox is running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// A capability server child process specification. Immutable once embedded
/// in a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityServerSpec {
    /// The routing name, e.g. `filesystem`, `shell`, `git`.
    pub name: String,

    /// The executable to spawn.
    pub command: String,

    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment for the child.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Whether the server is spawned at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Resource limits enforced on a sandbox container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    /// Memory limit in bytes.
    pub memory_bytes: u64,

    /// CPU limit in millicores.
    pub cpu_millicores: u32,

    /// Disk budget in bytes.
    pub disk_bytes: u64,

    /// Sandbox lifetime in seconds; 0 means exempt from the reaper.
    pub timeout_seconds: u64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SandboxRecord {
    /// Checks the §3 record invariants, returning the first violation.
    pub fn check_invariants(&self) -> Result<(), String> {
        match self.status {
            SandboxStatus::Running => {
                if self.container_id.is_none() {
                    return Err("running record without containerId".to_string());
                }
                if self.mcp.enabled && self.mcp.port.is_none() {
                    return Err("running record without mcpPort".to_string());
                }
            }
            SandboxStatus::Stopped => {
                if self.mcp.port.is_some() {
                    return Err("stopped record still holds an mcpPort".to_string());
                }
            }
            _ => {}
        }
        Result::Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SandboxStatus::Creating => "creating",
            SandboxStatus::Running => "running",
            SandboxStatus::Stopped => "stopped",
            SandboxStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
