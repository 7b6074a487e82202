//! Capability abstraction over a local container runtime.
//!
//! Every runtime call the lifecycle engine makes goes through the
//! [`ContainerRuntime`] trait so the engine can be exercised against the
//! in-memory [`FakeRuntime`] in tests. The production implementation is
//! [`DockerRuntime`], speaking to the Docker (or Podman docker-compatible)
//! socket.

mod docker;
mod fake;

use std::{collections::HashMap, path::Path, pin::Pin, time::Duration};

use futures::Stream;
use typed_path::Utf8UnixPathBuf;

use crate::DcsandboxResult;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use docker::*;
pub use fake::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A stream of decoded container log lines.
pub type LogStream = Pin<Box<dyn Stream<Item = DcsandboxResult<String>> + Send>>;

/// Everything the engine specifies when creating a container.
///
/// Containers are never auto-removed; the engine owns removal so crash
/// recovery can observe leftovers.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// The image to run.
    pub image: String,

    /// The container name.
    pub name: String,

    /// The working directory inside the container.
    pub workdir: Option<Utf8UnixPathBuf>,

    /// Environment variables.
    pub env: HashMap<String, String>,

    /// Bind mounts.
    pub binds: Vec<BindMount>,

    /// Memory limit in bytes; 0 means unlimited.
    pub memory_bytes: u64,

    /// CPU limit in nano-CPUs; 0 means unlimited.
    pub nano_cpus: i64,

    /// The network mode, e.g. `bridge`.
    pub network: String,

    /// TCP ports the container exposes.
    pub exposed_ports: Vec<u16>,

    /// Labels attached to the container.
    pub labels: HashMap<String, String>,
}

/// A host-to-container bind mount.
#[derive(Debug, Clone)]
pub struct BindMount {
    /// The host path.
    pub host: std::path::PathBuf,

    /// The mount point inside the container.
    pub container: Utf8UnixPathBuf,
}

/// Options for a log request.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    /// Whether to keep streaming new output.
    pub follow: bool,

    /// How many trailing lines to start from; `None` means all.
    pub tail_lines: Option<usize>,
}

/// The observable state of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    /// Created but not started.
    Created,

    /// Running.
    Running,

    /// Exited with a code.
    Exited(i64),

    /// The runtime reports the container dead or unknown.
    Dead,
}

/// A container inspection result.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    /// The runtime-assigned container id.
    pub id: String,

    /// The container's current state.
    pub state: ContainerState,
}

/// A row from a container listing.
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    /// The runtime-assigned container id.
    pub id: String,

    /// The container name.
    pub name: String,

    /// The raw state string the runtime reports.
    pub state: String,
}

/// The collected output of an exec.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// The command's exit code.
    pub exit_code: i64,

    /// Combined stdout and stderr, in arrival order.
    pub output: String,
}

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// The minimum container runtime surface the lifecycle engine uses.
#[async_trait::async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Builds an image from a context directory and tags it.
    async fn build_image(&self, context_dir: &Path, tag: &str) -> DcsandboxResult<()>;

    /// Removes an image by tag. Best-effort cleanup path.
    async fn remove_image(&self, tag: &str) -> DcsandboxResult<()>;

    /// Creates a container and returns the runtime-assigned id.
    async fn create_container(&self, spec: &ContainerSpec) -> DcsandboxResult<String>;

    /// Starts a created container.
    async fn start_container(&self, id: &str) -> DcsandboxResult<()>;

    /// Stops a running container, giving it a grace period before the kill.
    async fn stop_container(&self, id: &str, grace: Duration) -> DcsandboxResult<()>;

    /// Removes a container.
    async fn remove_container(&self, id: &str, force: bool) -> DcsandboxResult<()>;

    /// Inspects a container.
    async fn inspect_container(&self, id: &str) -> DcsandboxResult<ContainerInfo>;

    /// Runs a command inside a running container and collects its output.
    async fn exec(
        &self,
        id: &str,
        argv: &[String],
        stdin: Option<Vec<u8>>,
        workdir: Option<&str>,
    ) -> DcsandboxResult<ExecOutput>;

    /// Streams container logs.
    async fn logs(&self, id: &str, options: LogOptions) -> DcsandboxResult<LogStream>;

    /// Lists containers, optionally filtered by a label key.
    async fn list_containers(&self, label: Option<&str>) -> DcsandboxResult<Vec<ContainerSummary>>;
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ContainerState {
    /// Returns whether the container counts as alive for record recovery.
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }
}
