//! Docker-backed container runtime using bollard.
//!
//! Also drives Podman through its docker-compatible socket; the daemon is
//! selected by `DOCKER_HOST` or the platform default socket.

use std::{collections::HashMap, path::Path, time::Duration};

use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{ContainerCreateBody, ContainerStateStatusEnum, HostConfig};
use bollard::query_parameters::{
    BuildImageOptions, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    LogsOptions, RemoveContainerOptions, RemoveImageOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::Docker;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::{DcsandboxError, DcsandboxResult};

use super::{
    ContainerInfo, ContainerRuntime, ContainerSpec, ContainerState, ContainerSummary, ExecOutput,
    LogOptions, LogStream,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Container runtime backed by a local Docker-compatible daemon.
pub struct DockerRuntime {
    docker: Docker,
}

impl std::fmt::Debug for DockerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerRuntime").finish_non_exhaustive()
    }
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DockerRuntime {
    /// Connects to the local daemon and verifies it responds.
    pub async fn connect() -> DcsandboxResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| runtime_err("connect", e))?;

        docker.ping().await.map_err(|e| runtime_err("ping", e))?;

        tracing::info!("connected to container daemon");
        Ok(Self { docker })
    }

    /// Wraps a pre-configured bollard client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn runtime_err(operation: &str, error: impl std::fmt::Display) -> DcsandboxError {
    DcsandboxError::Runtime {
        operation: operation.to_string(),
        message: error.to_string(),
    }
}

/// Packs a build context directory into an uncompressed tar archive.
async fn pack_context(context_dir: &Path) -> DcsandboxResult<Vec<u8>> {
    let dir = context_dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut builder = tar::Builder::new(Vec::new());
        builder.append_dir_all(".", &dir)?;
        builder.into_inner().map_err(Into::into)
    })
    .await
    .map_err(|e| DcsandboxError::WorkspaceSetup(format!("tar task failed: {}", e)))?
}

fn build_host_config(spec: &ContainerSpec) -> HostConfig {
    let binds: Vec<String> = spec
        .binds
        .iter()
        .map(|b| format!("{}:{}", b.host.display(), b.container))
        .collect();

    HostConfig {
        binds: if binds.is_empty() { None } else { Some(binds) },
        memory: (spec.memory_bytes > 0).then(|| spec.memory_bytes as i64),
        nano_cpus: (spec.nano_cpus > 0).then_some(spec.nano_cpus),
        network_mode: Some(spec.network.clone()),
        auto_remove: Some(false),
        ..Default::default()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait::async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn build_image(&self, context_dir: &Path, tag: &str) -> DcsandboxResult<()> {
        let context = pack_context(context_dir).await?;

        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: Some(tag.to_string()),
            rm: true,
            ..Default::default()
        };

        tracing::info!(tag = %tag, context = %context_dir.display(), "building image");

        let mut stream = self.docker.build_image(
            options,
            None,
            Some(bollard::body_full(bytes::Bytes::from(context))),
        );

        while let Some(result) = stream.next().await {
            match result {
                Result::Ok(info) => {
                    if let Some(error) = info.error {
                        return Err(DcsandboxError::BuildFailed(error));
                    }
                    if let Some(line) = info.stream {
                        let line = line.trim_end();
                        if !line.is_empty() {
                            tracing::debug!(tag = %tag, "build: {}", line);
                        }
                    }
                }
                Result::Err(e) => return Err(DcsandboxError::BuildFailed(e.to_string())),
            }
        }

        tracing::info!(tag = %tag, "image built");
        Ok(())
    }

    async fn remove_image(&self, tag: &str) -> DcsandboxResult<()> {
        self.docker
            .remove_image(tag, None::<RemoveImageOptions>, None)
            .await
            .map_err(|e| runtime_err("remove_image", e))?;
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> DcsandboxResult<String> {
        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .exposed_ports
            .iter()
            .map(|p| (format!("{}/tcp", p), HashMap::new()))
            .collect();

        let config = ContainerCreateBody {
            image: Some(spec.image.clone()),
            env: if env.is_empty() { None } else { Some(env) },
            working_dir: spec.workdir.as_ref().map(|w| w.to_string()),
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            labels: if spec.labels.is_empty() {
                None
            } else {
                Some(spec.labels.clone())
            },
            host_config: Some(build_host_config(spec)),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: Some(spec.name.clone()),
            platform: String::new(),
        };

        tracing::info!(container = %spec.name, image = %spec.image, "creating container");

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| runtime_err("create_container", e))?;

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> DcsandboxResult<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|e| runtime_err("start_container", e))?;
        Ok(())
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> DcsandboxResult<()> {
        let options = StopContainerOptions {
            t: Some(grace.as_secs() as i32),
            signal: None,
        };

        self.docker
            .stop_container(id, Some(options))
            .await
            .map_err(|e| runtime_err("stop_container", e))?;
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> DcsandboxResult<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };

        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| runtime_err("remove_container", e))?;
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> DcsandboxResult<ContainerInfo> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| runtime_err("inspect_container", e))?;

        let state = match inspect.state.as_ref().and_then(|s| s.status) {
            Some(ContainerStateStatusEnum::CREATED) => ContainerState::Created,
            Some(ContainerStateStatusEnum::RUNNING)
            | Some(ContainerStateStatusEnum::PAUSED)
            | Some(ContainerStateStatusEnum::RESTARTING) => ContainerState::Running,
            Some(ContainerStateStatusEnum::EXITED) => ContainerState::Exited(
                inspect
                    .state
                    .as_ref()
                    .and_then(|s| s.exit_code)
                    .unwrap_or(0),
            ),
            _ => ContainerState::Dead,
        };

        Ok(ContainerInfo {
            id: inspect.id.unwrap_or_else(|| id.to_string()),
            state,
        })
    }

    async fn exec(
        &self,
        id: &str,
        argv: &[String],
        stdin: Option<Vec<u8>>,
        workdir: Option<&str>,
    ) -> DcsandboxResult<ExecOutput> {
        let exec_options = CreateExecOptions {
            cmd: Some(argv.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            attach_stdin: Some(stdin.is_some()),
            working_dir: workdir.map(str::to_string),
            ..Default::default()
        };

        let created = self
            .docker
            .create_exec(id, exec_options)
            .await
            .map_err(|e| runtime_err("create_exec", e))?;

        let started = self
            .docker
            .start_exec(&created.id, None)
            .await
            .map_err(|e| runtime_err("start_exec", e))?;

        let mut collected = String::new();

        match started {
            StartExecResults::Attached { mut output, mut input } => {
                if let Some(bytes) = stdin {
                    input
                        .write_all(&bytes)
                        .await
                        .map_err(|e| runtime_err("exec_stdin", e))?;
                    input
                        .shutdown()
                        .await
                        .map_err(|e| runtime_err("exec_stdin", e))?;
                }

                while let Some(result) = output.next().await {
                    match result {
                        Result::Ok(chunk) => {
                            collected.push_str(&String::from_utf8_lossy(&chunk.into_bytes()));
                        }
                        Result::Err(e) => {
                            tracing::warn!(error = %e, "error reading exec output");
                        }
                    }
                }
            }
            StartExecResults::Detached => {
                tracing::warn!("exec started detached unexpectedly");
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&created.id)
            .await
            .map_err(|e| runtime_err("inspect_exec", e))?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(0),
            output: collected,
        })
    }

    async fn logs(&self, id: &str, options: LogOptions) -> DcsandboxResult<LogStream> {
        let logs_options = LogsOptions {
            stdout: true,
            stderr: true,
            follow: options.follow,
            tail: options
                .tail_lines
                .map_or_else(|| "all".to_string(), |n| n.to_string()),
            ..Default::default()
        };

        let mut raw = self.docker.logs(id, Some(logs_options));

        let stream = async_stream::stream! {
            while let Some(result) = raw.next().await {
                match result {
                    Result::Ok(output) => {
                        for line in output.to_string().split_inclusive('\n') {
                            yield Result::Ok(line.trim_end_matches('\n').to_string());
                        }
                    }
                    Result::Err(e) => {
                        yield Result::Err(runtime_err("logs", e));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn list_containers(&self, label: Option<&str>) -> DcsandboxResult<Vec<ContainerSummary>> {
        let filters = label.map(|key| {
            let mut map: HashMap<String, Vec<String>> = HashMap::new();
            map.insert("label".to_string(), vec![key.to_string()]);
            map
        });

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let rows = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| runtime_err("list_containers", e))?;

        Ok(rows
            .into_iter()
            .map(|row| ContainerSummary {
                id: row.id.unwrap_or_default(),
                name: row
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default(),
                state: row
                    .state
                    .map(|s| format!("{:?}", s).to_lowercase())
                    .unwrap_or_default(),
            })
            .collect())
    }
}
