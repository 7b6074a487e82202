//! In-memory container runtime for tests.
//!
//! Tracks images and containers in maps and interprets the tiny exec
//! vocabulary the built-in MCP tools rely on (`cat`, `tee`, `mkdir`,
//! `/bin/bash -c`) against a per-container file map, so engine and broker
//! tests run without a daemon.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    time::Duration,
};

use tokio::sync::Mutex;

use crate::{DcsandboxError, DcsandboxResult};

use super::{
    ContainerInfo, ContainerRuntime, ContainerSpec, ContainerState, ContainerSummary, ExecOutput,
    LogOptions, LogStream,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An in-memory fake of the container runtime.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

#[derive(Debug, Default)]
struct FakeState {
    images: HashSet<String>,
    containers: HashMap<String, FakeContainer>,
    next_id: u64,
    fail_next: HashSet<String>,
    shell_responses: HashMap<String, (i64, String)>,
}

/// A fake container's bookkeeping.
#[derive(Debug, Clone)]
pub struct FakeContainer {
    /// The assigned container id.
    pub id: String,

    /// The container name from the spec.
    pub name: String,

    /// The creating spec.
    pub spec: ContainerSpec,

    /// The current state.
    pub state: ContainerState,

    /// The in-container file map, keyed by absolute path.
    pub files: HashMap<String, String>,

    /// Captured log lines.
    pub logs: Vec<String>,

    /// Every exec argv seen, in order.
    pub exec_history: Vec<Vec<String>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FakeRuntime {
    /// Creates an empty fake runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call of the named operation fail.
    pub async fn fail_next(&self, operation: &str) {
        self.state
            .lock()
            .await
            .fail_next
            .insert(operation.to_string());
    }

    /// Scripts the reply for a `/bin/bash -c` command.
    pub async fn script_shell(&self, command: &str, exit_code: i64, output: &str) {
        self.state
            .lock()
            .await
            .shell_responses
            .insert(command.to_string(), (exit_code, output.to_string()));
    }

    /// Returns a snapshot of the container with the given id, if any.
    pub async fn container(&self, id: &str) -> Option<FakeContainer> {
        self.state.lock().await.containers.get(id).cloned()
    }

    /// Returns a snapshot of the container with the given name, if any.
    pub async fn container_by_name(&self, name: &str) -> Option<FakeContainer> {
        self.state
            .lock()
            .await
            .containers
            .values()
            .find(|c| c.name == name)
            .cloned()
    }

    /// Returns whether an image with the given tag exists.
    pub async fn has_image(&self, tag: &str) -> bool {
        self.state.lock().await.images.contains(tag)
    }

    /// Simulates the container disappearing behind the engine's back.
    pub async fn kill_externally(&self, id: &str) {
        self.state.lock().await.containers.remove(id);
    }

    /// Appends a log line to a container.
    pub async fn push_log(&self, id: &str, line: &str) {
        if let Some(container) = self.state.lock().await.containers.get_mut(id) {
            container.logs.push(line.to_string());
        }
    }

    async fn check_failure(&self, operation: &str) -> DcsandboxResult<()> {
        if self.state.lock().await.fail_next.remove(operation) {
            return Err(DcsandboxError::Runtime {
                operation: operation.to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn missing(id: &str, operation: &str) -> DcsandboxError {
    DcsandboxError::Runtime {
        operation: operation.to_string(),
        message: format!("no such container: {}", id),
    }
}

/// Interprets one exec against the container's file map.
fn interpret_exec(
    container: &mut FakeContainer,
    argv: &[String],
    stdin: Option<Vec<u8>>,
    shell_responses: &HashMap<String, (i64, String)>,
) -> ExecOutput {
    let strs: Vec<&str> = argv.iter().map(String::as_str).collect();
    match strs.as_slice() {
        ["cat", path] => match container.files.get(*path) {
            Some(contents) => ExecOutput {
                exit_code: 0,
                output: contents.clone(),
            },
            None => ExecOutput {
                exit_code: 1,
                output: format!("cat: {}: No such file or directory", path),
            },
        },
        ["mkdir", "-p", _path] => ExecOutput {
            exit_code: 0,
            output: String::new(),
        },
        ["tee", path] => {
            let contents = String::from_utf8_lossy(&stdin.unwrap_or_default()).to_string();
            container.files.insert(path.to_string(), contents.clone());
            ExecOutput {
                exit_code: 0,
                output: contents,
            }
        }
        ["/bin/bash", "-c", command] => {
            if let Some((code, output)) = shell_responses.get(*command) {
                ExecOutput {
                    exit_code: *code,
                    output: output.clone(),
                }
            } else if let Some(rest) = command.strip_prefix("echo ") {
                ExecOutput {
                    exit_code: 0,
                    output: format!("{}\n", rest),
                }
            } else {
                ExecOutput {
                    exit_code: 0,
                    output: String::new(),
                }
            }
        }
        _ => ExecOutput {
            exit_code: 127,
            output: format!("fake runtime: unhandled argv {:?}", argv),
        },
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait::async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn build_image(&self, _context_dir: &Path, tag: &str) -> DcsandboxResult<()> {
        self.check_failure("build_image").await?;
        self.state.lock().await.images.insert(tag.to_string());
        Ok(())
    }

    async fn remove_image(&self, tag: &str) -> DcsandboxResult<()> {
        self.check_failure("remove_image").await?;
        self.state.lock().await.images.remove(tag);
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> DcsandboxResult<String> {
        self.check_failure("create_container").await?;
        let mut state = self.state.lock().await;

        if !state.images.contains(&spec.image) {
            return Err(DcsandboxError::Runtime {
                operation: "create_container".to_string(),
                message: format!("no such image: {}", spec.image),
            });
        }

        state.next_id += 1;
        let id = format!("fake{:08x}", state.next_id);
        state.containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                name: spec.name.clone(),
                spec: spec.clone(),
                state: ContainerState::Created,
                files: HashMap::new(),
                logs: Vec::new(),
                exec_history: Vec::new(),
            },
        );

        Ok(id)
    }

    async fn start_container(&self, id: &str) -> DcsandboxResult<()> {
        self.check_failure("start_container").await?;
        let mut state = self.state.lock().await;
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| missing(id, "start_container"))?;
        container.state = ContainerState::Running;
        Ok(())
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> DcsandboxResult<()> {
        self.check_failure("stop_container").await?;
        let mut state = self.state.lock().await;
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| missing(id, "stop_container"))?;
        container.state = ContainerState::Exited(0);
        Ok(())
    }

    async fn remove_container(&self, id: &str, _force: bool) -> DcsandboxResult<()> {
        self.check_failure("remove_container").await?;
        let mut state = self.state.lock().await;
        state
            .containers
            .remove(id)
            .ok_or_else(|| missing(id, "remove_container"))?;
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> DcsandboxResult<ContainerInfo> {
        let state = self.state.lock().await;
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| missing(id, "inspect_container"))?;
        Ok(ContainerInfo {
            id: container.id.clone(),
            state: container.state.clone(),
        })
    }

    async fn exec(
        &self,
        id: &str,
        argv: &[String],
        stdin: Option<Vec<u8>>,
        _workdir: Option<&str>,
    ) -> DcsandboxResult<ExecOutput> {
        self.check_failure("exec").await?;
        let mut state = self.state.lock().await;
        let shell_responses = state.shell_responses.clone();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| missing(id, "exec"))?;

        if container.state != ContainerState::Running {
            return Err(DcsandboxError::Runtime {
                operation: "exec".to_string(),
                message: format!("container {} is not running", id),
            });
        }

        container.exec_history.push(argv.to_vec());
        Ok(interpret_exec(container, argv, stdin, &shell_responses))
    }

    async fn logs(&self, id: &str, options: LogOptions) -> DcsandboxResult<LogStream> {
        let state = self.state.lock().await;
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| missing(id, "logs"))?;

        let mut lines = container.logs.clone();
        if let Some(tail) = options.tail_lines {
            if lines.len() > tail {
                lines = lines.split_off(lines.len() - tail);
            }
        }

        Ok(Box::pin(futures::stream::iter(
            lines.into_iter().map(Result::Ok),
        )))
    }

    async fn list_containers(&self, label: Option<&str>) -> DcsandboxResult<Vec<ContainerSummary>> {
        let state = self.state.lock().await;
        Ok(state
            .containers
            .values()
            .filter(|c| label.is_none_or(|key| c.spec.labels.contains_key(key)))
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                name: c.name.clone(),
                state: match c.state {
                    ContainerState::Created => "created".to_string(),
                    ContainerState::Running => "running".to_string(),
                    ContainerState::Exited(_) => "exited".to_string(),
                    ContainerState::Dead => "dead".to_string(),
                },
            })
            .collect())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
