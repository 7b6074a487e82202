//! Capability server child processes.
//!
//! Each enabled [`CapabilityServerSpec`] becomes one child process piped on
//! stdio. Framing is newline-delimited JSON: one JSON-RPC message per line,
//! in both directions. Children are supervised: an exit is logged and the
//! child is dropped from the broker's table; there is no auto-restart.

use std::{
    collections::HashMap,
    process::Stdio,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::Command,
    sync::{mpsc, oneshot, watch, Mutex},
    time::timeout,
};

use crate::{
    mcp::protocol::{JsonRpcRequest, JsonRpcResponse},
    store::CapabilityServerSpec,
    DcsandboxError, DcsandboxResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How long a forwarded request may wait for the child's reply.
const FORWARD_TIMEOUT: Duration = Duration::from_secs(60);

/// How long a child gets between SIGTERM and SIGKILL.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A running capability server child.
pub struct CapabilityChild {
    name: String,
    pid: Option<u32>,
    sender: mpsc::Sender<String>,
    pending: Arc<Mutex<HashMap<i64, oneshot::Sender<DcsandboxResult<Value>>>>>,
    next_id: AtomicI64,
    exited: watch::Receiver<Option<i32>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CapabilityChild {
    /// Spawns a capability server from its spec.
    pub fn spawn(spec: &CapabilityServerSpec) -> DcsandboxResult<Self> {
        let mut child = Command::new(&spec.command)
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let pid = child.id();
        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");

        let (sender, mut outbox) = mpsc::channel::<String>(64);
        let pending: Arc<Mutex<HashMap<i64, oneshot::Sender<DcsandboxResult<Value>>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (exit_tx, exit_rx) = watch::channel(None);

        // Writer: drain the outbox onto the child's stdin, one line each.
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(line) = outbox.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.write_all(b"\n").await.is_err() {
                    break;
                }
            }
        });

        // Reader: route each response line to its pending request.
        let reader_pending = pending.clone();
        let reader_name = spec.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Result::Ok(Some(line)) => {
                        route_response(&reader_pending, &reader_name, &line).await;
                    }
                    Result::Ok(None) => break,
                    Result::Err(e) => {
                        tracing::warn!(server = %reader_name, error = %e, "capability server read error");
                        break;
                    }
                }
            }

            // Stdout closed: fail whatever is still in flight.
            let mut map = reader_pending.lock().await;
            for (_, tx) in map.drain() {
                let _ = tx.send(Err(DcsandboxError::Runtime {
                    operation: "capability_forward".to_string(),
                    message: "capability server terminated".to_string(),
                }));
            }
        });

        // Supervisor: report the exit code.
        let wait_name = spec.name.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Result::Ok(status) => {
                    tracing::info!(
                        server = %wait_name,
                        code = status.code().unwrap_or(-1),
                        "capability server exited"
                    );
                    let _ = exit_tx.send(Some(status.code().unwrap_or(-1)));
                }
                Result::Err(e) => {
                    tracing::warn!(server = %wait_name, error = %e, "capability server wait failed");
                    let _ = exit_tx.send(Some(-1));
                }
            }
        });

        tracing::debug!(server = %spec.name, pid = ?pid, "spawned capability server");

        Ok(Self {
            name: spec.name.clone(),
            pid,
            sender,
            pending,
            next_id: AtomicI64::new(1),
            exited: exit_rx,
        })
    }

    /// The routing name of this server.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns whether the child has exited.
    pub fn has_exited(&self) -> bool {
        self.exited.borrow().is_some()
    }

    /// Forwards a JSON-RPC request to the child and awaits its response.
    pub async fn forward(&self, method: &str, params: Option<Value>) -> DcsandboxResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        let line = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if self.sender.send(line).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(DcsandboxError::Runtime {
                operation: "capability_forward".to_string(),
                message: format!("capability server '{}' is gone", self.name),
            });
        }

        match timeout(FORWARD_TIMEOUT, rx).await {
            Result::Ok(Result::Ok(result)) => result,
            Result::Ok(Result::Err(_)) => Err(DcsandboxError::Runtime {
                operation: "capability_forward".to_string(),
                message: "response channel closed".to_string(),
            }),
            Result::Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(DcsandboxError::Runtime {
                    operation: "capability_forward".to_string(),
                    message: format!("capability server '{}' timed out", self.name),
                })
            }
        }
    }

    /// Terminates the child: SIGTERM, then SIGKILL after a grace period.
    pub async fn shutdown(mut self) {
        let Some(pid) = self.pid else {
            return;
        };

        if self.exited.borrow().is_some() {
            return;
        }

        let pid = Pid::from_raw(pid as i32);
        if let Err(e) = signal::kill(pid, Signal::SIGTERM) {
            tracing::debug!(server = %self.name, error = %e, "SIGTERM failed");
        }

        let graceful = timeout(SHUTDOWN_GRACE, self.exited.wait_for(Option::is_some)).await;
        if graceful.is_err() {
            tracing::warn!(server = %self.name, "capability server ignored SIGTERM, killing");
            if let Err(e) = signal::kill(pid, Signal::SIGKILL) {
                tracing::debug!(server = %self.name, error = %e, "SIGKILL failed");
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

async fn route_response(
    pending: &Arc<Mutex<HashMap<i64, oneshot::Sender<DcsandboxResult<Value>>>>>,
    server: &str,
    line: &str,
) {
    let Result::Ok(response) = serde_json::from_str::<JsonRpcResponse>(line) else {
        tracing::debug!(server = %server, "ignoring non-response line from capability server");
        return;
    };

    let Some(id) = response.id.as_i64() else {
        return;
    };

    let Some(tx) = pending.lock().await.remove(&id) else {
        return;
    };

    let outcome = match response.error {
        Some(error) => Err(DcsandboxError::Runtime {
            operation: "capability_forward".to_string(),
            message: format!("rpc error {}: {}", error.code, error.message),
        }),
        None => Result::Ok(response.result.unwrap_or(Value::Null)),
    };

    let _ = tx.send(outcome);
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
