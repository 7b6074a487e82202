//! Serving-process management.
//!
//! The MCP endpoint lives in whichever process attached the broker, so each
//! serving sandbox records that process in a `serve.pid` file next to its
//! record. Other invocations use the file to tell a live endpoint from a
//! stale record, and to stop the server across processes with SIGTERM.
//! `spawn_detached` re-launches the CLI in its own session with null stdio
//! so `create --detach` and `start --detach` return immediately.

use std::process::Stdio;

use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use tokio::{fs, process::Command};

use crate::{store::Store, utils::SERVE_PID_FILENAME, DcsandboxResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the serve PID file path for a sandbox.
pub fn pid_path(store: &Store, id: &str) -> std::path::PathBuf {
    store.sandbox_dir(id).join(SERVE_PID_FILENAME)
}

/// Records the current process as the sandbox's serving process.
pub async fn write_pid(store: &Store, id: &str) -> DcsandboxResult<()> {
    fs::write(pid_path(store, id), std::process::id().to_string()).await?;
    Ok(())
}

/// Removes the serve PID file. A missing file is fine.
pub async fn clear_pid(store: &Store, id: &str) {
    let path = pid_path(store, id);
    if path.exists() {
        if let Err(e) = fs::remove_file(&path).await {
            tracing::debug!(id = %id, error = %e, "failed to remove serve pid file");
        }
    }
}

/// Returns the PID of a live serving process for the sandbox, if any.
///
/// A stale or unreadable file reads as "no server"; liveness is probed with
/// a null signal.
pub async fn live_pid(store: &Store, id: &str) -> Option<Pid> {
    let contents = fs::read_to_string(pid_path(store, id)).await.ok()?;
    let raw: i32 = contents.trim().parse().ok()?;
    let pid = Pid::from_raw(raw);
    signal::kill(pid, None).ok()?;
    Some(pid)
}

/// Terminates the sandbox's serving process, if it is another live process,
/// and clears the PID file. Best effort.
pub async fn terminate(store: &Store, id: &str) {
    if let Some(pid) = live_pid(store, id).await {
        if pid.as_raw() != std::process::id() as i32 {
            tracing::info!(id = %id, pid = pid.as_raw(), "stopping serving process");
            if let Err(e) = signal::kill(pid, Signal::SIGTERM) {
                tracing::warn!(id = %id, pid = pid.as_raw(), error = %e, "SIGTERM failed");
            }
        }
    }
    clear_pid(store, id).await;
}

/// Spawns this binary again with the given arguments as a detached server:
/// its own session, stdio on `/dev/null`, not waited on.
pub async fn spawn_detached(args: &[String]) -> DcsandboxResult<u32> {
    let exe = std::env::current_exe()?;

    let mut command = Command::new(exe);
    command.args(args);

    unsafe {
        command.pre_exec(|| {
            nix::unistd::setsid().map_err(std::io::Error::other)?;
            std::io::Result::Ok(())
        });
    }

    command.stdout(Stdio::null());
    command.stderr(Stdio::null());
    command.stdin(Stdio::null());

    let child = command.spawn()?;
    let pid = child.id().unwrap_or(0);
    tracing::info!("started detached server process with PID: {}", pid);

    Ok(pid)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
