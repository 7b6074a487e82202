//! The background reaper.
//!
//! Periodically sweeps records: running sandboxes past their deadline are
//! stopped; long-inactive ones are removed when auto-cleanup allows it.

use std::{sync::Arc, time::Duration};

use tokio::{sync::Notify, task::JoinHandle};

use super::SandboxEngine;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How often the reaper sweeps.
pub const REAPER_INTERVAL: Duration = Duration::from_secs(30);

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Spawns the reaper task. It sweeps every `interval` until `shutdown` is
/// notified.
pub fn spawn_reaper(
    engine: Arc<SandboxEngine>,
    interval: Duration,
    shutdown: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so a fresh process does
        // not race its own recovery.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = shutdown.notified() => {
                    tracing::debug!("reaper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    engine.reap().await;
                }
            }
        }
    })
}
