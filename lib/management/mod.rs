//! The sandbox lifecycle engine and its supporting pieces.
//!
//! This module owns sandbox records end to end: creation (clone, detect,
//! resolve template, materialize, build, create, start, attach MCP, run
//! post-create), stop/remove with best-effort idempotence, crash recovery,
//! and the background reaper.
//!
//! Key components:
//! - `engine`: the coarse-grained operations and per-sandbox serialization
//! - `state`: the lifecycle transition table, checked before every mutation
//! - `clone`: shallow git clones into the id-keyed cache
//! - `context`: build-context materialization (Dockerfile, devcontainer)
//! - `server`: serving-process PID files and detached re-launch
//! - `reaper`: the periodic deadline sweep

pub mod clone;
pub mod context;
pub mod engine;
pub mod reaper;
pub mod server;
pub mod state;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use engine::*;
pub use reaper::*;
pub use state::*;
