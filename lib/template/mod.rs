//! Template records and the ordered template registry.
//!
//! Templates are data: YAML documents with a required core (`name`,
//! `baseImage`, `features`, `capabilityServers`) and optional extras
//! (`postCreate`, `env`, `ports`). Built-ins ship embedded in the binary;
//! a custom templates directory shadows them by name.

mod registry;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::store::CapabilityServerSpec;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use registry::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A normalized template record consumed by the lifecycle engine.
///
/// Transient: only the template's `name` is ever persisted inside a sandbox
/// record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    /// The lookup name.
    pub name: String,

    /// The container base image.
    pub base_image: String,

    /// Named features installed into the image, in order.
    pub features: Vec<String>,

    /// Capability servers spawned for the sandbox's MCP endpoint.
    pub capability_servers: Vec<CapabilityServerSpec>,

    /// Commands run inside `/workspace` after the container starts.
    #[serde(default)]
    pub post_create: Vec<String>,

    /// Environment injected into the container.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Ports the image exposes.
    #[serde(default)]
    pub ports: Vec<u16>,
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
