//! The MCP proxy and multiplexer.
//!
//! Per sandbox, a JSON-RPC 2.0 broker terminates client WebSocket sessions,
//! answers the fixed built-in tool and resource methods by translating them
//! into container operations, and forwards everything else to in-sandbox
//! capability server child processes over newline-delimited JSON stdio.

mod broker;
mod children;
mod ports;
mod protocol;
mod proxy;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use broker::*;
pub use children::*;
pub use ports::*;
pub use protocol::*;
pub use proxy::*;
