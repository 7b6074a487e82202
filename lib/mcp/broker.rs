//! The per-sandbox MCP broker.
//!
//! One WebSocket listener per sandbox on an allocated host port. The broker
//! owns the port allocator, the listener tasks, and the capability server
//! children; the lifecycle engine drives it around container start/stop.

use std::{collections::HashMap, sync::Arc};

use futures_util::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::Mutex,
    task::JoinHandle,
};
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};

use crate::{
    runtime::ContainerRuntime,
    store::CapabilityServerSpec,
    DcsandboxError, DcsandboxResult,
};

use super::{
    children::CapabilityChild,
    ports::PortAllocator,
    protocol::{initialize_payload, JsonRpcRequest},
    proxy::{self, ProxyContext},
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The process-wide MCP broker.
pub struct McpBroker {
    host: String,
    ports: Mutex<PortAllocator>,
    proxies: Mutex<HashMap<String, ProxyHandle>>,
}

/// Bookkeeping for one serving sandbox.
struct ProxyHandle {
    port: u16,
    accept_task: JoinHandle<()>,
    children: Arc<Mutex<HashMap<String, CapabilityChild>>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl McpBroker {
    /// Creates a broker binding listeners on `host` and allocating from the
    /// inclusive port range.
    pub fn new(host: impl Into<String>, port_range: (u16, u16)) -> Self {
        Self {
            host: host.into(),
            ports: Mutex::new(PortAllocator::new(port_range.0, port_range.1)),
            proxies: Mutex::new(HashMap::new()),
        }
    }

    /// Allocates a free port from the range.
    pub async fn allocate_port(&self) -> DcsandboxResult<u16> {
        self.ports.lock().await.allocate()
    }

    /// Releases a port back to the range.
    pub async fn release_port(&self, port: u16) {
        self.ports.lock().await.release(port);
    }

    /// Marks a port as held during record rehydration.
    pub async fn mark_port_used(&self, port: u16) {
        self.ports.lock().await.mark_used(port);
    }

    /// Returns whether a sandbox currently has a listener.
    pub async fn is_serving(&self, sandbox_id: &str) -> bool {
        self.proxies.lock().await.contains_key(sandbox_id)
    }

    /// Starts serving a sandbox: spawns enabled capability servers and a
    /// WebSocket accept loop on the allocated port.
    pub async fn start(
        &self,
        sandbox_id: &str,
        port: u16,
        specs: &[CapabilityServerSpec],
        runtime: Arc<dyn ContainerRuntime>,
        container_id: &str,
    ) -> DcsandboxResult<()> {
        let listener = TcpListener::bind((self.host.as_str(), port))
            .await
            .map_err(|e| DcsandboxError::Runtime {
                operation: "mcp_bind".to_string(),
                message: format!("failed to bind {}:{}: {}", self.host, port, e),
            })?;

        let children: Arc<Mutex<HashMap<String, CapabilityChild>>> =
            Arc::new(Mutex::new(HashMap::new()));

        for spec in specs.iter().filter(|s| s.enabled) {
            match CapabilityChild::spawn(spec) {
                Result::Ok(child) => {
                    children.lock().await.insert(spec.name.clone(), child);
                }
                Result::Err(e) => {
                    tracing::warn!(
                        sandbox = %sandbox_id,
                        server = %spec.name,
                        error = %e,
                        "failed to spawn capability server"
                    );
                }
            }
        }

        let ctx = ProxyContext {
            sandbox_id: sandbox_id.to_string(),
            container_id: container_id.to_string(),
            runtime,
            children: children.clone(),
        };

        let accept_sandbox = sandbox_id.to_string();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Result::Ok((stream, peer)) => {
                        tracing::debug!(sandbox = %accept_sandbox, peer = %peer, "mcp client connected");
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, ctx).await {
                                tracing::debug!(error = %e, "mcp connection closed with error");
                            }
                        });
                    }
                    Result::Err(e) => {
                        tracing::warn!(sandbox = %accept_sandbox, error = %e, "mcp accept failed");
                        break;
                    }
                }
            }
        });

        self.proxies.lock().await.insert(
            sandbox_id.to_string(),
            ProxyHandle {
                port,
                accept_task,
                children,
            },
        );

        tracing::info!(sandbox = %sandbox_id, port = port, "mcp endpoint serving");
        Ok(())
    }

    /// Stops serving a sandbox: closes the listener, terminates children,
    /// and releases the port. Idempotent.
    pub async fn stop(&self, sandbox_id: &str) {
        let Some(handle) = self.proxies.lock().await.remove(sandbox_id) else {
            return;
        };

        handle.accept_task.abort();

        let mut children = handle.children.lock().await;
        for (name, child) in children.drain() {
            tracing::debug!(sandbox = %sandbox_id, server = %name, "stopping capability server");
            child.shutdown().await;
        }
        drop(children);

        self.release_port(handle.port).await;
        tracing::info!(sandbox = %sandbox_id, port = handle.port, "mcp endpoint stopped");
    }

    /// Drops children that exited on their own, so routing stops offering
    /// them. Called opportunistically; there is no auto-restart.
    pub async fn reap_children(&self, sandbox_id: &str) {
        let proxies = self.proxies.lock().await;
        let Some(handle) = proxies.get(sandbox_id) else {
            return;
        };

        let mut children = handle.children.lock().await;
        let dead: Vec<String> = children
            .iter()
            .filter(|(_, child)| child.has_exited())
            .map(|(name, _)| name.clone())
            .collect();
        for name in dead {
            tracing::info!(sandbox = %sandbox_id, server = %name, "dropping exited capability server");
            children.remove(&name);
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Runs one client connection: WebSocket upgrade, unsolicited `initialized`
/// notification, then a frame-dispatch loop until the peer goes away.
async fn handle_connection(stream: TcpStream, ctx: ProxyContext) -> DcsandboxResult<()> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| DcsandboxError::Runtime {
            operation: "mcp_accept".to_string(),
            message: e.to_string(),
        })?;

    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    let hello = JsonRpcRequest::notification("initialized", Some(initialize_payload()));
    ws_sink
        .send(WsMessage::Text(serde_json::to_string(&hello)?.into()))
        .await
        .map_err(|e| DcsandboxError::Runtime {
            operation: "mcp_send".to_string(),
            message: e.to_string(),
        })?;

    while let Some(message) = ws_stream.next().await {
        match message {
            Result::Ok(WsMessage::Text(frame)) => {
                if let Some(reply) = proxy::handle_frame(&ctx, frame.as_ref()).await {
                    if ws_sink.send(WsMessage::Text(reply.into())).await.is_err() {
                        break;
                    }
                }
            }
            Result::Ok(WsMessage::Ping(payload)) => {
                if ws_sink.send(WsMessage::Pong(payload)).await.is_err() {
                    break;
                }
            }
            Result::Ok(WsMessage::Close(_)) => break,
            Result::Ok(_) => {}
            Result::Err(e) => {
                tracing::debug!(error = %e, "mcp read error");
                break;
            }
        }
    }

    Ok(())
}
