//! JSON-RPC dispatch for a sandbox's MCP endpoint.
//!
//! The proxy answers `initialize`, `tools/list`, `tools/call`,
//! `resources/list`, and `resources/read` itself; built-in tools translate
//! into container execs. Anything else routes to a capability server chosen
//! by method prefix or an explicit `server` param, else `-32601`.

use std::{collections::HashMap, sync::Arc};

use serde_json::{json, Value};
use tokio::sync::Mutex;
use typed_path::Utf8UnixPathBuf;

use crate::{
    runtime::ContainerRuntime,
    utils::CONTAINER_WORKSPACE_DIR,
    DcsandboxResult,
};

use super::{
    children::CapabilityChild,
    protocol::{
        initialize_payload, JsonRpcRequest, JsonRpcResponse, ToolResult, INTERNAL_ERROR,
        INVALID_PARAMS, METHOD_NOT_FOUND, PARSE_ERROR,
    },
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Everything one connection handler needs to answer requests.
#[derive(Clone)]
pub struct ProxyContext {
    /// The owning sandbox id.
    pub sandbox_id: String,

    /// The container the built-in tools act on.
    pub container_id: String,

    /// The runtime used for built-in tool execs.
    pub runtime: Arc<dyn ContainerRuntime>,

    /// The live capability server children, keyed by routing name.
    pub children: Arc<Mutex<HashMap<String, CapabilityChild>>>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Handles one inbound WebSocket text frame, returning the outbound frame
/// if the message warrants a reply.
pub async fn handle_frame(ctx: &ProxyContext, frame: &str) -> Option<String> {
    let request = match serde_json::from_str::<JsonRpcRequest>(frame) {
        Result::Ok(request) => request,
        Result::Err(e) => {
            let response =
                JsonRpcResponse::failure(Value::Null, PARSE_ERROR, format!("parse error: {}", e));
            return serde_json::to_string(&response).ok();
        }
    };

    if request.is_notification() {
        tracing::trace!(method = %request.method, "ignoring client notification");
        return None;
    }

    let response = dispatch(ctx, request).await;
    serde_json::to_string(&response).ok()
}

/// Dispatches a parsed request to a handler.
pub async fn dispatch(ctx: &ProxyContext, request: JsonRpcRequest) -> JsonRpcResponse {
    let id = request.id.clone().unwrap_or(Value::Null);

    match request.method.as_str() {
        "initialize" => JsonRpcResponse::success(id, initialize_payload()),
        "tools/list" => JsonRpcResponse::success(id, json!({ "tools": builtin_tools() })),
        "tools/call" => handle_tools_call(ctx, id, request.params).await,
        "resources/list" => JsonRpcResponse::success(
            id,
            json!({
                "resources": [{
                    "uri": "file:///workspace",
                    "name": "workspace",
                    "description": "The sandbox workspace",
                }]
            }),
        ),
        "resources/read" => handle_resources_read(ctx, id, request.params).await,
        other => forward(ctx, id, other, request.params).await,
    }
}

/// The static built-in tool descriptors.
fn builtin_tools() -> Value {
    json!([
        {
            "name": "filesystem_read",
            "description": "Read a file from the sandbox workspace",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path relative to /workspace" }
                },
                "required": ["path"]
            }
        },
        {
            "name": "filesystem_write",
            "description": "Write a file into the sandbox workspace",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path relative to /workspace" },
                    "content": { "type": "string", "description": "File contents" }
                },
                "required": ["path", "content"]
            }
        },
        {
            "name": "shell_execute",
            "description": "Run a shell command inside the sandbox",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Command passed to /bin/bash -c" }
                },
                "required": ["command"]
            }
        }
    ])
}

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

async fn handle_tools_call(ctx: &ProxyContext, id: Value, params: Option<Value>) -> JsonRpcResponse {
    let params = params.unwrap_or(Value::Null);
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return JsonRpcResponse::failure(id, INVALID_PARAMS, "missing tool name");
    };
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

    let result = match name {
        "filesystem_read" => filesystem_read(ctx, &arguments).await,
        "filesystem_write" => filesystem_write(ctx, &arguments).await,
        "shell_execute" => shell_execute(ctx, &arguments).await,
        other => {
            // Unknown built-in: try the capability server whose name
            // prefixes the tool, e.g. `git_status` -> `git`.
            let server = other.split('_').next().unwrap_or_default();
            let children = ctx.children.lock().await;
            let Some(child) = children.get(server) else {
                return JsonRpcResponse::failure(
                    id,
                    METHOD_NOT_FOUND,
                    format!("Method not found: tool '{}'", other),
                );
            };
            return match child.forward("tools/call", Some(params.clone())).await {
                Result::Ok(value) => JsonRpcResponse::success(id, value),
                Result::Err(e) => JsonRpcResponse::failure(id, INTERNAL_ERROR, e.to_string()),
            };
        }
    };

    match result {
        Result::Ok(tool_result) => match serde_json::to_value(&tool_result) {
            Result::Ok(value) => JsonRpcResponse::success(id, value),
            Result::Err(e) => JsonRpcResponse::failure(id, INTERNAL_ERROR, e.to_string()),
        },
        Result::Err(e) => JsonRpcResponse::failure(id, INTERNAL_ERROR, e.to_string()),
    }
}

async fn handle_resources_read(
    ctx: &ProxyContext,
    id: Value,
    params: Option<Value>,
) -> JsonRpcResponse {
    let uri = params
        .as_ref()
        .and_then(|p| p.get("uri"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    let Some(path) = uri.strip_prefix("file://") else {
        return JsonRpcResponse::failure(id, INVALID_PARAMS, format!("unsupported uri: {}", uri));
    };

    // file:///workspace/a.txt and file://a.txt both resolve under /workspace.
    let relative = path
        .strip_prefix(CONTAINER_WORKSPACE_DIR)
        .unwrap_or(path)
        .trim_start_matches('/');

    let result = filesystem_read(ctx, &json!({ "path": relative })).await;
    match result {
        Result::Ok(tool_result) => match serde_json::to_value(&tool_result) {
            Result::Ok(value) => JsonRpcResponse::success(id, value),
            Result::Err(e) => JsonRpcResponse::failure(id, INTERNAL_ERROR, e.to_string()),
        },
        Result::Err(e) => JsonRpcResponse::failure(id, INTERNAL_ERROR, e.to_string()),
    }
}

async fn forward(
    ctx: &ProxyContext,
    id: Value,
    method: &str,
    params: Option<Value>,
) -> JsonRpcResponse {
    // Routing key: explicit `server` param wins, else the method prefix
    // before the first '/'.
    let explicit = params
        .as_ref()
        .and_then(|p| p.get("server"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let server = explicit.unwrap_or_else(|| {
        method.split('/').next().unwrap_or_default().to_string()
    });

    let children = ctx.children.lock().await;
    let Some(child) = children.get(&server) else {
        return JsonRpcResponse::failure(
            id,
            METHOD_NOT_FOUND,
            format!("Method not found: {}", method),
        );
    };

    match child.forward(method, params).await {
        Result::Ok(value) => JsonRpcResponse::success(id, value),
        Result::Err(e) => JsonRpcResponse::failure(id, INTERNAL_ERROR, e.to_string()),
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Built-in tools
//--------------------------------------------------------------------------------------------------

async fn filesystem_read(ctx: &ProxyContext, arguments: &Value) -> DcsandboxResult<ToolResult> {
    let Some(path) = arguments.get("path").and_then(Value::as_str) else {
        return Ok(ToolResult::error("missing 'path' argument"));
    };

    let Some(target) = normalize_workspace_path(path) else {
        return Ok(ToolResult::error(format!(
            "path escapes the workspace: {}",
            path
        )));
    };

    let exec = ctx
        .runtime
        .exec(
            &ctx.container_id,
            &["cat".to_string(), target.to_string()],
            None,
            None,
        )
        .await?;

    if exec.exit_code != 0 {
        return Ok(ToolResult::error(exec.output));
    }
    Ok(ToolResult::text(exec.output))
}

async fn filesystem_write(ctx: &ProxyContext, arguments: &Value) -> DcsandboxResult<ToolResult> {
    let Some(path) = arguments.get("path").and_then(Value::as_str) else {
        return Ok(ToolResult::error("missing 'path' argument"));
    };
    let Some(content) = arguments.get("content").and_then(Value::as_str) else {
        return Ok(ToolResult::error("missing 'content' argument"));
    };

    let Some(target) = normalize_workspace_path(path) else {
        return Ok(ToolResult::error(format!(
            "path escapes the workspace: {}",
            path
        )));
    };

    if let Some(parent) = target.parent() {
        let mkdir = ctx
            .runtime
            .exec(
                &ctx.container_id,
                &["mkdir".to_string(), "-p".to_string(), parent.to_string()],
                None,
                None,
            )
            .await?;
        if mkdir.exit_code != 0 {
            return Ok(ToolResult::error(mkdir.output));
        }
    }

    let exec = ctx
        .runtime
        .exec(
            &ctx.container_id,
            &["tee".to_string(), target.to_string()],
            Some(content.as_bytes().to_vec()),
            None,
        )
        .await?;

    if exec.exit_code != 0 {
        return Ok(ToolResult::error(exec.output));
    }
    Ok(ToolResult::text(format!(
        "wrote {} bytes to {}",
        content.len(),
        target
    )))
}

async fn shell_execute(ctx: &ProxyContext, arguments: &Value) -> DcsandboxResult<ToolResult> {
    let Some(command) = arguments.get("command").and_then(Value::as_str) else {
        return Ok(ToolResult::error("missing 'command' argument"));
    };

    let exec = ctx
        .runtime
        .exec(
            &ctx.container_id,
            &[
                "/bin/bash".to_string(),
                "-c".to_string(),
                command.to_string(),
            ],
            None,
            Some(CONTAINER_WORKSPACE_DIR),
        )
        .await?;

    if exec.exit_code != 0 {
        return Ok(ToolResult::error(exec.output));
    }
    Ok(ToolResult::text(exec.output))
}

/// Resolves a client-supplied path under `/workspace`, rejecting anything
/// that would escape it. `..` components are resolved lexically.
pub fn normalize_workspace_path(path: &str) -> Option<Utf8UnixPathBuf> {
    let mut parts: Vec<&str> = Vec::new();
    let relative = path.trim_start_matches('/');

    for component in relative.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }

    let mut normalized = Utf8UnixPathBuf::from(CONTAINER_WORKSPACE_DIR);
    for part in parts {
        normalized.push(part);
    }
    Some(normalized)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::Path;

    use crate::runtime::{ContainerSpec, FakeRuntime};

    use super::*;

    async fn context() -> (ProxyContext, Arc<FakeRuntime>) {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.build_image(Path::new("."), "img").await.unwrap();
        let container_id = runtime
            .create_container(&ContainerSpec {
                image: "img".into(),
                name: "dcsandbox-test".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        runtime.start_container(&container_id).await.unwrap();

        let ctx = ProxyContext {
            sandbox_id: "test000001".into(),
            container_id,
            runtime: runtime.clone(),
            children: Arc::new(Mutex::new(HashMap::new())),
        };
        (ctx, runtime)
    }

    #[test]
    fn test_path_normalization_blocks_escapes() {
        assert_eq!(
            normalize_workspace_path("a.txt").unwrap().to_string(),
            "/workspace/a.txt"
        );
        assert_eq!(
            normalize_workspace_path("src/../a.txt").unwrap().to_string(),
            "/workspace/a.txt"
        );
        assert_eq!(
            normalize_workspace_path("/etc/passwd").unwrap().to_string(),
            "/workspace/etc/passwd"
        );
        assert!(normalize_workspace_path("../etc/passwd").is_none());
        assert!(normalize_workspace_path("a/../../etc").is_none());
    }

    #[tokio::test]
    async fn test_initialize_echoes_id() {
        let (ctx, _) = context().await;
        let response = dispatch(
            &ctx,
            JsonRpcRequest::new(7, "initialize", None),
        )
        .await;
        assert_eq!(response.id, json!(7));
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], json!("2024-11-05"));
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let (ctx, _) = context().await;

        let write = dispatch(
            &ctx,
            JsonRpcRequest::new(
                1,
                "tools/call",
                Some(json!({
                    "name": "filesystem_write",
                    "arguments": { "path": "a.txt", "content": "hi" }
                })),
            ),
        )
        .await;
        assert_eq!(write.result.unwrap()["isError"], json!(false));

        let read = dispatch(
            &ctx,
            JsonRpcRequest::new(
                2,
                "tools/call",
                Some(json!({
                    "name": "filesystem_read",
                    "arguments": { "path": "a.txt" }
                })),
            ),
        )
        .await;
        let result = read.result.unwrap();
        assert_eq!(result["isError"], json!(false));
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("hi"));
    }

    #[tokio::test]
    async fn test_shell_execute_reports_exit_code() {
        let (ctx, runtime) = context().await;
        runtime.script_shell("false", 1, "it broke").await;

        let response = dispatch(
            &ctx,
            JsonRpcRequest::new(
                3,
                "tools/call",
                Some(json!({ "name": "shell_execute", "arguments": { "command": "false" } })),
            ),
        )
        .await;
        let result = response.result.unwrap();
        assert_eq!(result["isError"], json!(true));
        assert_eq!(result["content"][0]["text"], json!("it broke"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_method_not_found() {
        let (ctx, _) = context().await;
        let response = dispatch(
            &ctx,
            JsonRpcRequest::new(
                4,
                "tools/call",
                Some(json!({ "name": "bogus_tool", "arguments": {} })),
            ),
        )
        .await;
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unrouted_method_is_method_not_found() {
        let (ctx, _) = context().await;
        let response = dispatch(&ctx, JsonRpcRequest::new(5, "git/status", None)).await;
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_parse_error_has_null_id() {
        let (ctx, _) = context().await;
        let frame = handle_frame(&ctx, "{not json").await.unwrap();
        let response: JsonRpcResponse = serde_json::from_str(&frame).unwrap();
        assert_eq!(response.id, Value::Null);
        assert_eq!(response.error.unwrap().code, PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_resources_read_delegates_to_filesystem() {
        let (ctx, _) = context().await;

        dispatch(
            &ctx,
            JsonRpcRequest::new(
                6,
                "tools/call",
                Some(json!({
                    "name": "filesystem_write",
                    "arguments": { "path": "notes.md", "content": "remember" }
                })),
            ),
        )
        .await;

        let response = dispatch(
            &ctx,
            JsonRpcRequest::new(
                7,
                "resources/read",
                Some(json!({ "uri": "file:///workspace/notes.md" })),
            ),
        )
        .await;
        let result = response.result.unwrap();
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("remember"));
    }

    #[tokio::test]
    async fn test_notifications_get_no_reply() {
        let (ctx, _) = context().await;
        let frame = serde_json::to_string(&JsonRpcRequest::notification(
            "notifications/initialized",
            None,
        ))
        .unwrap();
        assert!(handle_frame(&ctx, &frame).await.is_none());
    }
}
