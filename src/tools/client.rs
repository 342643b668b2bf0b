//! Tool client: discovery and invocation across configured endpoints.
//!
//! Discovery is all-or-nothing: if any endpoint is unreachable or two
//! endpoints offer the same tool name, the whole discovery fails with a
//! structured error rather than leaving a silent partial registry.
//! Invocation validates arguments locally against the tool's schema
//! before any transport round trip.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{Mutex, RwLock};

use crate::config::EndpointConfig;
use crate::state::{ToolCall, ToolResult};
use crate::tools::protocol::{CallToolResult, ListToolsResult, Request, Response};
use crate::tools::schema::{RegistryError, ToolRegistry, ValidationError};
use crate::tools::transport::{HttpTransport, StdioTransport, Transport, TransportError};

/// Discovery failures.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Discovery failed for endpoint '{endpoint}': {source}")]
    Endpoint {
        endpoint: String,
        source: TransportError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Invocation failures that do not fold into the conversation log.
///
/// Tool-reported failures are not errors here; they come back as a
/// [`ToolResult`] with `is_error` set so the model can adapt.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

struct Endpoint {
    name: String,
    transport: Mutex<Box<dyn Transport>>,
    next_id: AtomicU64,
    initialized: AtomicBool,
}

impl Endpoint {
    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Connect and run the `initialize` handshake once.
    async fn ensure_ready(&self) -> Result<(), TransportError> {
        let mut transport = self.transport.lock().await;
        if !transport.is_connected() {
            transport.connect().await?;
            self.initialized.store(false, Ordering::SeqCst);
        }
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }

        let kind = transport.kind();
        let request = Request::initialize(self.next_request_id());
        let response = transport.send(request).await?;
        match unwrap_result(kind, response)? {
            Ok(_) => {
                self.initialized.store(true, Ordering::SeqCst);
                tracing::debug!(endpoint = %self.name, "Tool server handshake complete");
                Ok(())
            }
            Err(rpc) => Err(TransportError::new(
                kind,
                format!("INIT_{}", rpc.code),
                rpc.message,
            )),
        }
    }

    async fn request(&self, method_request: Request) -> Result<Response, TransportError> {
        let mut transport = self.transport.lock().await;
        transport.send(method_request).await
    }

    async fn disconnect(&self) {
        let mut transport = self.transport.lock().await;
        if let Err(e) = transport.disconnect().await {
            tracing::warn!(endpoint = %self.name, error = %e, "Disconnect failed");
        }
        self.initialized.store(false, Ordering::SeqCst);
    }
}

/// Split a response into result/error, normalizing envelope violations.
fn unwrap_result(
    kind: crate::tools::transport::TransportKind,
    response: Response,
) -> Result<Result<serde_json::Value, crate::tools::protocol::RpcError>, TransportError> {
    response
        .into_outcome()
        .map_err(|e| TransportError::malformed(kind, e.to_string()))
}

/// Client over every configured tool-server endpoint.
///
/// Owns the transport connections for its lifetime; they are released
/// by [`ToolClient::disconnect_all`].
pub struct ToolClient {
    endpoints: Vec<Endpoint>,
    registry: RwLock<ToolRegistry>,
}

impl ToolClient {
    /// Build a client from endpoint configuration.
    pub fn new(configs: &[EndpointConfig], timeout: std::time::Duration) -> Self {
        let endpoints = configs
            .iter()
            .map(|config| {
                let transport: Box<dyn Transport> = match config {
                    EndpointConfig::Stdio {
                        command, args, env, ..
                    } => Box::new(StdioTransport::new(
                        command.clone(),
                        args.clone(),
                        env.clone(),
                        timeout,
                    )),
                    EndpointConfig::Http { url, headers, .. } => {
                        Box::new(HttpTransport::new(url.clone(), headers.clone(), timeout))
                    }
                };
                Endpoint {
                    name: config.name().to_string(),
                    transport: Mutex::new(transport),
                    next_id: AtomicU64::new(1),
                    initialized: AtomicBool::new(false),
                }
            })
            .collect();

        Self {
            endpoints,
            registry: RwLock::new(ToolRegistry::new()),
        }
    }

    /// Build a client directly from named transports.
    pub fn from_transports(transports: Vec<(String, Box<dyn Transport>)>) -> Self {
        let endpoints = transports
            .into_iter()
            .map(|(name, transport)| Endpoint {
                name,
                transport: Mutex::new(transport),
                next_id: AtomicU64::new(1),
                initialized: AtomicBool::new(false),
            })
            .collect();

        Self {
            endpoints,
            registry: RwLock::new(ToolRegistry::new()),
        }
    }

    /// Discover tools from every endpoint and build the merged registry.
    ///
    /// Any unreachable endpoint or duplicate tool name fails discovery
    /// as a whole; the cached registry is only replaced on success.
    pub async fn discover(&self) -> Result<ToolRegistry, DiscoveryError> {
        let mut registry = ToolRegistry::new();

        for endpoint in &self.endpoints {
            let tools = self.list_endpoint_tools(endpoint).await.map_err(|source| {
                DiscoveryError::Endpoint {
                    endpoint: endpoint.name.clone(),
                    source,
                }
            })?;

            tracing::info!(
                endpoint = %endpoint.name,
                tool_count = tools.len(),
                "Discovered tools"
            );

            for schema in tools {
                registry.insert(endpoint.name.clone(), schema)?;
            }
        }

        *self.registry.write().await = registry.clone();
        Ok(registry)
    }

    async fn list_endpoint_tools(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Vec<crate::tools::schema::ToolSchema>, TransportError> {
        endpoint.ensure_ready().await?;

        let kind = endpoint.transport.lock().await.kind();
        let request = Request::list_tools(endpoint.next_request_id());
        let response = endpoint.request(request).await?;

        match unwrap_result(kind, response)? {
            Ok(result) => {
                let listed: ListToolsResult = serde_json::from_value(result).map_err(|e| {
                    TransportError::malformed(kind, format!("invalid tools list: {e}"))
                })?;
                Ok(listed.tools)
            }
            Err(rpc) => Err(TransportError::new(
                kind,
                format!("LIST_{}", rpc.code),
                rpc.message,
            )),
        }
    }

    /// A snapshot of the merged registry from the last discovery.
    pub async fn registry(&self) -> ToolRegistry {
        self.registry.read().await.clone()
    }

    /// Invoke a tool call.
    ///
    /// Arguments are validated locally first; a schema violation never
    /// reaches the wire. A server-side tool failure comes back as an
    /// `is_error` result, not an `Err`.
    pub async fn invoke(&self, call: &ToolCall) -> Result<ToolResult, InvokeError> {
        let (endpoint_name, schema) = {
            let registry = self.registry.read().await;
            let Some(schema) = registry.schema(&call.tool_name) else {
                return Err(ValidationError::UnknownTool {
                    name: call.tool_name.clone(),
                }
                .into());
            };
            (
                registry
                    .endpoint_for(&call.tool_name)
                    .unwrap_or_default()
                    .to_string(),
                schema.clone(),
            )
        };

        schema.validate_arguments(&call.arguments)?;

        let endpoint = self
            .endpoints
            .iter()
            .find(|e| e.name == endpoint_name)
            .ok_or_else(|| ValidationError::UnknownTool {
                name: call.tool_name.clone(),
            })?;

        endpoint.ensure_ready().await?;

        let kind = endpoint.transport.lock().await.kind();
        let request = Request::call_tool(
            endpoint.next_request_id(),
            &call.tool_name,
            call.arguments.clone(),
        );

        tracing::debug!(
            tool = %call.tool_name,
            endpoint = %endpoint.name,
            call_id = %call.id,
            "Dispatching tool call"
        );

        let response = endpoint.request(request).await?;
        match unwrap_result(kind, response)? {
            Ok(result) => {
                let parsed: CallToolResult = serde_json::from_value(result).map_err(|e| {
                    TransportError::malformed(kind, format!("invalid tool result: {e}"))
                })?;
                let content = parsed.text();
                Ok(if parsed.is_error {
                    ToolResult::error(call.id.clone(), content, None)
                } else {
                    ToolResult::ok(call.id.clone(), content)
                })
            }
            // Tool-reported failure: folded into the log for the model.
            Err(rpc) => Ok(ToolResult::error(
                call.id.clone(),
                rpc.message,
                Some(format!("{}", rpc.code)),
            )),
        }
    }

    /// Release every transport connection.
    pub async fn disconnect_all(&self) {
        for endpoint in &self.endpoints {
            endpoint.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    use crate::tools::protocol::{RpcError, PROTOCOL_VERSION};
    use crate::tools::transport::TransportKind;

    /// In-memory tool server used to exercise the client without a
    /// real subprocess or network endpoint.
    struct FakeServer {
        tools: Vec<crate::tools::schema::ToolSchema>,
        fail_all: bool,
        connected: bool,
        calls_seen: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl FakeServer {
        fn new(tool_names: &[&str]) -> Self {
            Self {
                tools: tool_names.iter().map(|n| tool(n)).collect(),
                fail_all: false,
                connected: false,
                calls_seen: Default::default(),
            }
        }

        fn failing() -> Self {
            Self {
                tools: Vec::new(),
                fail_all: true,
                connected: false,
                calls_seen: Default::default(),
            }
        }
    }

    fn tool(name: &str) -> crate::tools::schema::ToolSchema {
        crate::tools::schema::ToolSchema {
            name: name.to_string(),
            description: "fake".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"]
            }),
        }
    }

    #[async_trait]
    impl Transport for FakeServer {
        fn kind(&self) -> TransportKind {
            TransportKind::Stdio
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn connect(&mut self) -> Result<(), TransportError> {
            if self.fail_all {
                return Err(TransportError::new(
                    TransportKind::Stdio,
                    "SPAWN_ERROR",
                    "unreachable",
                ));
            }
            self.connected = true;
            Ok(())
        }

        async fn send(&mut self, request: Request) -> Result<Response, TransportError> {
            let result = match request.method.as_str() {
                "initialize" => json!({"protocol_version": PROTOCOL_VERSION}),
                "tools/list" => serde_json::to_value(ListToolsResult {
                    tools: self.tools.clone(),
                })
                .unwrap(),
                "tools/call" => {
                    self.calls_seen
                        .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    let name = request.params.as_ref().unwrap()["name"]
                        .as_str()
                        .unwrap()
                        .to_string();
                    if name == "broken_tool" {
                        return Ok(Response {
                            version: PROTOCOL_VERSION.to_string(),
                            id: request.id,
                            result: None,
                            error: Some(RpcError {
                                code: -32000,
                                message: "tool exploded".to_string(),
                                data: None,
                            }),
                        });
                    }
                    json!({
                        "content": [{"type": "text", "text": format!("ran {name}")}],
                        "is_error": false
                    })
                }
                other => panic!("unexpected method {other}"),
            };
            Ok(Response {
                version: PROTOCOL_VERSION.to_string(),
                id: request.id,
                result: Some(result),
                error: None,
            })
        }

        async fn disconnect(&mut self) -> Result<(), TransportError> {
            self.connected = false;
            Ok(())
        }
    }

    fn client_with(servers: Vec<(&str, FakeServer)>) -> ToolClient {
        ToolClient::from_transports(
            servers
                .into_iter()
                .map(|(name, s)| (name.to_string(), Box::new(s) as Box<dyn Transport>))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_discovery_merges_endpoints() {
        let client = client_with(vec![
            ("files", FakeServer::new(&["read_file", "write_file", "delete_file"])),
            ("monitor", FakeServer::new(&["cpu_stats", "memory_stats"])),
        ]);

        let registry = client.discover().await.unwrap();
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.endpoint_for("cpu_stats"), Some("monitor"));
    }

    #[tokio::test]
    async fn test_discovery_is_all_or_nothing() {
        let client = client_with(vec![
            ("files", FakeServer::new(&["read_file"])),
            ("down", FakeServer::failing()),
        ]);

        let err = client.discover().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Endpoint { endpoint, .. } if endpoint == "down"));
        // The cached registry must not be partially populated.
        assert!(client.registry().await.is_empty());
    }

    #[tokio::test]
    async fn test_discovery_rejects_duplicate_names() {
        let client = client_with(vec![
            ("a", FakeServer::new(&["read_file"])),
            ("b", FakeServer::new(&["read_file"])),
        ]);

        let err = client.discover().await.unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::Registry(RegistryError::DuplicateTool { .. })
        ));
    }

    #[tokio::test]
    async fn test_invoke_validates_locally_without_round_trip() {
        let server = FakeServer::new(&["read_file"]);
        let calls_seen = server.calls_seen.clone();
        let client = client_with(vec![("files", server)]);
        client.discover().await.unwrap();

        // Missing required field: rejected before any dispatch.
        let call = ToolCall::new("read_file", json!({}));
        let err = client.invoke(&call).await.unwrap_err();
        assert!(matches!(err, InvokeError::Validation(_)));
        assert_eq!(calls_seen.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool_rejected() {
        let client = client_with(vec![("files", FakeServer::new(&["read_file"]))]);
        client.discover().await.unwrap();

        let call = ToolCall::new("launch_missiles", json!({"path": "x"}));
        let err = client.invoke(&call).await.unwrap_err();
        assert!(matches!(
            err,
            InvokeError::Validation(ValidationError::UnknownTool { .. })
        ));
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let client = client_with(vec![("files", FakeServer::new(&["read_file"]))]);
        client.discover().await.unwrap();

        let call = ToolCall::new("read_file", json!({"path": "a.txt"}));
        let result = client.invoke(&call).await.unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content, "ran read_file");
        assert_eq!(result.tool_call_id, call.id);
    }

    #[tokio::test]
    async fn test_tool_reported_failure_folds_into_result() {
        let client = client_with(vec![("files", FakeServer::new(&["broken_tool"]))]);
        client.discover().await.unwrap();

        let call = ToolCall::new("broken_tool", json!({"path": "a.txt"}));
        let result = client.invoke(&call).await.unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("tool exploded"));
    }
}
