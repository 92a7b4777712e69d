//! MCP client sessions and remote tools

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use super::protocol::{
    ClientInfo, InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RemoteToolDef, ServerInfo, ToolCallParams, ToolsListResult, tool_output,
};
use super::transport::{StdioTransport, Transport};
use crate::config::ServerConfig;
use crate::error::{Result, TollgateError};
use crate::tools::{Tool, ToolOutput};

/// Launches a configured tool host and opens sessions against it
#[derive(Debug, Clone)]
pub struct McpClient {
    name: String,
    config: ServerConfig,
    client_info: ClientInfo,
}

impl McpClient {
    pub fn new(name: impl Into<String>, config: ServerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            client_info: ClientInfo::default(),
        }
    }

    /// Shorthand for a host without extra environment
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self::new(
            name,
            ServerConfig {
                command: command.into(),
                args,
                env: Default::default(),
            },
        )
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env.insert(key.into(), value.into());
        self
    }

    pub fn with_client_info(mut self, client_info: ClientInfo) -> Self {
        self.client_info = client_info;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the host and complete the initialize handshake
    pub async fn connect(&self) -> Result<McpSession> {
        let transport = StdioTransport::from_config(&self.name, &self.config)?;
        McpSession::open_with(&self.name, Box::new(transport), self.client_info.clone()).await
    }

    /// Run `f` with the host's tools, closing the session afterwards
    /// whether or not `f` succeeds.
    pub async fn with_session<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Vec<Arc<dyn Tool>>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.connect().await?.scope(f).await
    }
}

struct SessionInner {
    name: String,
    transport: AsyncMutex<Option<Box<dyn Transport>>>,
    next_id: AtomicU64,
    server_info: Mutex<Option<ServerInfo>>,
}

/// An initialized connection to one tool host.
///
/// Requests are strictly sequential: each holds the transport until its
/// response arrives. Cloning shares the connection.
#[derive(Clone)]
pub struct McpSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for McpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpSession")
            .field("name", &self.inner.name)
            .field("next_id", &self.inner.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

impl McpSession {
    /// Initialize a session over an already connected transport
    pub async fn open(name: impl Into<String>, transport: Box<dyn Transport>) -> Result<Self> {
        Self::open_with(name, transport, ClientInfo::default()).await
    }

    pub async fn open_with(
        name: impl Into<String>,
        transport: Box<dyn Transport>,
        client_info: ClientInfo,
    ) -> Result<Self> {
        let session = Self {
            inner: Arc::new(SessionInner {
                name: name.into(),
                transport: AsyncMutex::new(Some(transport)),
                next_id: AtomicU64::new(1),
                server_info: Mutex::new(None),
            }),
        };
        if let Err(e) = session.initialize(client_info).await {
            session.close().await;
            return Err(e);
        }
        Ok(session)
    }

    async fn initialize(&self, client_info: ClientInfo) -> Result<()> {
        let params = serde_json::to_value(InitializeParams::new(client_info))?;
        let result = self.request("initialize", params).await?;
        let init: InitializeResult = match serde_json::from_value(result) {
            Ok(init) => init,
            Err(e) => {
                debug!(
                    server = %self.inner.name,
                    error = %e,
                    "Ignoring malformed initialize result"
                );
                InitializeResult::default()
            }
        };
        if let Some(server) = &init.server_info {
            info!(
                server = %self.inner.name,
                remote = %server.name,
                version = %server.version,
                "MCP session initialized"
            );
        }
        *self
            .inner
            .server_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = init.server_info;
        self.notify("notifications/initialized").await
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Identity the host reported during initialize
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.inner
            .server_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.transport.lock().await.is_none()
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let line = encode(&JsonRpcNotification::new(method))?;
        let mut guard = self.inner.transport.lock().await;
        let transport = guard.as_mut().ok_or_else(session_closed)?;
        transport.send_line(&line).await
    }

    /// Send one request and wait for its response.
    ///
    /// Lines answering other ids are skipped. A host error becomes a
    /// provider error; a missing result reads as an empty object.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let mut guard = self.inner.transport.lock().await;
        let transport = guard.as_mut().ok_or_else(session_closed)?;

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let line = encode(&JsonRpcRequest::new(id, method, params))?;
        debug!(server = %self.inner.name, id, method, "MCP request");
        transport.send_line(&line).await?;

        loop {
            let Some(line) = transport.receive_line().await? else {
                return Err(TollgateError::Provider("MCP server closed".to_string()));
            };
            if line.trim().is_empty() {
                continue;
            }
            let response: JsonRpcResponse = serde_json::from_str(&line)
                .map_err(|_| TollgateError::Protocol("Invalid MCP response".to_string()))?;
            if !response.answers(id) {
                debug!(server = %self.inner.name, expected = id, "Skipping unrelated MCP message");
                continue;
            }
            if let Some(error) = response.error {
                return Err(TollgateError::Provider(error.message));
            }
            return Ok(response.result.unwrap_or_else(|| json!({})));
        }
    }

    /// Tools the host advertises
    pub async fn list_tools(&self) -> Result<Vec<RemoteToolDef>> {
        let result = self.request("tools/list", json!({})).await?;
        let list: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| TollgateError::Protocol(format!("Invalid tools/list result: {e}")))?;
        Ok(list.tools)
    }

    /// Advertised tools wrapped for use in a tool registry
    pub async fn remote_tools(&self) -> Result<Vec<Arc<dyn Tool>>> {
        Ok(self
            .list_tools()
            .await?
            .into_iter()
            .map(|def| Arc::new(RemoteTool::new(def, self.clone())) as Arc<dyn Tool>)
            .collect())
    }

    /// Invoke a remote tool by name
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput> {
        let params = serde_json::to_value(ToolCallParams {
            name: name.to_string(),
            arguments,
        })?;
        let result = self.request("tools/call", params).await?;
        tool_output(result).map_err(TollgateError::Tool)
    }

    /// Close the streams and wait for the host. Idempotent.
    pub async fn close(&self) {
        let transport = self.inner.transport.lock().await.take();
        if let Some(mut transport) = transport {
            transport.shutdown().await;
            debug!(server = %self.inner.name, "MCP session closed");
        }
    }

    /// Run `f` with this session's tools, then close the session
    pub async fn scope<F, Fut, T>(self, f: F) -> Result<T>
    where
        F: FnOnce(Vec<Arc<dyn Tool>>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let tools = match self.remote_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                self.close().await;
                return Err(e);
            }
        };
        let outcome = f(tools).await;
        self.close().await;
        outcome
    }
}

fn encode<T: Serialize>(message: &T) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

fn session_closed() -> TollgateError {
    TollgateError::Tool("MCP session closed".to_string())
}

/// A host-side tool exposed through the [`Tool`] trait
pub struct RemoteTool {
    def: RemoteToolDef,
    session: McpSession,
}

impl RemoteTool {
    pub fn new(def: RemoteToolDef, session: McpSession) -> Self {
        Self { def, session }
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.def.name
    }

    fn description(&self) -> Option<&str> {
        self.def.description.as_deref()
    }

    fn schema(&self) -> Option<&Value> {
        Some(&self.def.input_schema)
    }

    async fn invoke(&self, args: Value) -> Result<ToolOutput> {
        self.session
            .call_tool(&self.def.name, args)
            .await
            .map_err(TollgateError::into_tool)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

    use super::*;
    use crate::mcp::protocol::JsonRpcError;
    use crate::mcp::transport::StreamTransport;

    type HostTransport = StreamTransport<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    /// In-process tool host answering over a duplex pipe
    fn fake_host<F>(respond: F) -> (Box<HostTransport>, tokio::task::JoinHandle<Vec<Value>>)
    where
        F: Fn(&Value) -> Vec<String> + Send + 'static,
    {
        let (client, host) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (host_read, mut host_write) = tokio::io::split(host);

        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            let mut lines = BufReader::new(host_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let message: Value = serde_json::from_str(&line).unwrap();
                for reply in respond(&message) {
                    host_write.write_all(reply.as_bytes()).await.unwrap();
                    host_write.write_all(b"\n").await.unwrap();
                }
                seen.push(message);
            }
            seen
        });

        (
            Box::new(StreamTransport::new(client_read, client_write)),
            handle,
        )
    }

    fn reply(message: &Value, result: Value) -> String {
        serde_json::to_string(&JsonRpcResponse::success(
            message["id"].as_u64().unwrap(),
            result,
        ))
        .unwrap()
    }

    fn standard_host(message: &Value) -> Vec<String> {
        match message["method"].as_str().unwrap_or_default() {
            "initialize" => vec![reply(
                message,
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "fake", "version": "0.0.1"}
                }),
            )],
            "tools/list" => vec![reply(
                message,
                json!({"tools": [
                    {"name": "add", "description": "Add numbers", "inputSchema": {"type": "object", "required": ["a", "b"]}},
                    {"name": "fail"}
                ]}),
            )],
            "tools/call" => {
                let args = &message["params"]["arguments"];
                if message["params"]["name"] == "fail" {
                    vec![serde_json::to_string(&JsonRpcResponse::error(
                        message["id"].as_u64().unwrap(),
                        JsonRpcError::new(-32000, "tool exploded"),
                    ))
                    .unwrap()]
                } else {
                    let sum = args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0);
                    vec![reply(
                        message,
                        json!({"content": [{"type": "text", "text": sum.to_string()}]}),
                    )]
                }
            }
            _ => Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_handshake_and_tool_listing() {
        let (transport, host) = fake_host(standard_host);
        let session = McpSession::open("fake", transport).await.unwrap();
        assert_eq!(session.server_info().unwrap().name, "fake");

        let tools = session.list_tools().await.unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].description.as_deref(), Some("Add numbers"));
        session.close().await;

        let seen = host.await.unwrap();
        let methods: Vec<_> = seen.iter().map(|m| m["method"].as_str().unwrap()).collect();
        assert_eq!(
            methods,
            ["initialize", "notifications/initialized", "tools/list"]
        );
        assert_eq!(seen[0]["id"], 1);
        assert_eq!(seen[0]["params"]["protocolVersion"], "2024-11-05");
        assert!(seen[1].get("id").is_none());
        assert_eq!(seen[2]["id"], 2);
    }

    #[tokio::test]
    async fn test_remote_tool_invocation() {
        let (transport, _host) = fake_host(standard_host);
        let session = McpSession::open("fake", transport).await.unwrap();
        let tools = session.remote_tools().await.unwrap();

        let add = &tools[0];
        assert_eq!(add.name(), "add");
        assert_eq!(add.definition().input_schema["required"], json!(["a", "b"]));
        let output = add.invoke(json!({"a": 2, "b": 3})).await.unwrap();
        assert_eq!(output, ToolOutput::Text("5".into()));

        let err = tools[1].invoke(json!({})).await.unwrap_err();
        assert!(matches!(err, TollgateError::Tool(ref m) if m.contains("tool exploded")));

        session.close().await;
        let err = add.invoke(json!({"a": 1, "b": 1})).await.unwrap_err();
        assert!(matches!(err, TollgateError::Tool(ref m) if m == "MCP session closed"));
    }

    #[tokio::test]
    async fn test_skips_unrelated_and_blank_lines() {
        let (transport, _host) = fake_host(|message| {
            let mut replies = standard_host(message);
            if message["method"] == "tools/list" {
                replies.insert(0, String::new());
                replies.insert(1, r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#.into());
                replies.insert(2, reply(&json!({"id": 999}), json!({"tools": []})));
            }
            replies
        });
        let session = McpSession::open("fake", transport).await.unwrap();
        assert_eq!(session.list_tools().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_initialize_result_still_opens() {
        let (transport, _host) = fake_host(|message| match message["method"].as_str() {
            Some("initialize") => vec![reply(message, json!({"serverInfo": "not an object"}))],
            _ => standard_host(message),
        });
        let session = McpSession::open("fake", transport).await.unwrap();
        assert!(session.server_info().is_none());
        assert_eq!(session.list_tools().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let (transport, _host) = fake_host(|message| {
            if message["method"] == "initialize" {
                vec!["not json".to_string()]
            } else {
                Vec::new()
            }
        });
        let err = McpSession::open("fake", transport).await.unwrap_err();
        assert!(matches!(err, TollgateError::Protocol(ref m) if m == "Invalid MCP response"));
    }

    #[tokio::test]
    async fn test_host_hangup() {
        let (client, host) = tokio::io::duplex(1024);
        drop(host);
        let (read, write) = tokio::io::split(client);
        let err = McpSession::open("gone", Box::new(StreamTransport::new(read, write)))
            .await
            .unwrap_err();
        // Writing may fail first on a dropped pipe; either way the call fails.
        assert!(matches!(
            err,
            TollgateError::Provider(_) | TollgateError::Transport(_)
        ));
    }

    #[tokio::test]
    async fn test_host_error_is_provider_error() {
        let (transport, _host) = fake_host(|message| {
            vec![serde_json::to_string(&JsonRpcResponse::error(
                message["id"].as_u64().unwrap_or(0),
                JsonRpcError::method_not_found(),
            ))
            .unwrap()]
        });
        let err = McpSession::open("fake", transport).await.unwrap_err();
        assert!(matches!(err, TollgateError::Provider(ref m) if m == "Method not found"));
    }

    #[tokio::test]
    async fn test_scope_closes_on_error() {
        let (transport, _host) = fake_host(standard_host);
        let session = McpSession::open("fake", transport).await.unwrap();
        let observer = session.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let outcome: Result<()> = session
            .scope(|tools| async move {
                seen.fetch_add(tools.len(), Ordering::SeqCst);
                Err(TollgateError::Other("caller failed".into()))
            })
            .await;

        assert!(matches!(outcome, Err(TollgateError::Other(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(observer.is_closed().await);
    }

    #[tokio::test]
    async fn test_timed_out_call_leaves_session_usable() {
        let (client, host) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (host_read, mut host_write) = tokio::io::split(host);

        // Answers to calls flagged `slow` arrive in two halves
        tokio::spawn(async move {
            let mut lines = BufReader::new(host_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let message: Value = serde_json::from_str(&line).unwrap();
                let slow = message["params"]["arguments"]["slow"] == true;
                for reply in standard_host(&message) {
                    if slow {
                        let (head, tail) = reply.split_at(reply.len() / 2);
                        host_write.write_all(head.as_bytes()).await.unwrap();
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        host_write.write_all(tail.as_bytes()).await.unwrap();
                    } else {
                        host_write.write_all(reply.as_bytes()).await.unwrap();
                    }
                    host_write.write_all(b"\n").await.unwrap();
                }
            }
        });

        let transport = Box::new(StreamTransport::new(client_read, client_write));
        let session = McpSession::open("fake", transport).await.unwrap();
        let tools = session.remote_tools().await.unwrap();
        let add = &tools[0];

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            add.invoke(json!({"a": 1, "b": 1, "slow": true})),
        )
        .await;
        assert!(abandoned.is_err());

        let output = add.invoke(json!({"a": 2, "b": 2})).await.unwrap();
        assert_eq!(output, ToolOutput::Text("4".into()));
        session.close().await;
    }

    #[tokio::test]
    async fn test_with_session_missing_binary() {
        let client = McpClient::stdio("missing", "/nonexistent/tollgate-mcp-host", Vec::new());
        let outcome = client.with_session(|_| async { Ok(()) }).await;
        assert!(matches!(outcome, Err(TollgateError::Transport(_))));
    }
}
