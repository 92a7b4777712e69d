//! Integration tests for the tools module

use super::*;
use crate::error::TollgateError;
use crate::gate::{Gates, KeyedSemaphore, RateLimiter};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A simple echo tool for testing
struct EchoTool {
    schema: Value,
}

impl EchoTool {
    fn new() -> Self {
        Self {
            schema: json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string" }
                },
                "required": ["message"]
            }),
        }
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> Option<&str> {
        Some("Echoes input back")
    }

    fn schema(&self) -> Option<&Value> {
        Some(&self.schema)
    }

    async fn invoke(&self, args: Value) -> crate::error::Result<ToolOutput> {
        Ok(args["message"].clone().into())
    }
}

/// A tool that tracks how many copies of itself run at once
struct SlowTool {
    delay: Duration,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowTool {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    async fn invoke(&self, _args: Value) -> crate::error::Result<ToolOutput> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({"done": true}).into())
    }
}

#[tokio::test]
async fn test_registry_with_struct_tool() {
    let registry = ToolRegistry::new();
    registry.register(Arc::new(EchoTool::new())).unwrap();

    let def = &registry.definitions()[0];
    assert_eq!(def.name, "echo");
    assert_eq!(def.description.as_deref(), Some("Echoes input back"));

    let echo = registry.fetch("echo").unwrap();
    let out = call_tool(echo.as_ref(), json!({"message": "hello"}))
        .await
        .unwrap();
    assert_eq!(out, ToolOutput::Text("hello".into()));
}

#[tokio::test]
async fn test_struct_tool_required_argument() {
    let err = call_tool(&EchoTool::new(), json!({"msg": "typo"}))
        .await
        .unwrap_err();
    assert!(matches!(err, TollgateError::Tool(ref m) if m.contains("message")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_per_tool_concurrency_limit() {
    let gates = Arc::new(Gates::new());
    gates.set_per_tool_semaphore("slow", KeyedSemaphore::new(2));
    let runtime = ToolRuntime::new(gates, ToolRuntimeConfig::default());
    let tool = Arc::new(SlowTool::new(Duration::from_millis(20)));

    let mut handles = Vec::new();
    for _ in 0..6 {
        let runtime = runtime.clone();
        let tool = tool.clone();
        handles.push(tokio::spawn(async move {
            runtime.execute(tool.as_ref(), json!({}), None).await
        }));
    }
    for handle in handles {
        let out = handle.await.unwrap().unwrap();
        assert_eq!(out.structured(), Some(&json!({"done": true})));
    }

    assert!(tool.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test(start_paused = true)]
async fn test_tool_rate_limiter_spaces_calls() {
    let gates = Arc::new(Gates::new());
    gates.set_tool_rate_limiter("echo", Arc::new(RateLimiter::new(10.0, Some(1.0))));
    let runtime = ToolRuntime::new(gates, ToolRuntimeConfig::default());
    let echo = EchoTool::new();

    let start = tokio::time::Instant::now();
    for _ in 0..3 {
        runtime
            .execute(&echo, json!({"message": "hi"}), None)
            .await
            .unwrap();
    }

    // First call uses the burst token, the next two wait 100ms each
    assert!(start.elapsed() >= Duration::from_millis(200));
}
