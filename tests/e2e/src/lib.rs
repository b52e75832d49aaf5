//! End-to-end test harness.
//!
//! Drives the engine through the real dispatcher, exactly as an agent would
//! over HTTP, with isolated per-test databases and two seeded tenants.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;

use continuum_core::embeddings::HashingEmbedder;
use continuum_core::{Engine, EngineConfig, Store};
use continuum_mcp::protocol::types::{JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};
use continuum_mcp::{DispatchOutcome, McpDispatcher, StaticTokenProvider, TenantContext};

/// Token for tenant `t1`, principal `Callin`
pub const TOKEN_T1: &str = "tok-t1";
/// Token for tenant `t2`, principal `Mallory`
pub const TOKEN_T2: &str = "tok-t2";
/// Dev token for tenant `default`
pub const DEV_TOKEN: &str = "test-mcp-token";

/// Structured error surfaced by a failed call
#[derive(Debug)]
pub struct CallError {
    pub code: i64,
    pub kind: String,
    pub message: String,
}

/// One dispatcher over one temporary database
pub struct Harness {
    pub dispatcher: McpDispatcher,
    pub engine: Arc<Engine>,
    _dir: TempDir,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let store = Arc::new(
            Store::open(
                Some(dir.path().join("e2e.db")),
                continuum_core::DEFAULT_DIMENSION,
            )
            .expect("store opens"),
        );
        let engine = Arc::new(Engine::new(
            store,
            Arc::new(HashingEmbedder::default()),
            None,
            EngineConfig::default(),
        ));
        let identity = Arc::new(
            StaticTokenProvider::new()
                .with_token(TOKEN_T1, TenantContext::new("t1", "Callin"))
                .with_token(TOKEN_T2, TenantContext::new("t2", "Mallory"))
                .with_dev_token(DEV_TOKEN),
        );
        let dispatcher = McpDispatcher::new(engine.clone(), identity, Duration::from_secs(30));
        Self {
            dispatcher,
            engine,
            _dir: dir,
        }
    }

    /// Raw JSON-RPC dispatch
    pub async fn rpc(
        &self,
        token: Option<&str>,
        method: &str,
        params: Value,
    ) -> DispatchOutcome {
        self.dispatcher
            .dispatch(
                token,
                JsonRpcRequest {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    id: Some(Value::from(1)),
                    method: method.to_string(),
                    params: Some(params),
                },
            )
            .await
    }

    /// Call one tool; unwraps the MCP content envelope into the tool's JSON
    pub async fn call(
        &self,
        token: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<Value, CallError> {
        let outcome = self
            .rpc(
                Some(token),
                "tools/call",
                serde_json::json!({"name": tool, "arguments": arguments}),
            )
            .await;
        let response = match outcome {
            DispatchOutcome::Reply(response) => response,
            DispatchOutcome::Unauthorized(message) => {
                return Err(CallError {
                    code: 401,
                    kind: "unauthenticated".to_string(),
                    message,
                });
            }
            DispatchOutcome::NoReply => {
                return Err(CallError {
                    code: 0,
                    kind: "no_reply".to_string(),
                    message: "unexpected notification handling".to_string(),
                });
            }
        };
        unwrap_response(response)
    }
}

/// Split a JSON-RPC response into tool JSON or a structured error
pub fn unwrap_response(response: JsonRpcResponse) -> Result<Value, CallError> {
    if let Some(error) = response.error {
        let kind = error
            .data
            .as_ref()
            .and_then(|d| d.get("kind"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        return Err(CallError {
            code: error.code as i64,
            kind,
            message: error.message,
        });
    }
    let result = response.result.unwrap_or(Value::Null);
    let text = result["content"][0]["text"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    serde_json::from_str(&text).map_err(|e| CallError {
        code: 0,
        kind: "bad_envelope".to_string(),
        message: format!("tool result was not JSON: {e}"),
    })
}
