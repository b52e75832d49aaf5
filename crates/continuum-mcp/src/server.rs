//! MCP Dispatcher
//!
//! Stateless JSON-RPC 2.0 dispatch: verify the bearer token, inject the
//! tenant context, enforce the payload tenant guard, honor `op_id`
//! idempotency for mutating tools, and route to the tool registry under a
//! per-call deadline.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use continuum_core::{Engine, MemoryError, RequestContext};

use crate::auth::IdentityProvider;
use crate::protocol::types::{
    CallToolRequest, CallToolResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, ToolDescription, ToolResultContent, JSONRPC_VERSION, MCP_VERSION,
};
use crate::tools;

/// Tools whose results are recorded under `op_id` for at-most-once replay
const MUTATING_TOOLS: &[&str] = &[
    "create_handoff",
    "create_knowledge_note",
    "remember_note",
    "create_decision",
    "create_capsule",
    "revoke_capsule",
    "agent_feedback",
    "update_agent_feedback",
    "create_edge",
    "update_edge_properties",
    "delete_edge",
];

/// Outcome of one dispatched request
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Missing or invalid bearer token; transport answers HTTP 401
    Unauthorized(String),
    /// JSON-RPC response body; transport answers HTTP 200
    Reply(JsonRpcResponse),
    /// Notification; transport answers HTTP 202 with no body
    NoReply,
}

/// The MCP dispatcher
pub struct McpDispatcher {
    engine: Arc<Engine>,
    identity: Arc<dyn IdentityProvider>,
    request_deadline: Duration,
}

impl McpDispatcher {
    pub fn new(
        engine: Arc<Engine>,
        identity: Arc<dyn IdentityProvider>,
        request_deadline: Duration,
    ) -> Self {
        Self {
            engine,
            identity,
            request_deadline,
        }
    }

    /// The complete tool registry, as served by `tools/list`
    pub fn tool_descriptors() -> Vec<ToolDescription> {
        let mut descriptors = Vec::new();
        descriptors.extend(tools::handoffs::descriptors());
        descriptors.extend(tools::notes::descriptors());
        descriptors.extend(tools::capsules::descriptors());
        descriptors.extend(tools::feedback::descriptors());
        descriptors.extend(tools::graph::descriptors());
        descriptors.extend(tools::recall::descriptors());
        descriptors.extend(tools::observe::descriptors());
        descriptors
    }

    /// Dispatch one JSON-RPC request. Every method requires authentication;
    /// the health endpoint lives outside the dispatcher entirely.
    pub async fn dispatch(
        &self,
        bearer: Option<&str>,
        request: JsonRpcRequest,
    ) -> DispatchOutcome {
        let token = match bearer {
            Some(t) if !t.is_empty() => t,
            _ => return DispatchOutcome::Unauthorized("missing bearer token".to_string()),
        };
        let tenant = match self.identity.verify(token) {
            Ok(ctx) => ctx,
            Err(e) => {
                debug!("auth failed: {e}");
                return DispatchOutcome::Unauthorized("invalid bearer token".to_string());
            }
        };

        if request.jsonrpc != JSONRPC_VERSION {
            return DispatchOutcome::Reply(JsonRpcResponse::error(
                request.id,
                JsonRpcError::invalid_request("jsonrpc must be \"2.0\""),
            ));
        }

        debug!(method = %request.method, tenant = %tenant.tenant_id, "dispatching");

        match request.method.as_str() {
            "initialize" => DispatchOutcome::Reply(JsonRpcResponse::success(
                request.id,
                serde_json::json!({
                    "protocolVersion": MCP_VERSION,
                    "serverInfo": {
                        "name": "continuum",
                        "version": continuum_core::VERSION,
                    },
                    "capabilities": {
                        "tools": {"listChanged": false},
                    },
                    "instructions":
                        "Continuum is your persistent memory across sessions. Call wake_up at \
                         session start, create_handoff at session end, and recall whenever \
                         past context would help.",
                }),
            )),
            "notifications/initialized" => DispatchOutcome::NoReply,
            "ping" => {
                DispatchOutcome::Reply(JsonRpcResponse::success(request.id, serde_json::json!({})))
            }
            "tools/list" => {
                let result = ListToolsResult {
                    tools: Self::tool_descriptors(),
                };
                match serde_json::to_value(result) {
                    Ok(value) => {
                        DispatchOutcome::Reply(JsonRpcResponse::success(request.id, value))
                    }
                    Err(e) => DispatchOutcome::Reply(JsonRpcResponse::error(
                        request.id,
                        JsonRpcError::internal_error(&e.to_string()),
                    )),
                }
            }
            "tools/call" => self.handle_tools_call(tenant, request).await,
            method => {
                warn!("unknown method: {method}");
                DispatchOutcome::Reply(JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::method_not_found(&format!("unknown method '{method}'")),
                ))
            }
        }
    }

    async fn handle_tools_call(
        &self,
        tenant: crate::auth::TenantContext,
        request: JsonRpcRequest,
    ) -> DispatchOutcome {
        let call: CallToolRequest = match request.params.clone() {
            Some(params) => match serde_json::from_value(params) {
                Ok(call) => call,
                Err(e) => {
                    return DispatchOutcome::Reply(JsonRpcResponse::error(
                        request.id,
                        JsonRpcError::invalid_params(&e.to_string()),
                    ));
                }
            },
            None => {
                return DispatchOutcome::Reply(JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::invalid_params("missing tool call parameters"),
                ));
            }
        };

        // Tenant guard: a payload tenant_id is overwritten with the
        // authenticated tenant; a conflicting one fails the call.
        let mut arguments = call.arguments;
        let mut op_id: Option<String> = None;
        if let Some(Value::Object(map)) = &mut arguments {
            if let Some(payload_tenant) = map.remove("tenant_id") {
                let payload = payload_tenant.as_str().unwrap_or_default().to_string();
                if payload != tenant.tenant_id {
                    let err = MemoryError::TenantMismatch {
                        payload,
                        authenticated: tenant.tenant_id.clone(),
                    };
                    return DispatchOutcome::Reply(JsonRpcResponse::error(
                        request.id,
                        JsonRpcError::from_memory_error(&err),
                    ));
                }
            }
            if let Some(value) = map.remove("op_id") {
                match value.as_str() {
                    Some(op) if !op.is_empty() => op_id = Some(op.to_string()),
                    _ => {
                        return DispatchOutcome::Reply(JsonRpcResponse::error(
                            request.id,
                            JsonRpcError::invalid_params("op_id must be a non-empty string"),
                        ));
                    }
                }
            }
        }

        let deadline = chrono::Duration::from_std(self.request_deadline)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let ctx = RequestContext {
            tenant_id: tenant.tenant_id.clone(),
            principal_id: tenant.principal_id.clone(),
            scopes: tenant.scopes.clone(),
            deadline: Some(Utc::now() + deadline),
        };

        // At-most-once: a known op_id returns the stored result without
        // re-executing.
        let idempotent = op_id.is_some() && MUTATING_TOOLS.contains(&call.name.as_str());
        if idempotent {
            let op = op_id.as_deref().unwrap_or_default();
            match self.engine.store.idempotency_get(&ctx.tenant_id, op) {
                Ok(Some(stored)) => {
                    debug!(tool = %call.name, op_id = %op, "idempotent replay hit");
                    return DispatchOutcome::Reply(JsonRpcResponse::success(
                        request.id,
                        Self::wrap_tool_result(stored),
                    ));
                }
                Ok(None) => {}
                Err(e) => {
                    return DispatchOutcome::Reply(JsonRpcResponse::error(
                        request.id,
                        JsonRpcError::from_memory_error(&e),
                    ));
                }
            }
        }

        let routed = route(&self.engine, &ctx, &call.name, arguments);
        let Some(future) = routed else {
            return DispatchOutcome::Reply(JsonRpcResponse::error(
                request.id,
                JsonRpcError::method_not_found(&format!("unknown tool '{}'", call.name)),
            ));
        };

        let result = match tokio::time::timeout(self.request_deadline, future).await {
            Ok(result) => result,
            Err(_) => Err(MemoryError::DeadlineExceeded),
        };

        match result {
            Ok(value) => {
                if idempotent {
                    let op = op_id.as_deref().unwrap_or_default();
                    if let Err(e) = self.engine.store.idempotency_put(&ctx.tenant_id, op, &value)
                    {
                        warn!(tool = %call.name, "failed to record idempotency result: {e}");
                    }
                }
                DispatchOutcome::Reply(JsonRpcResponse::success(
                    request.id,
                    Self::wrap_tool_result(value),
                ))
            }
            Err(e) => DispatchOutcome::Reply(JsonRpcResponse::error(
                request.id,
                JsonRpcError::from_memory_error(&e),
            )),
        }
    }

    fn wrap_tool_result(value: Value) -> Value {
        let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
        serde_json::to_value(CallToolResult {
            content: vec![ToolResultContent {
                content_type: "text".to_string(),
                text,
            }],
            is_error: Some(false),
        })
        .unwrap_or(Value::Null)
    }
}

/// Route a tool call to its handler; `None` means the tool does not exist
fn route<'a>(
    engine: &'a Engine,
    ctx: &'a RequestContext,
    name: &str,
    args: Option<Value>,
) -> Option<std::pin::Pin<Box<dyn std::future::Future<Output = continuum_core::Result<Value>> + Send + 'a>>>
{
    use tools::*;

    let future: std::pin::Pin<
        Box<dyn std::future::Future<Output = continuum_core::Result<Value>> + Send + 'a>,
    > = match name {
        // Session continuity
        "wake_up" => Box::pin(handoffs::execute_wake_up(engine, ctx, args)),
        "create_handoff" => Box::pin(handoffs::execute_create_handoff(engine, ctx, args)),
        "get_last_handoff" => Box::pin(handoffs::execute_get_last_handoff(engine, ctx, args)),
        "get_identity_thread" => {
            Box::pin(handoffs::execute_get_identity_thread(engine, ctx, args))
        }
        "list_handoffs" => Box::pin(handoffs::execute_list_handoffs(engine, ctx, args)),

        // Notes & principles
        "create_knowledge_note" => {
            Box::pin(notes::execute_create_knowledge_note(engine, ctx, args))
        }
        "remember_note" => Box::pin(notes::execute_remember_note(engine, ctx, args)),
        "get_knowledge_notes" => Box::pin(notes::execute_get_knowledge_notes(engine, ctx, args)),
        "list_semantic_principles" => {
            Box::pin(notes::execute_list_semantic_principles(engine, ctx, args))
        }
        "create_decision" => Box::pin(notes::execute_create_decision(engine, ctx, args)),

        // Capsules
        "create_capsule" => Box::pin(capsules::execute_create_capsule(engine, ctx, args)),
        "get_capsules" => Box::pin(capsules::execute_get_capsules(engine, ctx, args)),
        "revoke_capsule" => Box::pin(capsules::execute_revoke_capsule(engine, ctx, args)),

        // Feedback
        "agent_feedback" => Box::pin(feedback::execute_agent_feedback(engine, ctx, args)),
        "get_agent_feedback" => Box::pin(feedback::execute_get_agent_feedback(engine, ctx, args)),
        "update_agent_feedback" => {
            Box::pin(feedback::execute_update_agent_feedback(engine, ctx, args))
        }

        // Graph
        "create_edge" => Box::pin(graph::execute_create_edge(engine, ctx, args)),
        "get_edges" => Box::pin(graph::execute_get_edges(engine, ctx, args)),
        "traverse" => Box::pin(graph::execute_traverse(engine, ctx, args)),
        "update_edge_properties" => {
            Box::pin(graph::execute_update_edge_properties(engine, ctx, args))
        }
        "delete_edge" => Box::pin(graph::execute_delete_edge(engine, ctx, args)),
        "get_project_tasks" => Box::pin(graph::execute_get_project_tasks(engine, ctx, args)),
        "resolve_node" => Box::pin(graph::execute_resolve_node(engine, ctx, args)),

        // Retrieval
        "recall" => Box::pin(recall::execute_recall(engine, ctx, args)),
        "semantic_search" => Box::pin(recall::execute_semantic_search(engine, ctx, args)),
        "hybrid_search" => Box::pin(recall::execute_hybrid_search(engine, ctx, args)),

        // Consolidation & observability
        "run_consolidation" => Box::pin(observe::execute_run_consolidation(engine, ctx, args)),
        "get_compression_stats" => {
            Box::pin(observe::execute_get_compression_stats(engine, ctx, args))
        }
        "get_system_health" => Box::pin(observe::execute_get_system_health(engine, ctx, args)),
        "get_next_actions" => Box::pin(observe::execute_get_next_actions(engine, ctx, args)),
        "get_quick_reference" => {
            Box::pin(observe::execute_get_quick_reference(engine, ctx, args))
        }

        _ => return None,
    };
    Some(future)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{StaticTokenProvider, TenantContext};
    use continuum_core::embeddings::HashingEmbedder;
    use continuum_core::{EngineConfig, Store};
    use tempfile::TempDir;

    fn test_dispatcher() -> (McpDispatcher, Arc<Engine>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            Store::open(
                Some(dir.path().join("test.db")),
                continuum_core::DEFAULT_DIMENSION,
            )
            .unwrap(),
        );
        let engine = Arc::new(Engine::new(
            store,
            Arc::new(HashingEmbedder::default()),
            None,
            EngineConfig::default(),
        ));
        let identity = Arc::new(
            StaticTokenProvider::new()
                .with_token("tok-t1", TenantContext::new("t1", "alice"))
                .with_token("tok-t2", TenantContext::new("t2", "bob"))
                .with_dev_token("test-mcp-token"),
        );
        let dispatcher =
            McpDispatcher::new(engine.clone(), identity, Duration::from_secs(30));
        (dispatcher, engine, dir)
    }

    fn rpc(id: i64, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(Value::from(id)),
            method: method.to_string(),
            params: Some(params),
        }
    }

    fn call(id: i64, tool: &str, arguments: Value) -> JsonRpcRequest {
        rpc(
            id,
            "tools/call",
            serde_json::json!({"name": tool, "arguments": arguments}),
        )
    }

    fn expect_reply(outcome: DispatchOutcome) -> JsonRpcResponse {
        match outcome {
            DispatchOutcome::Reply(response) => response,
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_or_bad_token_is_unauthorized() {
        let (dispatcher, _engine, _dir) = test_dispatcher();
        let outcome = dispatcher.dispatch(None, rpc(1, "ping", Value::Null)).await;
        assert!(matches!(outcome, DispatchOutcome::Unauthorized(_)));

        let outcome = dispatcher
            .dispatch(Some("wrong"), rpc(1, "ping", Value::Null))
            .await;
        assert!(matches!(outcome, DispatchOutcome::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_dev_token_reaches_default_tenant() {
        let (dispatcher, _engine, _dir) = test_dispatcher();
        let response = expect_reply(
            dispatcher
                .dispatch(
                    Some("test-mcp-token"),
                    call(1, "get_system_health", serde_json::json!({})),
                )
                .await,
        );
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn test_tools_list_contains_registry() {
        let (dispatcher, _engine, _dir) = test_dispatcher();
        let response = expect_reply(
            dispatcher
                .dispatch(Some("tok-t1"), rpc(1, "tools/list", Value::Null))
                .await,
        );
        let tools = response.result.unwrap();
        let names: Vec<String> = tools["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        for expected in [
            "wake_up",
            "create_handoff",
            "get_last_handoff",
            "get_identity_thread",
            "list_handoffs",
            "create_knowledge_note",
            "remember_note",
            "get_knowledge_notes",
            "list_semantic_principles",
            "create_decision",
            "create_capsule",
            "get_capsules",
            "revoke_capsule",
            "agent_feedback",
            "get_agent_feedback",
            "update_agent_feedback",
            "create_edge",
            "get_edges",
            "traverse",
            "update_edge_properties",
            "delete_edge",
            "get_project_tasks",
            "resolve_node",
            "recall",
            "semantic_search",
            "hybrid_search",
            "run_consolidation",
            "get_compression_stats",
            "get_system_health",
            "get_next_actions",
            "get_quick_reference",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn test_payload_tenant_mismatch() {
        let (dispatcher, _engine, _dir) = test_dispatcher();
        let response = expect_reply(
            dispatcher
                .dispatch(
                    Some("tok-t1"),
                    call(
                        1,
                        "list_handoffs",
                        serde_json::json!({"tenant_id": "t2"}),
                    ),
                )
                .await,
        );
        let error = response.error.unwrap();
        assert_eq!(error.code, -32000);
        assert_eq!(error.data.unwrap()["kind"], "tenant_mismatch");
    }

    #[tokio::test]
    async fn test_matching_payload_tenant_is_tolerated() {
        let (dispatcher, _engine, _dir) = test_dispatcher();
        let response = expect_reply(
            dispatcher
                .dispatch(
                    Some("tok-t1"),
                    call(
                        1,
                        "list_handoffs",
                        serde_json::json!({"tenant_id": "t1"}),
                    ),
                )
                .await,
        );
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn test_unknown_tool_and_method() {
        let (dispatcher, _engine, _dir) = test_dispatcher();
        let response = expect_reply(
            dispatcher
                .dispatch(Some("tok-t1"), call(1, "summon_demon", serde_json::json!({})))
                .await,
        );
        assert_eq!(response.error.unwrap().code, -32601);

        let response = expect_reply(
            dispatcher
                .dispatch(Some("tok-t1"), rpc(1, "bogus/method", Value::Null))
                .await,
        );
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn test_idempotent_create_handoff() {
        let (dispatcher, engine, _dir) = test_dispatcher();
        let args = serde_json::json!({
            "session_id": "s1", "with_whom": "Callin",
            "experienced": "built X", "noticed": "Y", "learned": "Z",
            "remember": "test", "significance": 0.8,
            "op_id": "01HZZZZZZZZZZZZZZZZZZZZZZA"
        });

        let first = expect_reply(
            dispatcher
                .dispatch(Some("tok-t1"), call(1, "create_handoff", args.clone()))
                .await,
        );
        assert!(first.error.is_none());
        let second = expect_reply(
            dispatcher
                .dispatch(Some("tok-t1"), call(2, "create_handoff", args))
                .await,
        );
        assert!(second.error.is_none());

        // Identical stored result, exactly one side effect
        assert_eq!(first.result, second.result);
        assert_eq!(engine.store.counts("t1").unwrap().handoffs, 1);
    }

    #[tokio::test]
    async fn test_tool_error_surfaces_as_jsonrpc_error() {
        let (dispatcher, _engine, _dir) = test_dispatcher();
        let response = expect_reply(
            dispatcher
                .dispatch(
                    Some("tok-t1"),
                    call(1, "recall", serde_json::json!({"query": "x", "limit": 0})),
                )
                .await,
        );
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn test_notification_yields_no_reply() {
        let (dispatcher, _engine, _dir) = test_dispatcher();
        let notification = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: "notifications/initialized".to_string(),
            params: None,
        };
        assert!(matches!(
            dispatcher.dispatch(Some("tok-t1"), notification).await,
            DispatchOutcome::NoReply
        ));
    }

    #[tokio::test]
    async fn test_tenant_rows_never_cross_dispatch() {
        let (dispatcher, _engine, _dir) = test_dispatcher();
        // Tenant 1 writes
        expect_reply(
            dispatcher
                .dispatch(
                    Some("tok-t1"),
                    call(
                        1,
                        "create_handoff",
                        serde_json::json!({
                            "session_id": "s1", "with_whom": "Callin",
                            "experienced": "secret work", "noticed": "n", "learned": "l",
                            "remember": "r", "significance": 0.5
                        }),
                    ),
                )
                .await,
        );

        // Tenant 2 sees nothing
        let response = expect_reply(
            dispatcher
                .dispatch(Some("tok-t2"), call(2, "list_handoffs", serde_json::json!({})))
                .await,
        );
        let text = response.result.unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .to_string();
        let body: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(body["total"], 0);
    }
}
