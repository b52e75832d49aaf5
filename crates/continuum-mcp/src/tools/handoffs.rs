//! Session-continuity tools: create_handoff, get_last_handoff,
//! list_handoffs, get_identity_thread, wake_up.

use continuum_core::{
    Engine, HandoffFilter, HandoffInput, RequestContext, Result, WakeInput,
};
use serde::Deserialize;
use serde_json::Value;

use super::parse_args;
use crate::protocol::types::ToolDescription;

pub fn descriptors() -> Vec<ToolDescription> {
    vec![
        ToolDescription {
            name: "create_handoff".to_string(),
            description: Some(
                "Preserve a session as a structured handoff: what was experienced, noticed, \
                 and learned, the identity trajectory (becoming), and what the next session \
                 should remember."
                    .to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "with_whom": {"type": "string", "description": "Counterpart identity"},
                    "experienced": {"type": "string"},
                    "noticed": {"type": "string"},
                    "learned": {"type": "string"},
                    "story": {"type": "string"},
                    "becoming": {"type": "string", "description": "Identity-trajectory statement"},
                    "remember": {"type": "string"},
                    "significance": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "parent_handoff_id": {"type": "string"},
                    "influenced_by": {"type": "string"},
                    "op_id": {"type": "string", "description": "Idempotency key for WAL replay"}
                },
                "required": ["session_id", "with_whom", "experienced", "noticed", "learned", "remember", "significance"]
            }),
        },
        ToolDescription {
            name: "get_last_handoff".to_string(),
            description: Some("Most recent handoff, optionally for one counterpart.".to_string()),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "with_whom": {"type": "string"},
                    "expand": {"type": "boolean", "description": "Return raw fields regardless of compression level"}
                }
            }),
        },
        ToolDescription {
            name: "list_handoffs".to_string(),
            description: Some(
                "Keyset-paginated handoff listing, newest first. Pass the returned cursor to \
                 fetch the next page."
                    .to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "with_whom": {"type": "string"},
                    "session_id": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 100, "default": 20},
                    "cursor": {"type": "string"},
                    "expand": {"type": "boolean"}
                }
            }),
        },
        ToolDescription {
            name: "get_identity_thread".to_string(),
            description: Some(
                "Ordered becoming statements for a counterpart - the identity trajectory."
                    .to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "with_whom": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 100, "default": 20}
                }
            }),
        },
        ToolDescription {
            name: "wake_up".to_string(),
            description: Some(
                "One-call session start: recent handoffs at their compression levels, the \
                 identity thread, active project/global decisions, and live capsules."
                    .to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "with_whom": {"type": "string"},
                    "layers": {
                        "type": "array",
                        "items": {"type": "string", "enum": ["handoffs", "identity", "decisions", "capsules"]}
                    },
                    "recent_count": {"type": "integer", "minimum": 1, "maximum": 20, "default": 3}
                },
                "required": ["with_whom"]
            }),
        },
    ]
}

pub async fn execute_create_handoff(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let input: HandoffInput = parse_args(args)?;
    let handoff = engine.ops.create_handoff(ctx, input)?;
    Ok(serde_json::json!({
        "handoff_id": handoff.id,
        "compression_level": handoff.compression_level,
        "created_at": handoff.created_at,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GetLastArgs {
    #[serde(default)]
    with_whom: Option<String>,
    #[serde(default)]
    expand: bool,
}

pub async fn execute_get_last_handoff(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: GetLastArgs = parse_args(args)?;
    let handoff = engine
        .ops
        .get_last_handoff(ctx, args.with_whom.as_deref(), args.expand)?;
    Ok(serde_json::json!({ "handoff": handoff }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListArgs {
    #[serde(default)]
    with_whom: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    expand: bool,
}

pub async fn execute_list_handoffs(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: ListArgs = parse_args(args)?;
    let filter = HandoffFilter {
        with_whom: args.with_whom,
        session_id: args.session_id,
    };
    let (handoffs, next_cursor) =
        engine
            .ops
            .list_handoffs(ctx, filter, args.limit, args.cursor.as_deref(), args.expand)?;
    Ok(serde_json::json!({
        "total": handoffs.len(),
        "handoffs": handoffs,
        "next_cursor": next_cursor,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ThreadArgs {
    #[serde(default)]
    with_whom: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

pub async fn execute_get_identity_thread(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: ThreadArgs = parse_args(args)?;
    let thread = engine
        .ops
        .get_identity_thread(ctx, args.with_whom.as_deref(), args.limit)?;
    Ok(serde_json::json!({
        "total": thread.len(),
        "identity_thread": thread,
    }))
}

pub async fn execute_wake_up(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let input: WakeInput = parse_args(args)?;
    let bundle = engine.ops.wake_up(ctx, input)?;
    Ok(serde_json::to_value(bundle)
        .map_err(|e| continuum_core::MemoryError::Permanent(e.to_string()))?)
}

// ============================================================================
// TESTS
// ============================================================================
