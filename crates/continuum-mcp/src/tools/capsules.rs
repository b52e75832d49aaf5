//! Capsule tools: create_capsule, get_capsules, revoke_capsule.

use continuum_core::{CapsuleInput, Engine, RequestContext, Result};
use serde::Deserialize;
use serde_json::Value;

use super::parse_args;
use crate::protocol::types::ToolDescription;

pub fn descriptors() -> Vec<ToolDescription> {
    vec![
        ToolDescription {
            name: "create_capsule".to_string(),
            description: Some(
                "Bundle chunks, decisions, and artifacts for an audience of agents within \
                 the tenant. `*` in the audience means any agent. Expires after ttl_days \
                 (default 7)."
                    .to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "scope": {"type": "string", "enum": ["session", "user", "project", "policy", "global"], "default": "user"},
                    "subject_type": {"type": "string"},
                    "subject_id": {"type": "string"},
                    "audience_agent_ids": {"type": "array", "items": {"type": "string"}},
                    "ttl_days": {"type": "integer", "minimum": 0, "default": 7},
                    "items": {
                        "type": "object",
                        "properties": {
                            "chunks": {"type": "array", "items": {"type": "string"}},
                            "decisions": {"type": "array", "items": {"type": "string"}},
                            "artifacts": {"type": "array", "items": {"type": "string"}}
                        }
                    },
                    "risks": {"type": "array", "items": {"type": "string"}},
                    "op_id": {"type": "string"}
                },
                "required": ["subject_type", "subject_id"]
            }),
        },
        ToolDescription {
            name: "get_capsules".to_string(),
            description: Some(
                "Capsules visible to the caller, with clock-derived status; expired capsules \
                 read as status=expired."
                    .to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "include_expired": {"type": "boolean", "default": true},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 100, "default": 20}
                }
            }),
        },
        ToolDescription {
            name: "revoke_capsule".to_string(),
            description: Some(
                "Revoke a live capsule. Author-only, except global-scope capsules which any \
                 audience member may revoke. Expired capsules cannot be written."
                    .to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "capsule_id": {"type": "string"},
                    "op_id": {"type": "string"}
                },
                "required": ["capsule_id"]
            }),
        },
    ]
}

pub async fn execute_create_capsule(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let input: CapsuleInput = parse_args(args)?;
    let capsule = engine.ops.create_capsule(ctx, input)?;
    Ok(serde_json::json!({
        "capsule_id": capsule.id,
        "status": capsule.status,
        "expires_at": capsule.expires_at,
        "created_at": capsule.created_at,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GetCapsulesArgs {
    #[serde(default = "default_true")]
    include_expired: bool,
    #[serde(default)]
    limit: Option<usize>,
}

fn default_true() -> bool {
    true
}

pub async fn execute_get_capsules(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: GetCapsulesArgs = parse_args(args)?;
    let capsules = engine
        .ops
        .get_capsules(ctx, args.include_expired, args.limit)?;
    Ok(serde_json::json!({
        "total": capsules.len(),
        "capsules": capsules,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RevokeArgs {
    capsule_id: String,
}

pub async fn execute_revoke_capsule(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: RevokeArgs = parse_args(args)?;
    let capsule = engine.ops.revoke_capsule(ctx, &args.capsule_id)?;
    Ok(serde_json::json!({
        "capsule_id": capsule.id,
        "status": capsule.status,
    }))
}

// ============================================================================
// TESTS
// ============================================================================
