//! Feedback tools: agent_feedback, get_agent_feedback, update_agent_feedback.

use continuum_core::{
    Engine, FeedbackKind, FeedbackStatus, MemoryError, RequestContext, Result,
};
use serde::Deserialize;
use serde_json::Value;

use super::parse_args;
use crate::protocol::types::ToolDescription;

pub fn descriptors() -> Vec<ToolDescription> {
    vec![
        ToolDescription {
            name: "agent_feedback".to_string(),
            description: Some(
                "File feedback about the memory system itself: friction, bug, suggestion, \
                 or praise."
                    .to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "kind": {"type": "string", "enum": ["friction", "bug", "suggestion", "praise"]},
                    "text": {"type": "string"},
                    "op_id": {"type": "string"}
                },
                "required": ["kind", "text"]
            }),
        },
        ToolDescription {
            name: "get_agent_feedback".to_string(),
            description: Some("List feedback, optionally filtered by status.".to_string()),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "status": {"type": "string", "enum": ["open", "reviewed", "addressed", "rejected"]},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 100, "default": 20}
                }
            }),
        },
        ToolDescription {
            name: "update_agent_feedback".to_string(),
            description: Some(
                "Transition a feedback item: open to reviewed/addressed/rejected, reviewed to \
                 addressed/rejected. Terminal states are frozen."
                    .to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "feedback_id": {"type": "string"},
                    "status": {"type": "string", "enum": ["reviewed", "addressed", "rejected"]},
                    "op_id": {"type": "string"}
                },
                "required": ["feedback_id", "status"]
            }),
        },
    ]
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SubmitArgs {
    kind: String,
    text: String,
}

pub async fn execute_agent_feedback(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: SubmitArgs = parse_args(args)?;
    let kind = FeedbackKind::parse_name(&args.kind)
        .ok_or_else(|| MemoryError::Validation(format!("unknown feedback kind '{}'", args.kind)))?;
    let feedback = engine.ops.submit_feedback(ctx, kind, args.text)?;
    Ok(serde_json::json!({
        "feedback_id": feedback.id,
        "status": feedback.status,
        "created_at": feedback.created_at,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GetArgs {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

pub async fn execute_get_agent_feedback(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: GetArgs = parse_args(args)?;
    let status = args
        .status
        .as_deref()
        .map(|s| {
            FeedbackStatus::parse_name(s)
                .ok_or_else(|| MemoryError::Validation(format!("unknown status '{s}'")))
        })
        .transpose()?;
    let feedback = engine.ops.get_agent_feedback(ctx, status, args.limit)?;
    Ok(serde_json::json!({
        "total": feedback.len(),
        "feedback": feedback,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateArgs {
    feedback_id: String,
    status: String,
}

pub async fn execute_update_agent_feedback(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: UpdateArgs = parse_args(args)?;
    let status = FeedbackStatus::parse_name(&args.status)
        .ok_or_else(|| MemoryError::Validation(format!("unknown status '{}'", args.status)))?;
    let feedback = engine
        .ops
        .update_feedback_status(ctx, &args.feedback_id, status)?;
    Ok(serde_json::json!({
        "feedback_id": feedback.id,
        "status": feedback.status,
    }))
}

// ============================================================================
// TESTS
// ============================================================================
