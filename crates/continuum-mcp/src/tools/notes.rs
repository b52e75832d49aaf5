//! Notes & principles tools: create_knowledge_note, remember_note,
//! get_knowledge_notes, list_semantic_principles, create_decision.

use continuum_core::{
    DecisionScope, Engine, MemoryError, NoteInput, RequestContext, Result,
};
use serde::Deserialize;
use serde_json::Value;

use super::parse_args;
use crate::protocol::types::ToolDescription;

pub fn descriptors() -> Vec<ToolDescription> {
    vec![
        ToolDescription {
            name: "create_knowledge_note".to_string(),
            description: Some(
                "Store a durable fact, preference, or principle with tags, an optional \
                 project pin, and source handoffs."
                    .to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string"},
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "project_path": {"type": "string"},
                    "source_handoffs": {"type": "array", "items": {"type": "string"}},
                    "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0, "default": 0.8},
                    "op_id": {"type": "string"}
                },
                "required": ["text"]
            }),
        },
        ToolDescription {
            name: "remember_note".to_string(),
            description: Some(
                "Quick capture: only text is required. The counterpart, when given, is \
                 recorded as a tag."
                    .to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string"},
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "with_whom": {"type": "string"},
                    "op_id": {"type": "string"}
                },
                "required": ["text"]
            }),
        },
        ToolDescription {
            name: "get_knowledge_notes".to_string(),
            description: Some("List knowledge notes, optionally pinned to a project.".to_string()),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "project_path": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 100, "default": 20}
                }
            }),
        },
        ToolDescription {
            name: "list_semantic_principles".to_string(),
            description: Some(
                "Consolidated principles: active global-scope decisions, including those \
                 distilled from identity threads."
                    .to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer", "minimum": 1, "maximum": 100, "default": 20}
                }
            }),
        },
        ToolDescription {
            name: "create_decision".to_string(),
            description: Some(
                "Record a decision. With supersedes, the superseded decision's status flips \
                 in the same transaction."
                    .to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "scope": {"type": "string", "enum": ["session", "project", "global"]},
                    "text": {"type": "string"},
                    "supersedes": {"type": "string"},
                    "op_id": {"type": "string"}
                },
                "required": ["scope", "text"]
            }),
        },
    ]
}

pub async fn execute_create_knowledge_note(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let input: NoteInput = parse_args(args)?;
    let note = engine.ops.create_knowledge_note(ctx, input)?;
    Ok(serde_json::json!({
        "note_id": note.id,
        "created_at": note.created_at,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RememberArgs {
    text: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    with_whom: Option<String>,
}

pub async fn execute_remember_note(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: RememberArgs = parse_args(args)?;
    let note = engine
        .ops
        .remember_note(ctx, args.text, args.tags, args.with_whom)?;
    Ok(serde_json::json!({
        "note_id": note.id,
        "tags": note.tags,
        "created_at": note.created_at,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GetNotesArgs {
    #[serde(default)]
    project_path: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

pub async fn execute_get_knowledge_notes(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: GetNotesArgs = parse_args(args)?;
    let notes = engine
        .ops
        .get_knowledge_notes(ctx, args.project_path.as_deref(), args.limit)?;
    Ok(serde_json::json!({
        "total": notes.len(),
        "notes": notes,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PrinciplesArgs {
    #[serde(default)]
    limit: Option<usize>,
}

pub async fn execute_list_semantic_principles(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: PrinciplesArgs = parse_args(args)?;
    let principles = engine.ops.list_semantic_principles(ctx, args.limit)?;
    Ok(serde_json::json!({
        "total": principles.len(),
        "principles": principles,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DecisionArgs {
    scope: String,
    text: String,
    #[serde(default)]
    supersedes: Option<String>,
}

pub async fn execute_create_decision(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: DecisionArgs = parse_args(args)?;
    let scope = DecisionScope::parse_name(&args.scope)
        .ok_or_else(|| MemoryError::Validation(format!("unknown scope '{}'", args.scope)))?;
    let decision = engine
        .ops
        .create_decision(ctx, scope, args.text, args.supersedes)?;
    Ok(serde_json::json!({
        "decision_id": decision.id,
        "scope": decision.scope,
        "status": decision.status,
        "supersedes": decision.supersedes,
        "created_at": decision.created_at,
    }))
}

// ============================================================================
// TESTS
// ============================================================================
