//! Consolidation & observability tools: run_consolidation,
//! get_compression_stats, get_system_health, get_next_actions,
//! get_quick_reference.

use chrono::Utc;
use continuum_core::{
    CompressionLevel, Engine, FeedbackStatus, HandoffFilter, MemoryError, RequestContext,
    Result, TickKind,
};
use serde::Deserialize;
use serde_json::Value;

use super::parse_args;
use crate::protocol::types::ToolDescription;

pub fn descriptors() -> Vec<ToolDescription> {
    vec![
        ToolDescription {
            name: "run_consolidation".to_string(),
            description: Some(
                "Manually trigger a consolidation tick (daily, weekly, or monthly). Returns \
                 per-job outcomes; a job already running returns its existing id."
                    .to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "tick": {"type": "string", "enum": ["daily", "weekly", "monthly"], "default": "daily"}
                }
            }),
        },
        ToolDescription {
            name: "get_compression_stats".to_string(),
            description: Some(
                "Rolling compression counters per day and compression type, including \
                 estimated tokens saved."
                    .to_string(),
            ),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        },
        ToolDescription {
            name: "get_system_health".to_string(),
            description: Some(
                "Row counts per entity, embedding coverage, and recent consolidation jobs."
                    .to_string(),
            ),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        },
        ToolDescription {
            name: "get_next_actions".to_string(),
            description: Some(
                "Open work: todo/doing tasks of a project node plus open feedback.".to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "project_node_id": {"type": "string"}
                }
            }),
        },
        ToolDescription {
            name: "get_quick_reference".to_string(),
            description: Some(
                "One-line quick_ref digests of compressed handoffs, newest first.".to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "with_whom": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 100, "default": 20}
                }
            }),
        },
    ]
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConsolidateArgs {
    #[serde(default = "default_tick")]
    tick: String,
}

fn default_tick() -> String {
    "daily".to_string()
}

pub async fn execute_run_consolidation(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: ConsolidateArgs = parse_args(args)?;
    let tick = TickKind::parse_name(&args.tick)
        .ok_or_else(|| MemoryError::Validation(format!("unknown tick '{}'", args.tick)))?;
    let report = engine
        .consolidation
        .run_tick(&ctx.tenant_id, tick, Utc::now());
    serde_json::to_value(report).map_err(|e| MemoryError::Permanent(e.to_string()))
}

pub async fn execute_get_compression_stats(
    engine: &Engine,
    ctx: &RequestContext,
    _args: Option<Value>,
) -> Result<Value> {
    let stats = engine.store.compression_stats(&ctx.tenant_id)?;
    Ok(serde_json::json!({
        "total": stats.len(),
        "stats": stats,
    }))
}

pub async fn execute_get_system_health(
    engine: &Engine,
    ctx: &RequestContext,
    _args: Option<Value>,
) -> Result<Value> {
    let counts = engine.store.counts(&ctx.tenant_id)?;
    let jobs = engine.store.list_jobs(&ctx.tenant_id, 10)?;
    let embeddable =
        counts.handoffs + counts.notes + counts.feedback + counts.capsules;
    let coverage = if embeddable > 0 {
        counts.embeddings as f64 / embeddable as f64
    } else {
        1.0
    };
    Ok(serde_json::json!({
        "status": "ok",
        "version": continuum_core::VERSION,
        "counts": counts,
        "embedding_coverage": coverage,
        "recent_jobs": jobs,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NextActionsArgs {
    #[serde(default)]
    project_node_id: Option<String>,
}

pub async fn execute_get_next_actions(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: NextActionsArgs = parse_args(args)?;
    let tasks = match &args.project_node_id {
        Some(project) => {
            let board = engine.graph.get_project_tasks(ctx, project)?;
            serde_json::json!({
                "todo": board.todo,
                "doing": board.doing,
            })
        }
        None => serde_json::json!(null),
    };
    let open_feedback =
        engine
            .ops
            .get_agent_feedback(ctx, Some(FeedbackStatus::Open), Some(20))?;
    Ok(serde_json::json!({
        "tasks": tasks,
        "open_feedback": open_feedback,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct QuickRefArgs {
    #[serde(default)]
    with_whom: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

pub async fn execute_get_quick_reference(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: QuickRefArgs = parse_args(args)?;
    let limit = args.limit.unwrap_or(20).clamp(1, 100);
    let handoffs = engine.store.list_handoffs(
        &ctx.tenant_id,
        &HandoffFilter {
            with_whom: args.with_whom,
            session_id: None,
        },
        100,
        None,
    )?;
    let lines: Vec<Value> = handoffs
        .into_iter()
        .filter(|h| h.compression_level >= CompressionLevel::QuickRef)
        .filter_map(|h| {
            h.quick_ref.as_ref().map(|line| {
                serde_json::json!({
                    "handoff_id": h.id,
                    "quick_ref": line,
                    "created_at": h.created_at,
                })
            })
        })
        .take(limit)
        .collect();
    Ok(serde_json::json!({
        "total": lines.len(),
        "quick_reference": lines,
    }))
}

// ============================================================================
// TESTS
// ============================================================================
