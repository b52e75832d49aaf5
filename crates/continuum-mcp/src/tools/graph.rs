//! Graph tools: create_edge, get_edges, traverse, update_edge_properties,
//! delete_edge, get_project_tasks, resolve_node.

use continuum_core::{Direction, EdgeType, Engine, MemoryError, RequestContext, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::parse_args;
use crate::protocol::types::ToolDescription;

pub fn descriptors() -> Vec<ToolDescription> {
    vec![
        ToolDescription {
            name: "create_edge".to_string(),
            description: Some(
                "Link two memory nodes with a typed edge. depends_on edges are cycle-checked; \
                 child_of is stored as the flipped parent_of."
                    .to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "from_node_id": {"type": "string"},
                    "to_node_id": {"type": "string"},
                    "type": {"type": "string", "enum": ["parent_of", "child_of", "references", "related_to", "created_by", "depends_on"]},
                    "properties": {"type": "object", "description": "Free-form edge properties, e.g. {status, priority, agent}"},
                    "op_id": {"type": "string"}
                },
                "required": ["from_node_id", "to_node_id", "type"]
            }),
        },
        ToolDescription {
            name: "get_edges".to_string(),
            description: Some("Edges touching a node, by direction and optional type.".to_string()),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "node_id": {"type": "string"},
                    "direction": {"type": "string", "enum": ["in", "out", "both"], "default": "both"},
                    "type": {"type": "string", "enum": ["parent_of", "child_of", "references", "related_to", "created_by", "depends_on"]}
                },
                "required": ["node_id"]
            }),
        },
        ToolDescription {
            name: "traverse".to_string(),
            description: Some(
                "Breadth-first walk from a node, cycle-safe, depth 1-5. Returns {node, edge, \
                 depth} per hop."
                    .to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "node_id": {"type": "string"},
                    "type": {"type": "string", "enum": ["parent_of", "child_of", "references", "related_to", "created_by", "depends_on"]},
                    "direction": {"type": "string", "enum": ["in", "out", "both"], "default": "both"},
                    "depth": {"type": "integer", "minimum": 1, "maximum": 5, "default": 1}
                },
                "required": ["node_id"]
            }),
        },
        ToolDescription {
            name: "update_edge_properties".to_string(),
            description: Some(
                "JSON-merge into an edge's property bag; null values remove keys.".to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "edge_id": {"type": "string"},
                    "properties": {"type": "object"},
                    "op_id": {"type": "string"}
                },
                "required": ["edge_id", "properties"]
            }),
        },
        ToolDescription {
            name: "delete_edge".to_string(),
            description: Some("Delete an edge by id.".to_string()),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "edge_id": {"type": "string"},
                    "op_id": {"type": "string"}
                },
                "required": ["edge_id"]
            }),
        },
        ToolDescription {
            name: "get_project_tasks".to_string(),
            description: Some(
                "Kanban projection: parent_of children of a project node grouped by the \
                 status edge property (todo/doing/done; unknown statuses read as todo)."
                    .to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "project_node_id": {"type": "string"}
                },
                "required": ["project_node_id"]
            }),
        },
        ToolDescription {
            name: "resolve_node".to_string(),
            description: Some(
                "Resolve any memory node id (hof_/kn_/cap_/fb_/dec_) to its backing entity."
                    .to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "node_id": {"type": "string"}
                },
                "required": ["node_id"]
            }),
        },
    ]
}

fn parse_edge_type(s: &str) -> Result<EdgeType> {
    EdgeType::parse_name(s)
        .ok_or_else(|| MemoryError::Validation(format!("unknown edge type '{s}'")))
}

fn parse_direction(s: &str) -> Result<Direction> {
    Direction::parse_name(s)
        .ok_or_else(|| MemoryError::Validation(format!("unknown direction '{s}'")))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateEdgeArgs {
    from_node_id: String,
    to_node_id: String,
    #[serde(rename = "type")]
    edge_type: String,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

pub async fn execute_create_edge(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: CreateEdgeArgs = parse_args(args)?;
    let edge_type = parse_edge_type(&args.edge_type)?;
    let edge = engine.graph.create_edge(
        ctx,
        &args.from_node_id,
        &args.to_node_id,
        edge_type,
        args.properties,
    )?;
    Ok(serde_json::json!({
        "edge_id": edge.id,
        "from_node_id": edge.from_node_id,
        "to_node_id": edge.to_node_id,
        "type": edge.edge_type,
        "properties": edge.properties,
        "created_at": edge.created_at,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GetEdgesArgs {
    node_id: String,
    #[serde(default = "default_direction")]
    direction: String,
    #[serde(rename = "type", default)]
    edge_type: Option<String>,
}

fn default_direction() -> String {
    "both".to_string()
}

pub async fn execute_get_edges(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: GetEdgesArgs = parse_args(args)?;
    let direction = parse_direction(&args.direction)?;
    let edge_type = args.edge_type.as_deref().map(parse_edge_type).transpose()?;
    let edges = engine
        .graph
        .get_edges(ctx, &args.node_id, direction, edge_type)?;
    Ok(serde_json::json!({
        "total": edges.len(),
        "edges": edges,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TraverseArgs {
    node_id: String,
    #[serde(rename = "type", default)]
    edge_type: Option<String>,
    #[serde(default = "default_direction")]
    direction: String,
    #[serde(default = "default_depth")]
    depth: u32,
}

fn default_depth() -> u32 {
    1
}

pub async fn execute_traverse(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: TraverseArgs = parse_args(args)?;
    let direction = parse_direction(&args.direction)?;
    let edge_type = args.edge_type.as_deref().map(parse_edge_type).transpose()?;
    let hits = engine
        .graph
        .traverse(ctx, &args.node_id, edge_type, direction, args.depth)?;
    Ok(serde_json::json!({
        "total": hits.len(),
        "results": hits,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdatePropsArgs {
    edge_id: String,
    properties: Map<String, Value>,
}

pub async fn execute_update_edge_properties(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: UpdatePropsArgs = parse_args(args)?;
    let edge = engine
        .graph
        .update_edge_properties(ctx, &args.edge_id, args.properties)?;
    Ok(serde_json::json!({
        "edge_id": edge.id,
        "properties": edge.properties,
        "updated_at": edge.updated_at,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeleteEdgeArgs {
    edge_id: String,
}

pub async fn execute_delete_edge(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: DeleteEdgeArgs = parse_args(args)?;
    engine.graph.delete_edge(ctx, &args.edge_id)?;
    Ok(serde_json::json!({ "deleted": true, "edge_id": args.edge_id }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectTasksArgs {
    project_node_id: String,
}

pub async fn execute_get_project_tasks(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: ProjectTasksArgs = parse_args(args)?;
    let board = engine.graph.get_project_tasks(ctx, &args.project_node_id)?;
    serde_json::to_value(board).map_err(|e| MemoryError::Permanent(e.to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResolveArgs {
    node_id: String,
}

pub async fn execute_resolve_node(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: ResolveArgs = parse_args(args)?;
    let node = engine.graph.resolve_node(ctx, &args.node_id)?;
    serde_json::to_value(node).map_err(|e| MemoryError::Permanent(e.to_string()))
}

// ============================================================================
// TESTS
// ============================================================================
