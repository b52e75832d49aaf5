//! Retrieval tools: recall, semantic_search, hybrid_search.

use continuum_core::{Engine, RecallInput, RequestContext, Result, TimeRange};
use serde::Deserialize;
use serde_json::Value;

use super::parse_args;
use crate::protocol::types::ToolDescription;

pub fn descriptors() -> Vec<ToolDescription> {
    let type_schema = serde_json::json!({
        "type": "array",
        "items": {
            "type": "string",
            "enum": ["all", "session_handoffs", "knowledge_notes", "agent_feedback", "capsules"]
        }
    });
    vec![
        ToolDescription {
            name: "recall".to_string(),
            description: Some(
                "Hybrid retrieval across memory types: keyword (BM25) + vector (cosine) + \
                 recency, fused with deterministic ranking. Falls back to keyword-only when \
                 embeddings are unavailable."
                    .to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "types": type_schema,
                    "limit": {"type": "integer", "minimum": 1, "maximum": 50, "default": 5},
                    "min_similarity": {"type": "number", "minimum": 0.0, "maximum": 1.0, "default": 0.5},
                    "project_path": {"type": "string"},
                    "with_whom": {"type": "string"},
                    "time_range": {
                        "type": "object",
                        "properties": {
                            "from": {"type": "string", "format": "date-time"},
                            "to": {"type": "string", "format": "date-time"}
                        }
                    },
                    "expand": {"type": "boolean", "description": "Return raw handoff fields regardless of compression"}
                },
                "required": ["query"]
            }),
        },
        ToolDescription {
            name: "semantic_search".to_string(),
            description: Some(
                "Vector-only retrieval. Fails when embeddings are unavailable.".to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "types": type_schema,
                    "limit": {"type": "integer", "minimum": 1, "maximum": 50, "default": 5},
                    "min_similarity": {"type": "number", "minimum": 0.0, "maximum": 1.0, "default": 0.5}
                },
                "required": ["query"]
            }),
        },
        ToolDescription {
            name: "hybrid_search".to_string(),
            description: Some(
                "Keyword/vector fusion with explicit weights (defaults 0.3 keyword, 0.7 \
                 semantic)."
                    .to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "types": type_schema,
                    "limit": {"type": "integer", "minimum": 1, "maximum": 50, "default": 5},
                    "min_similarity": {"type": "number", "minimum": 0.0, "maximum": 1.0, "default": 0.5},
                    "keyword_weight": {"type": "number", "minimum": 0.0, "default": 0.3},
                    "semantic_weight": {"type": "number", "minimum": 0.0, "default": 0.7}
                },
                "required": ["query"]
            }),
        },
    ]
}

fn hits_to_value(query: &str, hits: Vec<continuum_core::RecallHit>) -> Value {
    serde_json::json!({
        "query": query,
        "total": hits.len(),
        "results": hits,
    })
}

pub async fn execute_recall(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let input: RecallInput = parse_args(args)?;
    let hits = engine.recall.recall(ctx, &input)?;
    Ok(hits_to_value(&input.query, hits))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SemanticArgs {
    query: String,
    #[serde(default)]
    types: Vec<String>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default = "default_min_similarity")]
    min_similarity: f32,
}

fn default_limit() -> usize {
    5
}

fn default_min_similarity() -> f32 {
    0.5
}

pub async fn execute_semantic_search(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: SemanticArgs = parse_args(args)?;
    let input = RecallInput {
        query: args.query.clone(),
        types: args.types,
        limit: args.limit,
        min_similarity: args.min_similarity,
        ..Default::default()
    };
    let hits = engine.recall.semantic_search(ctx, &input)?;
    Ok(hits_to_value(&args.query, hits))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HybridArgs {
    query: String,
    #[serde(default)]
    types: Vec<String>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default = "default_min_similarity")]
    min_similarity: f32,
    #[serde(default = "default_keyword_weight")]
    keyword_weight: f32,
    #[serde(default = "default_semantic_weight")]
    semantic_weight: f32,
    #[serde(default)]
    project_path: Option<String>,
    #[serde(default)]
    with_whom: Option<String>,
    #[serde(default)]
    time_range: Option<TimeRange>,
}

fn default_keyword_weight() -> f32 {
    0.3
}

fn default_semantic_weight() -> f32 {
    0.7
}

pub async fn execute_hybrid_search(
    engine: &Engine,
    ctx: &RequestContext,
    args: Option<Value>,
) -> Result<Value> {
    let args: HybridArgs = parse_args(args)?;
    let input = RecallInput {
        query: args.query.clone(),
        types: args.types,
        limit: args.limit,
        min_similarity: args.min_similarity,
        project_path: args.project_path,
        with_whom: args.with_whom,
        time_range: args.time_range,
        expand: false,
    };
    let hits = engine
        .recall
        .hybrid_search(ctx, &input, args.keyword_weight, args.semantic_weight)?;
    Ok(hits_to_value(&args.query, hits))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::notes::execute_create_knowledge_note;
    use crate::tools::tests::{ctx, test_engine};
    use continuum_core::MemoryKind;
    use continuum_core::embeddings::{Embedder, HashingEmbedder};

    #[tokio::test]
    async fn test_recall_ranks_relevant_note_first() {
        let (engine, _dir) = test_engine();
        for text in [
            "users table with OAuth credentials",
            "unrelated topic about colors",
        ] {
            let created = execute_create_knowledge_note(
                &engine,
                &ctx(),
                Some(serde_json::json!({"text": text})),
            )
            .await
            .unwrap();
            // Embed synchronously so vector search participates
            let id = created["note_id"].as_str().unwrap();
            let embedding = HashingEmbedder::default().embed(text).unwrap();
            engine
                .store
                .put_embedding(MemoryKind::KnowledgeNotes, "default", id, &embedding)
                .unwrap();
        }

        let result = execute_recall(
            &engine,
            &ctx(),
            Some(serde_json::json!({
                "query": "oauth users",
                "types": ["knowledge_notes"],
                "limit": 2,
                "min_similarity": 0.0
            })),
        )
        .await
        .unwrap();
        assert!(result["total"].as_u64().unwrap() >= 1);
        assert!(result["results"][0]["snippet"]
            .as_str()
            .unwrap()
            .contains("OAuth"));
    }

    #[tokio::test]
    async fn test_recall_limit_bounds() {
        let (engine, _dir) = test_engine();
        for bad in [0, 51] {
            let err = execute_recall(
                &engine,
                &ctx(),
                Some(serde_json::json!({"query": "x", "limit": bad})),
            )
            .await
            .unwrap_err();
            assert_eq!(err.kind(), "validation_error");
        }
        for ok in [1, 50] {
            assert!(execute_recall(
                &engine,
                &ctx(),
                Some(serde_json::json!({"query": "x", "limit": ok}))
            )
            .await
            .is_ok());
        }
    }

    #[tokio::test]
    async fn test_hybrid_search_accepts_weights() {
        let (engine, _dir) = test_engine();
        execute_create_knowledge_note(
            &engine,
            &ctx(),
            Some(serde_json::json!({"text": "weighted retrieval example"})),
        )
        .await
        .unwrap();

        let result = execute_hybrid_search(
            &engine,
            &ctx(),
            Some(serde_json::json!({
                "query": "weighted retrieval",
                "keyword_weight": 1.0,
                "semantic_weight": 0.0,
                "min_similarity": 0.0
            })),
        )
        .await
        .unwrap();
        assert_eq!(result["total"], 1);
    }
}
