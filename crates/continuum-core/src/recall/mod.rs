//! Hybrid retrieval (`recall`).
//!
//! One operation searches every registered memory family twice - keyword
//! (FTS5/BM25) and vector (cosine over embeddings) - then fuses the scores
//! with a recency boost. Ranking is deterministic: unchanged state yields
//! identical results for identical queries.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::context::RequestContext;
use crate::embeddings::Embedder;
use crate::error::{MemoryError, Result};
use crate::model::MemoryKind;
use crate::storage::Store;

/// Fusion weight for the normalized vector score
const ANN_WEIGHT: f32 = 0.6;
/// Fusion weight for the normalized keyword score
const FTS_WEIGHT: f32 = 0.3;
/// Fusion weight for the recency boost
const RECENCY_WEIGHT: f32 = 0.1;
/// Recency boost half-life scale, in days: `exp(-age_days / 30)`
const RECENCY_SCALE_DAYS: f32 = 30.0;
/// Candidates fetched per source before fusion, as a multiple of `limit`
const SOURCE_LIMIT_MULTIPLIER: usize = 4;

/// Bounds on `limit`
pub const MIN_LIMIT: usize = 1;
pub const MAX_LIMIT: usize = 50;

// ============================================================================
// INPUT & OUTPUT
// ============================================================================

/// Optional creation-time window
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeRange {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| ts >= from) && self.to.is_none_or(|to| ts <= to)
    }
}

/// Input for `recall`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecallInput {
    pub query: String,
    /// Memory families to search; `["all"]` (the default) means every one
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    #[serde(default)]
    pub project_path: Option<String>,
    #[serde(default)]
    pub with_whom: Option<String>,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    /// Return raw handoff fields regardless of compression level
    #[serde(default)]
    pub expand: bool,
}

fn default_limit() -> usize {
    5
}

fn default_min_similarity() -> f32 {
    0.5
}

impl Default for RecallInput {
    fn default() -> Self {
        Self {
            query: String::new(),
            types: Vec::new(),
            limit: default_limit(),
            min_similarity: default_min_similarity(),
            project_path: None,
            with_whom: None,
            time_range: None,
            expand: false,
        }
    }
}

/// One ranked result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallHit {
    #[serde(rename = "type")]
    pub kind: MemoryKind,
    pub id: String,
    pub score: f32,
    pub snippet: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct ScoreWeights {
    ann: f32,
    fts: f32,
    recency: f32,
}

#[derive(Default)]
struct Candidate {
    kind: Option<MemoryKind>,
    fts_norm: f32,
    ann_norm: f32,
}

// ============================================================================
// RECALL ENGINE
// ============================================================================

/// Hybrid retrieval over the store
pub struct Recall {
    store: Arc<Store>,
    embedder: Arc<dyn Embedder>,
    /// LRU cache for query embeddings to avoid re-embedding repeated queries
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl Recall {
    pub fn new(store: Arc<Store>, embedder: Arc<dyn Embedder>) -> Self {
        // SAFETY: 100 is non-zero
        let capacity = NonZeroUsize::new(100).expect("100 is non-zero");
        Self {
            store,
            embedder,
            query_cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// The single hybrid retrieval operation
    pub fn recall(&self, ctx: &RequestContext, input: &RecallInput) -> Result<Vec<RecallHit>> {
        self.run(
            ctx,
            input,
            ScoreWeights {
                ann: ANN_WEIGHT,
                fts: FTS_WEIGHT,
                recency: RECENCY_WEIGHT,
            },
            false,
        )
    }

    /// Vector-only restriction; fails if embeddings are unavailable
    pub fn semantic_search(
        &self,
        ctx: &RequestContext,
        input: &RecallInput,
    ) -> Result<Vec<RecallHit>> {
        self.run(
            ctx,
            input,
            ScoreWeights {
                ann: 1.0,
                fts: 0.0,
                recency: 0.0,
            },
            true,
        )
    }

    /// Explicitly-weighted keyword/vector fusion
    pub fn hybrid_search(
        &self,
        ctx: &RequestContext,
        input: &RecallInput,
        keyword_weight: f32,
        semantic_weight: f32,
    ) -> Result<Vec<RecallHit>> {
        if keyword_weight < 0.0 || semantic_weight < 0.0 {
            return Err(MemoryError::Validation(
                "search weights must be non-negative".into(),
            ));
        }
        let total = (keyword_weight + semantic_weight).max(f32::EPSILON);
        self.run(
            ctx,
            input,
            ScoreWeights {
                ann: semantic_weight / total,
                fts: keyword_weight / total,
                recency: 0.0,
            },
            false,
        )
    }

    fn validate(input: &RecallInput) -> Result<Vec<MemoryKind>> {
        if input.query.trim().is_empty() {
            return Err(MemoryError::Validation("query must not be empty".into()));
        }
        if !(MIN_LIMIT..=MAX_LIMIT).contains(&input.limit) {
            return Err(MemoryError::Validation(format!(
                "limit must be in {MIN_LIMIT}..={MAX_LIMIT}, got {}",
                input.limit
            )));
        }
        if !(0.0..=1.0).contains(&input.min_similarity) {
            return Err(MemoryError::Validation(format!(
                "min_similarity must be in [0, 1], got {}",
                input.min_similarity
            )));
        }
        if input.types.is_empty() || input.types.iter().any(|t| t == "all") {
            return Ok(MemoryKind::ALL.to_vec());
        }
        let mut kinds = Vec::new();
        for name in &input.types {
            let kind = MemoryKind::parse_name(name).ok_or_else(|| {
                MemoryError::Validation(format!("unknown memory type '{name}'"))
            })?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        Ok(kinds)
    }

    /// Embed the query, consulting the LRU cache first
    fn query_vector(&self, query: &str) -> Option<Vec<f32>> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(vector) = cache.get(query) {
                return Some(vector.clone());
            }
        }
        match self.embedder.embed(query) {
            Ok(embedding) => {
                if let Ok(mut cache) = self.query_cache.lock() {
                    cache.put(query.to_string(), embedding.vector.clone());
                }
                Some(embedding.vector)
            }
            Err(e) => {
                debug!("query embedding failed, falling back to keyword search: {e}");
                None
            }
        }
    }

    fn run(
        &self,
        ctx: &RequestContext,
        input: &RecallInput,
        weights: ScoreWeights,
        require_embeddings: bool,
    ) -> Result<Vec<RecallHit>> {
        let kinds = Self::validate(input)?;
        let source_limit = input.limit * SOURCE_LIMIT_MULTIPLIER;
        let now = Utc::now();

        let q_vec = if weights.ann > 0.0 {
            self.query_vector(&input.query)
        } else {
            None
        };
        if require_embeddings && q_vec.is_none() {
            return Err(MemoryError::TemporaryUnavailable(
                "embeddings unavailable for semantic search".into(),
            ));
        }

        let mut candidates: HashMap<String, Candidate> = HashMap::new();

        for kind in kinds {
            ctx.check_deadline()?;

            if weights.fts > 0.0 {
                let fts_hits =
                    self.store
                        .fulltext(kind, &ctx.tenant_id, &input.query, source_limit)?;
                let max_rank = fts_hits
                    .iter()
                    .map(|(_, s)| *s)
                    .fold(0.0_f32, f32::max)
                    .max(f32::EPSILON);
                for (id, score) in fts_hits {
                    let entry = candidates.entry(id).or_default();
                    entry.kind = Some(kind);
                    entry.fts_norm = score / max_rank;
                }
            }

            if let Some(vector) = &q_vec {
                let ann_hits = self.store.ann(kind, &ctx.tenant_id, vector, source_limit)?;
                for (id, similarity) in ann_hits {
                    let normalized = normalize_similarity(similarity, input.min_similarity);
                    let entry = candidates.entry(id).or_default();
                    entry.kind = Some(kind);
                    entry.ann_norm = normalized;
                }
            }
        }

        let mut hits = Vec::new();
        for (id, candidate) in candidates {
            ctx.check_deadline()?;
            let Some(kind) = candidate.kind else { continue };
            let Some(meta) = self
                .store
                .recall_meta(kind, &ctx.tenant_id, &id, input.expand)?
            else {
                continue;
            };

            // Field filters apply where the field exists
            if let Some(whom) = &input.with_whom {
                if kind == MemoryKind::SessionHandoffs
                    && meta.metadata.get("with_whom").and_then(Value::as_str) != Some(whom)
                {
                    continue;
                }
            }
            if let Some(project) = &input.project_path {
                if kind == MemoryKind::KnowledgeNotes
                    && meta.metadata.get("project_path").and_then(Value::as_str)
                        != Some(project)
                {
                    continue;
                }
            }
            if let Some(range) = &input.time_range {
                if !range.contains(meta.created_at) {
                    continue;
                }
            }

            let age_days = ((now - meta.created_at).num_seconds().max(0) as f32) / 86_400.0;
            let recency = (-age_days / RECENCY_SCALE_DAYS).exp();
            let score = weights.ann * candidate.ann_norm
                + weights.fts * candidate.fts_norm
                + weights.recency * recency;

            hits.push(RecallHit {
                kind,
                id,
                score,
                snippet: meta.snippet,
                metadata: meta.metadata,
                created_at: meta.created_at,
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(input.limit);
        Ok(hits)
    }
}

/// `(cos − min_sim) / (1 − min_sim)` clipped to [0, 1]
fn normalize_similarity(similarity: f32, min_similarity: f32) -> f32 {
    if min_similarity >= 1.0 {
        return if similarity >= 1.0 { 1.0 } else { 0.0 };
    }
    ((similarity - min_similarity) / (1.0 - min_similarity)).clamp(0.0, 1.0)
}

// ============================================================================
// TESTS
// ============================================================================
