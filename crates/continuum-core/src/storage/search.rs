//! Store operations behind retrieval: FTS5 keyword search, brute-force
//! cosine over embedding BLOBs, and node resolution for the graph layer.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use super::sqlite::{fmt_ts, Store};
use crate::embeddings::{cosine_similarity, Embedding};
use crate::error::{MemoryError, Result};
use crate::model::{MemoryKind, NodeKind, ResolvedNode};

/// Sanitize a user query for FTS5: quote each alphanumeric token and OR them.
///
/// OR semantics keep partial matches rankable; bm25 still rewards documents
/// matching more terms.
pub(crate) fn sanitize_fts5_query(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Snippet length cap for recall results
const SNIPPET_CHARS: usize = 240;

fn snippet_of(text: &str) -> String {
    if text.chars().count() <= SNIPPET_CHARS {
        text.to_string()
    } else {
        let cut: String = text.chars().take(SNIPPET_CHARS - 3).collect();
        format!("{cut}...")
    }
}

/// Per-candidate metadata fetched during recall scoring
#[derive(Debug, Clone)]
pub struct RecallMeta {
    pub created_at: DateTime<Utc>,
    pub snippet: String,
    pub metadata: Value,
}

impl Store {
    fn fts_table(kind: MemoryKind) -> &'static str {
        match kind {
            MemoryKind::SessionHandoffs => "handoff_fts",
            MemoryKind::KnowledgeNotes => "note_fts",
            MemoryKind::AgentFeedback => "feedback_fts",
            MemoryKind::Capsules => "capsule_fts",
        }
    }

    fn entity_table(kind: MemoryKind) -> &'static str {
        match kind {
            MemoryKind::SessionHandoffs => "session_handoffs",
            MemoryKind::KnowledgeNotes => "knowledge_notes",
            MemoryKind::AgentFeedback => "agent_feedback",
            MemoryKind::Capsules => "capsules",
        }
    }

    // ========================================================================
    // FULL-TEXT SEARCH
    // ========================================================================

    /// BM25-ranked keyword search over one entity kind.
    ///
    /// Returns `(id, score)` with positive scores, best first. Scores are
    /// raw `-bm25`; callers normalize per batch.
    pub fn fulltext(
        &self,
        kind: MemoryKind,
        tenant: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(String, f32)>> {
        let sanitized = sanitize_fts5_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }
        let table = Self::fts_table(kind);
        let sql = format!(
            "SELECT id, bm25({table}) AS rank FROM {table}
             WHERE {table} MATCH ?1 AND tenant_id = ?2
             ORDER BY rank
             LIMIT ?3"
        );
        let reader = self.reader.lock()?;
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(params![sanitized, tenant, limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)? as f32))
        })?;
        let mut results = Vec::new();
        for row in rows {
            let (id, rank) = row?;
            results.push((id, (-rank).max(0.0)));
        }
        Ok(results)
    }

    // ========================================================================
    // EMBEDDINGS & ANN
    // ========================================================================

    /// Persist an embedding and flag the parent row.
    ///
    /// The dimension is pinned at store open; anything else is rejected.
    pub fn put_embedding(
        &self,
        kind: MemoryKind,
        tenant: &str,
        entity_id: &str,
        embedding: &Embedding,
    ) -> Result<()> {
        if embedding.dimensions != self.dimension {
            return Err(MemoryError::Validation(format!(
                "embedding dimension {} does not match pinned dimension {}",
                embedding.dimensions, self.dimension
            )));
        }
        let table = Self::entity_table(kind);
        let mut writer = self.writer.lock()?;
        let tx = writer.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO memory_embeddings
                 (entity_kind, entity_id, tenant_id, embedding, dimensions, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                kind.as_str(),
                entity_id,
                tenant,
                embedding.to_bytes(),
                embedding.dimensions as i64,
                fmt_ts(Utc::now()),
            ],
        )?;
        tx.execute(
            &format!("UPDATE {table} SET has_embedding = 1 WHERE tenant_id = ?1 AND id = ?2"),
            params![tenant, entity_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Load one entity's embedding, if present
    pub fn get_embedding(
        &self,
        kind: MemoryKind,
        tenant: &str,
        entity_id: &str,
    ) -> Result<Option<Embedding>> {
        let reader = self.reader.lock()?;
        let bytes: Option<Vec<u8>> = reader
            .query_row(
                "SELECT embedding FROM memory_embeddings
                 WHERE entity_kind = ?1 AND entity_id = ?2 AND tenant_id = ?3",
                params![kind.as_str(), entity_id, tenant],
                |row| row.get(0),
            )
            .optional()?;
        Ok(bytes.and_then(|b| Embedding::from_bytes(&b)))
    }

    /// Approximate nearest neighbors by brute-force cosine.
    ///
    /// Rows without embeddings are naturally excluded. Ties broken by id for
    /// deterministic ranking.
    pub fn ann(
        &self,
        kind: MemoryKind,
        tenant: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<(String, f32)>> {
        let reader = self.reader.lock()?;
        let mut stmt = reader.prepare(
            "SELECT entity_id, embedding FROM memory_embeddings
             WHERE entity_kind = ?1 AND tenant_id = ?2",
        )?;
        let rows = stmt.query_map(params![kind.as_str(), tenant], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        let mut scored = Vec::new();
        for row in rows {
            let (id, bytes) = row?;
            if let Some(embedding) = Embedding::from_bytes(&bytes) {
                if embedding.dimensions == query.len() {
                    scored.push((id, cosine_similarity(query, &embedding.vector)));
                }
            }
        }
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    /// Entities still waiting for an embedding, with their embed text.
    ///
    /// Used by the consolidator to backfill requests the bounded queue
    /// dropped.
    pub fn missing_embeddings(
        &self,
        kind: MemoryKind,
        tenant: &str,
        limit: usize,
    ) -> Result<Vec<(String, String)>> {
        match kind {
            MemoryKind::SessionHandoffs => {
                let reader = self.reader.lock()?;
                let mut stmt = reader.prepare(
                    "SELECT * FROM session_handoffs
                     WHERE tenant_id = ?1 AND has_embedding = 0
                     ORDER BY created_at ASC LIMIT ?2",
                )?;
                let rows =
                    stmt.query_map(params![tenant, limit as i64], Self::row_to_handoff)?;
                let mut out = Vec::new();
                for row in rows {
                    let handoff = row?;
                    out.push((handoff.id.clone(), handoff.embedding_text()));
                }
                Ok(out)
            }
            MemoryKind::KnowledgeNotes => {
                let reader = self.reader.lock()?;
                let mut stmt = reader.prepare(
                    "SELECT id, text FROM knowledge_notes
                     WHERE tenant_id = ?1 AND has_embedding = 0
                     ORDER BY created_at ASC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![tenant, limit as i64], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            }
            MemoryKind::AgentFeedback => {
                let reader = self.reader.lock()?;
                let mut stmt = reader.prepare(
                    "SELECT id, text FROM agent_feedback
                     WHERE tenant_id = ?1 AND has_embedding = 0
                     ORDER BY created_at ASC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![tenant, limit as i64], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            }
            MemoryKind::Capsules => {
                let reader = self.reader.lock()?;
                let mut stmt = reader.prepare(
                    "SELECT * FROM capsules
                     WHERE tenant_id = ?1 AND has_embedding = 0
                     ORDER BY created_at ASC LIMIT ?2",
                )?;
                let rows =
                    stmt.query_map(params![tenant, limit as i64], Self::row_to_capsule)?;
                let mut out = Vec::new();
                for row in rows {
                    let capsule = row?;
                    out.push((capsule.id.clone(), capsule.embedding_text()));
                }
                Ok(out)
            }
        }
    }

    // ========================================================================
    // RECALL METADATA
    // ========================================================================

    /// Fetch the scoring metadata for one recall candidate.
    ///
    /// For handoffs the snippet honors the compression level unless `expand`
    /// is set.
    pub fn recall_meta(
        &self,
        kind: MemoryKind,
        tenant: &str,
        id: &str,
        expand: bool,
    ) -> Result<Option<RecallMeta>> {
        match kind {
            MemoryKind::SessionHandoffs => {
                let Some(handoff) = self.get_handoff(tenant, id)? else {
                    return Ok(None);
                };
                let snippet = if expand {
                    snippet_of(&handoff.experienced)
                } else {
                    snippet_of(handoff.display_text())
                };
                Ok(Some(RecallMeta {
                    created_at: handoff.created_at,
                    snippet,
                    metadata: serde_json::json!({
                        "with_whom": handoff.with_whom,
                        "session_id": handoff.session_id,
                        "compression_level": handoff.compression_level,
                        "significance": handoff.significance,
                        "tags": handoff.tags,
                    }),
                }))
            }
            MemoryKind::KnowledgeNotes => {
                let Some(note) = self.get_note(tenant, id)? else {
                    return Ok(None);
                };
                Ok(Some(RecallMeta {
                    created_at: note.created_at,
                    snippet: snippet_of(&note.text),
                    metadata: serde_json::json!({
                        "tags": note.tags,
                        "project_path": note.project_path,
                        "confidence": note.confidence,
                    }),
                }))
            }
            MemoryKind::AgentFeedback => {
                let Some(feedback) = self.get_feedback(tenant, id)? else {
                    return Ok(None);
                };
                Ok(Some(RecallMeta {
                    created_at: feedback.created_at,
                    snippet: snippet_of(&feedback.text),
                    metadata: serde_json::json!({
                        "kind": feedback.kind,
                        "status": feedback.status,
                    }),
                }))
            }
            MemoryKind::Capsules => {
                let Some(capsule) = self.get_capsule(tenant, id)? else {
                    return Ok(None);
                };
                Ok(Some(RecallMeta {
                    created_at: capsule.created_at,
                    snippet: snippet_of(&capsule.embedding_text()),
                    metadata: serde_json::json!({
                        "scope": capsule.scope,
                        "subject_type": capsule.subject_type,
                        "subject_id": capsule.subject_id,
                        "status": capsule.effective_status(Utc::now()),
                    }),
                }))
            }
        }
    }

    // ========================================================================
    // NODE RESOLUTION
    // ========================================================================

    /// Resolve a node id to its backing row, scoped to the tenant.
    ///
    /// The id prefix selects the table; no probing across tables.
    pub fn resolve_node(&self, tenant: &str, node_id: &str) -> Result<Option<ResolvedNode>> {
        let Some(kind) = NodeKind::from_id(node_id) else {
            return Ok(None);
        };
        let resolved = match kind {
            NodeKind::Handoff => self.get_handoff(tenant, node_id)?.map(|h| ResolvedNode {
                kind,
                node_id: h.id.clone(),
                text: snippet_of(h.display_text()),
                created_at: h.created_at,
            }),
            NodeKind::Note => self.get_note(tenant, node_id)?.map(|n| ResolvedNode {
                kind,
                node_id: n.id.clone(),
                text: snippet_of(&n.text),
                created_at: n.created_at,
            }),
            NodeKind::Capsule => self.get_capsule(tenant, node_id)?.map(|c| ResolvedNode {
                kind,
                node_id: c.id.clone(),
                text: format!("{} {}", c.subject_type, c.subject_id),
                created_at: c.created_at,
            }),
            NodeKind::Feedback => self.get_feedback(tenant, node_id)?.map(|f| ResolvedNode {
                kind,
                node_id: f.id.clone(),
                text: snippet_of(&f.text),
                created_at: f.created_at,
            }),
            NodeKind::Decision => self.get_decision(tenant, node_id)?.map(|d| ResolvedNode {
                kind,
                node_id: d.id.clone(),
                text: snippet_of(&d.text),
                created_at: d.created_at,
            }),
        };
        Ok(resolved)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{Embedder, HashingEmbedder, DEFAULT_DIMENSION};
    use crate::model::KnowledgeNote;
    use crate::storage::sqlite::tests::{sample_handoff, test_store};

    fn seed_note(store: &Store, tenant: &str, id: &str, text: &str) {
        store
            .insert_note(&KnowledgeNote {
                id: id.to_string(),
                tenant_id: tenant.to_string(),
                text: text.to_string(),
                tags: vec![],
                project_path: None,
                confidence: 0.8,
                source_handoffs: vec![],
                has_embedding: false,
                created_at: Utc::now(),
            })
            .unwrap();
    }

    #[test]
    fn test_sanitize_fts5_query() {
        assert_eq!(sanitize_fts5_query("oauth users"), "\"oauth\" OR \"users\"");
        assert_eq!(sanitize_fts5_query("NEAR(\"x\")"), "\"NEAR\" OR \"x\"");
        assert_eq!(sanitize_fts5_query("!!!"), "");
    }

    #[test]
    fn test_fulltext_ranks_matching_note_first() {
        let (store, _dir) = test_store();
        seed_note(&store, "t1", "kn_1", "users table with OAuth credentials");
        seed_note(&store, "t1", "kn_2", "unrelated topic about colors");

        let hits = store
            .fulltext(MemoryKind::KnowledgeNotes, "t1", "oauth users", 10)
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].0, "kn_1");
        assert!(hits.iter().all(|(id, _)| id != "kn_2"));
    }

    #[test]
    fn test_fulltext_is_tenant_scoped() {
        let (store, _dir) = test_store();
        seed_note(&store, "t1", "kn_1", "oauth in tenant one");
        seed_note(&store, "t2", "kn_2", "oauth in tenant two");

        let hits = store
            .fulltext(MemoryKind::KnowledgeNotes, "t1", "oauth", 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "kn_1");
    }

    #[test]
    fn test_put_embedding_pins_dimension() {
        let (store, _dir) = test_store();
        seed_note(&store, "t1", "kn_1", "a note");

        let wrong = Embedding::new(vec![0.5; DEFAULT_DIMENSION + 1]);
        let err = store
            .put_embedding(MemoryKind::KnowledgeNotes, "t1", "kn_1", &wrong)
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");

        let embedder = HashingEmbedder::default();
        let good = embedder.embed("a note").unwrap();
        store
            .put_embedding(MemoryKind::KnowledgeNotes, "t1", "kn_1", &good)
            .unwrap();
        assert!(store.get_note("t1", "kn_1").unwrap().unwrap().has_embedding);
        assert!(store
            .get_embedding(MemoryKind::KnowledgeNotes, "t1", "kn_1")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_ann_orders_by_similarity_and_respects_tenant() {
        let (store, _dir) = test_store();
        let embedder = HashingEmbedder::default();
        for (tenant, id, text) in [
            ("t1", "kn_1", "users table with oauth credentials"),
            ("t1", "kn_2", "unrelated topic about colors"),
            ("t2", "kn_3", "oauth users elsewhere"),
        ] {
            seed_note(&store, tenant, id, text);
            store
                .put_embedding(
                    MemoryKind::KnowledgeNotes,
                    tenant,
                    id,
                    &embedder.embed(text).unwrap(),
                )
                .unwrap();
        }

        let query = embedder.embed("oauth users").unwrap();
        let hits = store
            .ann(MemoryKind::KnowledgeNotes, "t1", &query.vector, 10)
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "kn_1");
        assert!(hits[0].1 > hits[1].1);
    }

    #[test]
    fn test_missing_embeddings_backfill_list() {
        let (store, _dir) = test_store();
        store
            .insert_handoff(&sample_handoff("t1", "hof_1", Utc::now()))
            .unwrap();
        seed_note(&store, "t1", "kn_1", "pending note");

        let handoffs = store
            .missing_embeddings(MemoryKind::SessionHandoffs, "t1", 10)
            .unwrap();
        assert_eq!(handoffs.len(), 1);
        assert!(handoffs[0].1.contains("built the storage layer"));

        let embedder = HashingEmbedder::default();
        store
            .put_embedding(
                MemoryKind::KnowledgeNotes,
                "t1",
                "kn_1",
                &embedder.embed("pending note").unwrap(),
            )
            .unwrap();
        assert!(store
            .missing_embeddings(MemoryKind::KnowledgeNotes, "t1", 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_resolve_node_dispatches_by_prefix() {
        let (store, _dir) = test_store();
        store
            .insert_handoff(&sample_handoff("t1", "hof_1", Utc::now()))
            .unwrap();
        seed_note(&store, "t1", "kn_1", "resolvable note");

        let handoff = store.resolve_node("t1", "hof_1").unwrap().unwrap();
        assert_eq!(handoff.kind, NodeKind::Handoff);

        let note = store.resolve_node("t1", "kn_1").unwrap().unwrap();
        assert_eq!(note.kind, NodeKind::Note);
        assert_eq!(note.text, "resolvable note");

        assert!(store.resolve_node("t1", "kn_ghost").unwrap().is_none());
        assert!(store.resolve_node("t1", "bogus").unwrap().is_none());
        // Cross-tenant resolution fails
        assert!(store.resolve_node("t2", "kn_1").unwrap().is_none());
    }

    #[test]
    fn test_recall_meta_honors_compression() {
        let (store, _dir) = test_store();
        let handoff = sample_handoff("t1", "hof_1", Utc::now());
        store.insert_handoff(&handoff).unwrap();
        store
            .apply_compression(
                "t1",
                "hof_1",
                crate::model::CompressionLevel::Full,
                crate::model::CompressionLevel::Summary,
                Some("compressed summary"),
                None,
                None,
                Utc::now(),
            )
            .unwrap();

        let meta = store
            .recall_meta(MemoryKind::SessionHandoffs, "t1", "hof_1", false)
            .unwrap()
            .unwrap();
        assert_eq!(meta.snippet, "compressed summary");

        let expanded = store
            .recall_meta(MemoryKind::SessionHandoffs, "t1", "hof_1", true)
            .unwrap()
            .unwrap();
        assert_eq!(expanded.snippet, "built the storage layer");
    }
}
