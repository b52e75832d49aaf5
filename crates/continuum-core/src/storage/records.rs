//! Store operations for notes, decisions, feedback, and capsules.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::sqlite::{fmt_ts, json_strings, Store};
use crate::error::{MemoryError, Result};
use crate::model::{
    AgentFeedback, Capsule, CapsuleScope, CapsuleStatus, Decision, DecisionScope, DecisionStatus,
    FeedbackKind, FeedbackStatus, KnowledgeNote,
};

impl Store {
    // ========================================================================
    // KNOWLEDGE NOTES
    // ========================================================================

    pub(super) fn row_to_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<KnowledgeNote> {
        let tags: String = row.get("tags")?;
        let sources: String = row.get("source_handoffs")?;
        let created_at: String = row.get("created_at")?;
        Ok(KnowledgeNote {
            id: row.get("id")?,
            tenant_id: row.get("tenant_id")?,
            text: row.get("text")?,
            tags: json_strings(&tags),
            project_path: row.get("project_path")?,
            confidence: row.get("confidence")?,
            source_handoffs: json_strings(&sources),
            has_embedding: row.get::<_, i64>("has_embedding")? != 0,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_default(),
        })
    }

    pub fn insert_note(&self, note: &KnowledgeNote) -> Result<()> {
        let fts_body = format!("{}\n{}", note.text, note.tags.join(" "));
        let mut writer = self.writer.lock()?;
        let tx = writer.transaction()?;
        tx.execute(
            "INSERT INTO knowledge_notes (
                id, tenant_id, text, tags, project_path, confidence,
                source_handoffs, has_embedding, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                note.id,
                note.tenant_id,
                note.text,
                serde_json::to_string(&note.tags)?,
                note.project_path,
                note.confidence,
                serde_json::to_string(&note.source_handoffs)?,
                note.has_embedding as i64,
                fmt_ts(note.created_at),
            ],
        )?;
        tx.execute(
            "INSERT INTO note_fts (id, tenant_id, body) VALUES (?1, ?2, ?3)",
            params![note.id, note.tenant_id, fts_body],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_note(&self, tenant: &str, id: &str) -> Result<Option<KnowledgeNote>> {
        let reader = self.reader.lock()?;
        let note = reader
            .query_row(
                "SELECT * FROM knowledge_notes WHERE tenant_id = ?1 AND id = ?2",
                params![tenant, id],
                Self::row_to_note,
            )
            .optional()?;
        Ok(note)
    }

    pub fn list_notes(
        &self,
        tenant: &str,
        project_path: Option<&str>,
        limit: usize,
    ) -> Result<Vec<KnowledgeNote>> {
        let reader = self.reader.lock()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM knowledge_notes
             WHERE tenant_id = ?1 AND (?2 IS NULL OR project_path = ?2)
             ORDER BY created_at DESC, id DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![tenant, project_path, limit as i64], Self::row_to_note)?;
        let mut notes = Vec::new();
        for row in rows {
            notes.push(row?);
        }
        Ok(notes)
    }

    /// Hard-delete a note and its search/embedding rows.
    ///
    /// Callers enforce referential integrity against the edge table first.
    pub fn delete_note(&self, tenant: &str, id: &str) -> Result<bool> {
        let mut writer = self.writer.lock()?;
        let tx = writer.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM knowledge_notes WHERE tenant_id = ?1 AND id = ?2",
            params![tenant, id],
        )?;
        tx.execute("DELETE FROM note_fts WHERE id = ?1", params![id])?;
        tx.execute(
            "DELETE FROM memory_embeddings WHERE entity_kind = 'knowledge_notes' AND entity_id = ?1",
            params![id],
        )?;
        tx.commit()?;
        Ok(deleted == 1)
    }

    // ========================================================================
    // DECISIONS
    // ========================================================================

    pub(super) fn row_to_decision(row: &rusqlite::Row<'_>) -> rusqlite::Result<Decision> {
        let scope: String = row.get("scope")?;
        let status: String = row.get("status")?;
        let created_at: String = row.get("created_at")?;
        Ok(Decision {
            id: row.get("id")?,
            tenant_id: row.get("tenant_id")?,
            scope: DecisionScope::parse_name(&scope).unwrap_or_default(),
            text: row.get("text")?,
            status: DecisionStatus::parse_name(&status).unwrap_or_default(),
            supersedes: row.get("supersedes")?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_default(),
        })
    }

    pub fn insert_decision(&self, decision: &Decision) -> Result<()> {
        let writer = self.writer.lock()?;
        writer.execute(
            "INSERT INTO decisions (id, tenant_id, scope, text, status, supersedes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                decision.id,
                decision.tenant_id,
                decision.scope.as_str(),
                decision.text,
                decision.status.as_str(),
                decision.supersedes,
                fmt_ts(decision.created_at),
            ],
        )?;
        Ok(())
    }

    /// Insert a decision that supersedes an existing one.
    ///
    /// The existence check and the status flip of the target happen in the
    /// same transaction as the insert.
    pub fn insert_decision_superseding(&self, decision: &Decision, target_id: &str) -> Result<()> {
        let mut writer = self.writer.lock()?;
        let tx = writer.transaction()?;
        let exists: Option<String> = tx
            .query_row(
                "SELECT id FROM decisions WHERE tenant_id = ?1 AND id = ?2",
                params![decision.tenant_id, target_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(MemoryError::NotFound(format!(
                "superseded decision '{target_id}' not found"
            )));
        }
        tx.execute(
            "UPDATE decisions SET status = 'superseded' WHERE tenant_id = ?1 AND id = ?2",
            params![decision.tenant_id, target_id],
        )?;
        tx.execute(
            "INSERT INTO decisions (id, tenant_id, scope, text, status, supersedes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                decision.id,
                decision.tenant_id,
                decision.scope.as_str(),
                decision.text,
                decision.status.as_str(),
                decision.supersedes,
                fmt_ts(decision.created_at),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_decision(&self, tenant: &str, id: &str) -> Result<Option<Decision>> {
        let reader = self.reader.lock()?;
        let decision = reader
            .query_row(
                "SELECT * FROM decisions WHERE tenant_id = ?1 AND id = ?2",
                params![tenant, id],
                Self::row_to_decision,
            )
            .optional()?;
        Ok(decision)
    }

    pub fn list_decisions(
        &self,
        tenant: &str,
        scope: Option<DecisionScope>,
        status: Option<DecisionStatus>,
        limit: usize,
    ) -> Result<Vec<Decision>> {
        let reader = self.reader.lock()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM decisions
             WHERE tenant_id = ?1
               AND (?2 IS NULL OR scope = ?2)
               AND (?3 IS NULL OR status = ?3)
             ORDER BY created_at DESC, id DESC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![
                tenant,
                scope.map(|s| s.as_str()),
                status.map(|s| s.as_str()),
                limit as i64
            ],
            Self::row_to_decision,
        )?;
        let mut decisions = Vec::new();
        for row in rows {
            decisions.push(row?);
        }
        Ok(decisions)
    }

    /// Active decisions for wake-up: project and global scope only
    pub fn active_context_decisions(&self, tenant: &str, limit: usize) -> Result<Vec<Decision>> {
        let reader = self.reader.lock()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM decisions
             WHERE tenant_id = ?1 AND status = 'active' AND scope IN ('project', 'global')
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![tenant, limit as i64], Self::row_to_decision)?;
        let mut decisions = Vec::new();
        for row in rows {
            decisions.push(row?);
        }
        Ok(decisions)
    }

    /// Archive active decisions created before the cutoff; returns the count
    pub fn archive_decisions(&self, tenant: &str, cutoff: DateTime<Utc>) -> Result<i64> {
        let writer = self.writer.lock()?;
        let changed = writer.execute(
            "UPDATE decisions SET status = 'archived'
             WHERE tenant_id = ?1 AND status = 'active' AND created_at < ?2",
            params![tenant, fmt_ts(cutoff)],
        )?;
        Ok(changed as i64)
    }

    // ========================================================================
    // AGENT FEEDBACK
    // ========================================================================

    pub(super) fn row_to_feedback(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentFeedback> {
        let kind: String = row.get("kind")?;
        let status: String = row.get("status")?;
        let created_at: String = row.get("created_at")?;
        Ok(AgentFeedback {
            id: row.get("id")?,
            tenant_id: row.get("tenant_id")?,
            kind: FeedbackKind::parse_name(&kind).unwrap_or(FeedbackKind::Suggestion),
            text: row.get("text")?,
            status: FeedbackStatus::parse_name(&status).unwrap_or_default(),
            has_embedding: row.get::<_, i64>("has_embedding")? != 0,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_default(),
        })
    }

    pub fn insert_feedback(&self, feedback: &AgentFeedback) -> Result<()> {
        let mut writer = self.writer.lock()?;
        let tx = writer.transaction()?;
        tx.execute(
            "INSERT INTO agent_feedback (id, tenant_id, kind, text, status, has_embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                feedback.id,
                feedback.tenant_id,
                feedback.kind.as_str(),
                feedback.text,
                feedback.status.as_str(),
                feedback.has_embedding as i64,
                fmt_ts(feedback.created_at),
            ],
        )?;
        tx.execute(
            "INSERT INTO feedback_fts (id, tenant_id, body) VALUES (?1, ?2, ?3)",
            params![feedback.id, feedback.tenant_id, feedback.text],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_feedback(&self, tenant: &str, id: &str) -> Result<Option<AgentFeedback>> {
        let reader = self.reader.lock()?;
        let feedback = reader
            .query_row(
                "SELECT * FROM agent_feedback WHERE tenant_id = ?1 AND id = ?2",
                params![tenant, id],
                Self::row_to_feedback,
            )
            .optional()?;
        Ok(feedback)
    }

    pub fn list_feedback(
        &self,
        tenant: &str,
        status: Option<FeedbackStatus>,
        limit: usize,
    ) -> Result<Vec<AgentFeedback>> {
        let reader = self.reader.lock()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM agent_feedback
             WHERE tenant_id = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at DESC, id DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![tenant, status.map(|s| s.as_str()), limit as i64],
            Self::row_to_feedback,
        )?;
        let mut feedback = Vec::new();
        for row in rows {
            feedback.push(row?);
        }
        Ok(feedback)
    }

    pub fn set_feedback_status(
        &self,
        tenant: &str,
        id: &str,
        status: FeedbackStatus,
    ) -> Result<()> {
        let writer = self.writer.lock()?;
        let changed = writer.execute(
            "UPDATE agent_feedback SET status = ?1 WHERE tenant_id = ?2 AND id = ?3",
            params![status.as_str(), tenant, id],
        )?;
        if changed == 0 {
            return Err(MemoryError::NotFound(format!("feedback '{id}' not found")));
        }
        Ok(())
    }

    // ========================================================================
    // CAPSULES
    // ========================================================================

    pub(super) fn row_to_capsule(row: &rusqlite::Row<'_>) -> rusqlite::Result<Capsule> {
        let scope: String = row.get("scope")?;
        let status: String = row.get("status")?;
        let audience: String = row.get("audience_agent_ids")?;
        let items: String = row.get("items")?;
        let risks: String = row.get("risks")?;
        let created_at: String = row.get("created_at")?;
        let expires_at: String = row.get("expires_at")?;
        Ok(Capsule {
            id: row.get("id")?,
            tenant_id: row.get("tenant_id")?,
            scope: CapsuleScope::parse_name(&scope).unwrap_or_default(),
            subject_type: row.get("subject_type")?,
            subject_id: row.get("subject_id")?,
            author_agent_id: row.get("author_agent_id")?,
            audience_agent_ids: json_strings(&audience),
            ttl_days: row.get("ttl_days")?,
            status: CapsuleStatus::parse_name(&status).unwrap_or_default(),
            items: serde_json::from_str(&items).unwrap_or_default(),
            risks: json_strings(&risks),
            has_embedding: row.get::<_, i64>("has_embedding")? != 0,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_default(),
            expires_at: DateTime::parse_from_rfc3339(&expires_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_default(),
        })
    }

    pub fn insert_capsule(&self, capsule: &Capsule) -> Result<()> {
        let mut writer = self.writer.lock()?;
        let tx = writer.transaction()?;
        tx.execute(
            "INSERT INTO capsules (
                id, tenant_id, scope, subject_type, subject_id, author_agent_id,
                audience_agent_ids, ttl_days, status, items, risks,
                has_embedding, created_at, expires_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                capsule.id,
                capsule.tenant_id,
                capsule.scope.as_str(),
                capsule.subject_type,
                capsule.subject_id,
                capsule.author_agent_id,
                serde_json::to_string(&capsule.audience_agent_ids)?,
                capsule.ttl_days,
                capsule.status.as_str(),
                serde_json::to_string(&capsule.items)?,
                serde_json::to_string(&capsule.risks)?,
                capsule.has_embedding as i64,
                fmt_ts(capsule.created_at),
                fmt_ts(capsule.expires_at),
            ],
        )?;
        tx.execute(
            "INSERT INTO capsule_fts (id, tenant_id, body) VALUES (?1, ?2, ?3)",
            params![capsule.id, capsule.tenant_id, capsule.embedding_text()],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_capsule(&self, tenant: &str, id: &str) -> Result<Option<Capsule>> {
        let reader = self.reader.lock()?;
        let capsule = reader
            .query_row(
                "SELECT * FROM capsules WHERE tenant_id = ?1 AND id = ?2",
                params![tenant, id],
                Self::row_to_capsule,
            )
            .optional()?;
        Ok(capsule)
    }

    pub fn list_capsules(&self, tenant: &str, limit: usize) -> Result<Vec<Capsule>> {
        let reader = self.reader.lock()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM capsules
             WHERE tenant_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![tenant, limit as i64], Self::row_to_capsule)?;
        let mut capsules = Vec::new();
        for row in rows {
            capsules.push(row?);
        }
        Ok(capsules)
    }

    /// Capsules that have not expired as of `now`, newest first
    pub fn live_capsules(&self, tenant: &str, now: DateTime<Utc>) -> Result<Vec<Capsule>> {
        let reader = self.reader.lock()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM capsules
             WHERE tenant_id = ?1 AND status = 'active' AND expires_at > ?2
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![tenant, fmt_ts(now)], Self::row_to_capsule)?;
        let mut capsules = Vec::new();
        for row in rows {
            capsules.push(row?);
        }
        Ok(capsules)
    }

    pub fn set_capsule_status(&self, tenant: &str, id: &str, status: CapsuleStatus) -> Result<()> {
        let writer = self.writer.lock()?;
        let changed = writer.execute(
            "UPDATE capsules SET status = ?1 WHERE tenant_id = ?2 AND id = ?3",
            params![status.as_str(), tenant, id],
        )?;
        if changed == 0 {
            return Err(MemoryError::NotFound(format!("capsule '{id}' not found")));
        }
        Ok(())
    }

}

// ============================================================================
// TESTS
// ============================================================================
