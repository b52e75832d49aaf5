//! Memory operations - the write/read verbs of the engine.
//!
//! Every verb takes the authenticated [`RequestContext`] first, validates its
//! input, emits an observability event on mutation, and hands embedding work
//! to the bounded queue. Handoffs and decisions are never hard-deleted.

mod wake;

pub use wake::{WakeBundle, WakeInput};

use std::sync::{Arc, OnceLock};

use chrono::Utc;

use crate::context::RequestContext;
use crate::embeddings::{EmbedRequest, EmbeddingQueue};
use crate::error::{MemoryError, Result};
use crate::ids;
use crate::model::{
    AgentFeedback, Capsule, CapsuleInput, CapsuleScope, CapsuleStatus, Decision, DecisionScope,
    DecisionStatus, FeedbackKind, FeedbackStatus, Handoff, HandoffInput, HandoffView,
    IdentityThreadEntry, KnowledgeNote, MemoryKind, NoteInput,
};
use crate::storage::{HandoffFilter, Store};

/// Default and maximum page sizes for listings
const DEFAULT_PAGE: usize = 20;
const MAX_PAGE: usize = 100;

/// Default confidence for notes that do not state one
const DEFAULT_CONFIDENCE: f64 = 0.8;

/// Default capsule TTL in days
pub const DEFAULT_TTL_DAYS: i64 = 7;

/// Core write/read verbs over the store
pub struct MemoryOps {
    store: Arc<Store>,
    embed_queue: OnceLock<EmbeddingQueue>,
}

impl MemoryOps {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            embed_queue: OnceLock::new(),
        }
    }

    /// Attach the embedding queue once the runtime exists.
    ///
    /// Writes before attachment simply skip the enqueue; the consolidator's
    /// backfill picks them up.
    pub fn attach_embed_queue(&self, queue: EmbeddingQueue) {
        let _ = self.embed_queue.set(queue);
    }

    fn enqueue_embed(&self, kind: MemoryKind, tenant: &str, entity_id: &str, text: String) {
        if let Some(queue) = self.embed_queue.get() {
            queue.enqueue(EmbedRequest {
                kind,
                tenant_id: tenant.to_string(),
                entity_id: entity_id.to_string(),
                text,
            });
        }
    }

    fn require(field: &str, value: &str) -> Result<()> {
        if value.trim().is_empty() {
            Err(MemoryError::Validation(format!("'{field}' is required")))
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // HANDOFFS
    // ========================================================================

    /// Create a session handoff at compression level `full`
    pub fn create_handoff(&self, ctx: &RequestContext, input: HandoffInput) -> Result<Handoff> {
        Self::require("session_id", &input.session_id)?;
        Self::require("with_whom", &input.with_whom)?;
        Self::require("experienced", &input.experienced)?;
        Self::require("noticed", &input.noticed)?;
        Self::require("learned", &input.learned)?;
        Self::require("remember", &input.remember)?;
        if !(0.0..=1.0).contains(&input.significance) {
            return Err(MemoryError::Validation(format!(
                "significance must be in [0, 1], got {}",
                input.significance
            )));
        }

        let handoff = Handoff {
            id: ids::new_id(ids::HANDOFF),
            tenant_id: ctx.tenant_id.clone(),
            session_id: input.session_id,
            with_whom: input.with_whom,
            experienced: input.experienced,
            noticed: input.noticed,
            learned: input.learned,
            story: input.story,
            becoming: input.becoming,
            remember: input.remember,
            significance: input.significance,
            tags: input.tags,
            compression_level: Default::default(),
            summary: None,
            quick_ref: None,
            integrated_into: None,
            parent_handoff_id: input.parent_handoff_id,
            influenced_by: input.influenced_by,
            consolidated_at: None,
            has_embedding: false,
            created_at: Utc::now(),
        };
        self.store.insert_handoff(&handoff)?;
        self.store
            .append_event(&ctx.tenant_id, "handoff.created", &handoff.id)?;
        self.enqueue_embed(
            MemoryKind::SessionHandoffs,
            &ctx.tenant_id,
            &handoff.id,
            handoff.embedding_text(),
        );
        Ok(handoff)
    }

    /// Most recent handoff, projected at its compression level
    pub fn get_last_handoff(
        &self,
        ctx: &RequestContext,
        with_whom: Option<&str>,
        expand: bool,
    ) -> Result<Option<HandoffView>> {
        Ok(self
            .store
            .last_handoff(&ctx.tenant_id, with_whom)?
            .map(|h| HandoffView::project(h, expand)))
    }

    /// Keyset-paginated listing; returns views plus an opaque next cursor
    pub fn list_handoffs(
        &self,
        ctx: &RequestContext,
        filter: HandoffFilter,
        limit: Option<usize>,
        cursor: Option<&str>,
        expand: bool,
    ) -> Result<(Vec<HandoffView>, Option<String>)> {
        let limit = limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
        let cursor = cursor.map(decode_cursor).transpose()?;
        let handoffs = self
            .store
            .list_handoffs(&ctx.tenant_id, &filter, limit, cursor)?;
        let next = if handoffs.len() == limit {
            handoffs.last().map(encode_cursor)
        } else {
            None
        };
        let views = handoffs
            .into_iter()
            .map(|h| HandoffView::project(h, expand))
            .collect();
        Ok((views, next))
    }

    /// Identity thread for a counterpart, newest first
    pub fn get_identity_thread(
        &self,
        ctx: &RequestContext,
        with_whom: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<IdentityThreadEntry>> {
        let limit = limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
        self.store
            .identity_thread(&ctx.tenant_id, with_whom, limit)
    }

    // ========================================================================
    // KNOWLEDGE NOTES
    // ========================================================================

    pub fn create_knowledge_note(
        &self,
        ctx: &RequestContext,
        input: NoteInput,
    ) -> Result<KnowledgeNote> {
        Self::require("text", &input.text)?;
        let confidence = input.confidence.unwrap_or(DEFAULT_CONFIDENCE);
        if !(0.0..=1.0).contains(&confidence) {
            return Err(MemoryError::Validation(format!(
                "confidence must be in [0, 1], got {confidence}"
            )));
        }

        let note = KnowledgeNote {
            id: ids::new_id(ids::NOTE),
            tenant_id: ctx.tenant_id.clone(),
            text: input.text,
            tags: input.tags,
            project_path: input.project_path,
            confidence,
            source_handoffs: input.source_handoffs,
            has_embedding: false,
            created_at: Utc::now(),
        };
        self.store.insert_note(&note)?;
        self.store
            .append_event(&ctx.tenant_id, "note.created", &note.id)?;
        self.enqueue_embed(
            MemoryKind::KnowledgeNotes,
            &ctx.tenant_id,
            &note.id,
            note.text.clone(),
        );
        Ok(note)
    }

    /// Convenience wrapper: only `text` is required; the counterpart is
    /// folded into the tags as `with:<whom>`.
    pub fn remember_note(
        &self,
        ctx: &RequestContext,
        text: String,
        mut tags: Vec<String>,
        with_whom: Option<String>,
    ) -> Result<KnowledgeNote> {
        if let Some(whom) = with_whom {
            tags.push(format!("with:{whom}"));
        }
        self.create_knowledge_note(
            ctx,
            NoteInput {
                text,
                tags,
                project_path: None,
                source_handoffs: Vec::new(),
                confidence: None,
            },
        )
    }

    pub fn get_knowledge_notes(
        &self,
        ctx: &RequestContext,
        project_path: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<KnowledgeNote>> {
        let limit = limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
        self.store.list_notes(&ctx.tenant_id, project_path, limit)
    }

    /// Hard-delete a note, refused while edges still reference it
    pub fn delete_knowledge_note(&self, ctx: &RequestContext, note_id: &str) -> Result<()> {
        let touching = self.store.edges_touching(&ctx.tenant_id, note_id)?;
        if touching > 0 {
            return Err(MemoryError::ReferentialIntegrity(format!(
                "node '{note_id}' is referenced by {touching} edge(s)"
            )));
        }
        if !self.store.delete_note(&ctx.tenant_id, note_id)? {
            return Err(MemoryError::NotFound(format!("note '{note_id}' not found")));
        }
        self.store
            .append_event(&ctx.tenant_id, "note.deleted", note_id)?;
        Ok(())
    }

    // ========================================================================
    // DECISIONS
    // ========================================================================

    /// Record a decision; with `supersedes`, the target's status flips to
    /// `superseded` in the same transaction as the insert.
    pub fn create_decision(
        &self,
        ctx: &RequestContext,
        scope: DecisionScope,
        text: String,
        supersedes: Option<String>,
    ) -> Result<Decision> {
        Self::require("text", &text)?;
        let decision = Decision {
            id: ids::new_id(ids::DECISION),
            tenant_id: ctx.tenant_id.clone(),
            scope,
            text,
            status: DecisionStatus::Active,
            supersedes: supersedes.clone(),
            created_at: Utc::now(),
        };
        match &supersedes {
            Some(target) => {
                self.store.insert_decision_superseding(&decision, target)?;
                self.store
                    .append_event(&ctx.tenant_id, "decision.superseded", target)?;
            }
            None => self.store.insert_decision(&decision)?,
        }
        self.store
            .append_event(&ctx.tenant_id, "decision.created", &decision.id)?;
        Ok(decision)
    }

    pub fn list_decisions(
        &self,
        ctx: &RequestContext,
        scope: Option<DecisionScope>,
        status: Option<DecisionStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<Decision>> {
        let limit = limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
        self.store
            .list_decisions(&ctx.tenant_id, scope, status, limit)
    }

    /// Consolidated principles: active global-scope decisions
    pub fn list_semantic_principles(
        &self,
        ctx: &RequestContext,
        limit: Option<usize>,
    ) -> Result<Vec<Decision>> {
        self.list_decisions(
            ctx,
            Some(DecisionScope::Global),
            Some(DecisionStatus::Active),
            limit,
        )
    }

    // ========================================================================
    // CAPSULES
    // ========================================================================

    /// Create a capsule; referenced decisions must resolve in the tenant
    pub fn create_capsule(&self, ctx: &RequestContext, input: CapsuleInput) -> Result<Capsule> {
        Self::require("subject_type", &input.subject_type)?;
        Self::require("subject_id", &input.subject_id)?;
        let ttl_days = input.ttl_days.unwrap_or(DEFAULT_TTL_DAYS);
        if ttl_days < 0 {
            return Err(MemoryError::Validation(format!(
                "ttl_days must be non-negative, got {ttl_days}"
            )));
        }
        for decision_id in &input.items.decisions {
            if self.store.get_decision(&ctx.tenant_id, decision_id)?.is_none() {
                return Err(MemoryError::NotFound(format!(
                    "capsule references unknown decision '{decision_id}'"
                )));
            }
        }

        let created_at = Utc::now();
        let capsule = Capsule {
            id: ids::new_id(ids::CAPSULE),
            tenant_id: ctx.tenant_id.clone(),
            scope: input.scope,
            subject_type: input.subject_type,
            subject_id: input.subject_id,
            author_agent_id: ctx.principal_id.clone(),
            audience_agent_ids: input.audience_agent_ids,
            ttl_days,
            status: CapsuleStatus::Active,
            items: input.items,
            risks: input.risks,
            has_embedding: false,
            created_at,
            expires_at: Capsule::expiry(created_at, ttl_days),
        };
        self.store.insert_capsule(&capsule)?;
        self.store
            .append_event(&ctx.tenant_id, "capsule.created", &capsule.id)?;
        self.enqueue_embed(
            MemoryKind::Capsules,
            &ctx.tenant_id,
            &capsule.id,
            capsule.embedding_text(),
        );
        Ok(capsule)
    }

    /// Capsules visible to the principal, with clock-derived status
    pub fn get_capsules(
        &self,
        ctx: &RequestContext,
        include_expired: bool,
        limit: Option<usize>,
    ) -> Result<Vec<Capsule>> {
        let limit = limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
        let now = Utc::now();
        let capsules = self
            .store
            .list_capsules(&ctx.tenant_id, limit)?
            .into_iter()
            .filter(|c| c.is_visible_to(&ctx.principal_id))
            .map(|mut c| {
                c.status = c.effective_status(now);
                c
            })
            .filter(|c| include_expired || c.status != CapsuleStatus::Expired)
            .collect();
        Ok(capsules)
    }

    /// Revoke a capsule.
    ///
    /// Fails with `ExpiredCapsule` past expiry; only the author, or an
    /// audience member of a global-scope capsule, may revoke. Revoking an
    /// already-revoked capsule is a no-op.
    pub fn revoke_capsule(&self, ctx: &RequestContext, capsule_id: &str) -> Result<Capsule> {
        let mut capsule = self
            .store
            .get_capsule(&ctx.tenant_id, capsule_id)?
            .ok_or_else(|| MemoryError::NotFound(format!("capsule '{capsule_id}' not found")))?;
        let now = Utc::now();
        if capsule.is_expired(now) {
            return Err(MemoryError::ExpiredCapsule(format!(
                "capsule '{capsule_id}' expired at {}",
                capsule.expires_at
            )));
        }
        let is_author = capsule.author_agent_id == ctx.principal_id;
        let audience_global = capsule.scope == CapsuleScope::Global
            && capsule.is_visible_to(&ctx.principal_id);
        if !is_author && !audience_global {
            return Err(MemoryError::Conflict(format!(
                "principal '{}' may not revoke capsule '{capsule_id}'",
                ctx.principal_id
            )));
        }
        if capsule.status != CapsuleStatus::Revoked {
            self.store
                .set_capsule_status(&ctx.tenant_id, capsule_id, CapsuleStatus::Revoked)?;
            self.store
                .append_event(&ctx.tenant_id, "capsule.revoked", capsule_id)?;
        }
        capsule.status = CapsuleStatus::Revoked;
        Ok(capsule)
    }

    // ========================================================================
    // AGENT FEEDBACK
    // ========================================================================

    pub fn submit_feedback(
        &self,
        ctx: &RequestContext,
        kind: FeedbackKind,
        text: String,
    ) -> Result<AgentFeedback> {
        Self::require("text", &text)?;
        let feedback = AgentFeedback {
            id: ids::new_id(ids::FEEDBACK),
            tenant_id: ctx.tenant_id.clone(),
            kind,
            text,
            status: FeedbackStatus::Open,
            has_embedding: false,
            created_at: Utc::now(),
        };
        self.store.insert_feedback(&feedback)?;
        self.store
            .append_event(&ctx.tenant_id, "feedback.created", &feedback.id)?;
        self.enqueue_embed(
            MemoryKind::AgentFeedback,
            &ctx.tenant_id,
            &feedback.id,
            feedback.text.clone(),
        );
        Ok(feedback)
    }

    pub fn get_agent_feedback(
        &self,
        ctx: &RequestContext,
        status: Option<FeedbackStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<AgentFeedback>> {
        let limit = limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
        self.store.list_feedback(&ctx.tenant_id, status, limit)
    }

    /// Transition a feedback item per the status table
    pub fn update_feedback_status(
        &self,
        ctx: &RequestContext,
        feedback_id: &str,
        new_status: FeedbackStatus,
    ) -> Result<AgentFeedback> {
        let mut feedback = self
            .store
            .get_feedback(&ctx.tenant_id, feedback_id)?
            .ok_or_else(|| MemoryError::NotFound(format!("feedback '{feedback_id}' not found")))?;
        if !feedback.status.can_transition_to(new_status) {
            return Err(MemoryError::Conflict(format!(
                "feedback transition {} -> {} is not permitted",
                feedback.status.as_str(),
                new_status.as_str()
            )));
        }
        self.store
            .set_feedback_status(&ctx.tenant_id, feedback_id, new_status)?;
        self.store
            .append_event(&ctx.tenant_id, "feedback.updated", feedback_id)?;
        feedback.status = new_status;
        Ok(feedback)
    }

    /// Shared store handle, for composed operations
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}

// ============================================================================
// CURSORS
// ============================================================================

fn encode_cursor(handoff: &Handoff) -> String {
    format!(
        "{}|{}",
        handoff
            .created_at
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        handoff.id
    )
}

fn decode_cursor(cursor: &str) -> Result<(String, String)> {
    cursor
        .split_once('|')
        .map(|(ts, id)| (ts.to_string(), id.to_string()))
        .ok_or_else(|| MemoryError::Validation(format!("malformed cursor '{cursor}'")))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::DEFAULT_DIMENSION;
    use crate::model::{CapsuleItems, CompressionLevel};
    use tempfile::TempDir;

    pub(crate) fn test_ops() -> (MemoryOps, Arc<Store>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            Store::open(Some(dir.path().join("test.db")), DEFAULT_DIMENSION).unwrap(),
        );
        (MemoryOps::new(store.clone()), store, dir)
    }

    pub(crate) fn ctx() -> RequestContext {
        RequestContext::new("default", "Callin")
    }

    pub(crate) fn handoff_input() -> HandoffInput {
        HandoffInput {
            session_id: "s1".into(),
            with_whom: "Callin".into(),
            experienced: "built X".into(),
            noticed: "Y".into(),
            learned: "Z".into(),
            story: None,
            becoming: Some("becoming continuous".into()),
            remember: "test".into(),
            significance: 0.8,
            tags: vec![],
            parent_handoff_id: None,
            influenced_by: None,
        }
    }

    #[test]
    fn test_create_and_get_last_handoff() {
        let (ops, _store, _dir) = test_ops();
        let created = ops.create_handoff(&ctx(), handoff_input()).unwrap();
        assert!(created.id.starts_with("hof_"));
        assert_eq!(created.compression_level, CompressionLevel::Full);

        let last = ops
            .get_last_handoff(&ctx(), Some("Callin"), false)
            .unwrap()
            .unwrap();
        assert_eq!(last.id, created.id);
        assert_eq!(last.experienced.as_deref(), Some("built X"));
    }

    #[test]
    fn test_significance_bounds() {
        let (ops, _store, _dir) = test_ops();
        for ok in [0.0, 1.0] {
            let mut input = handoff_input();
            input.significance = ok;
            assert!(ops.create_handoff(&ctx(), input).is_ok());
        }
        for bad in [-0.0001, 1.0001, f64::NAN] {
            let mut input = handoff_input();
            input.significance = bad;
            assert_eq!(
                ops.create_handoff(&ctx(), input).unwrap_err().kind(),
                "validation_error"
            );
        }
    }

    #[test]
    fn test_required_fields() {
        let (ops, _store, _dir) = test_ops();
        let mut input = handoff_input();
        input.learned = "  ".into();
        assert_eq!(
            ops.create_handoff(&ctx(), input).unwrap_err().kind(),
            "validation_error"
        );
    }

    #[test]
    fn test_mutations_emit_events() {
        let (ops, store, _dir) = test_ops();
        let handoff = ops.create_handoff(&ctx(), handoff_input()).unwrap();
        let events = store.recent_events("default", 10).unwrap();
        assert!(events
            .iter()
            .any(|e| e.kind == "handoff.created" && e.subject_id == handoff.id));
    }

    #[test]
    fn test_list_handoffs_pagination_cursor() {
        let (ops, _store, _dir) = test_ops();
        for i in 0..5 {
            let mut input = handoff_input();
            input.session_id = format!("s{i}");
            ops.create_handoff(&ctx(), input).unwrap();
        }

        let (page1, cursor) = ops
            .list_handoffs(&ctx(), HandoffFilter::default(), Some(3), None, false)
            .unwrap();
        assert_eq!(page1.len(), 3);
        let cursor = cursor.expect("full page yields a cursor");

        let (page2, _) = ops
            .list_handoffs(
                &ctx(),
                HandoffFilter::default(),
                Some(3),
                Some(&cursor),
                false,
            )
            .unwrap();
        assert_eq!(page2.len(), 2);
        assert!(page1.iter().all(|a| page2.iter().all(|b| a.id != b.id)));

        assert_eq!(
            ops.list_handoffs(&ctx(), HandoffFilter::default(), None, Some("bad"), false)
                .unwrap_err()
                .kind(),
            "validation_error"
        );
    }

    #[test]
    fn test_remember_note_minimal_validation() {
        let (ops, _store, _dir) = test_ops();
        let note = ops
            .remember_note(&ctx(), "remember this".into(), vec![], Some("Ada".into()))
            .unwrap();
        assert!(note.tags.contains(&"with:Ada".to_string()));

        assert_eq!(
            ops.remember_note(&ctx(), "  ".into(), vec![], None)
                .unwrap_err()
                .kind(),
            "validation_error"
        );
    }

    #[test]
    fn test_capsule_lifecycle() {
        let (ops, _store, _dir) = test_ops();
        let capsule = ops
            .create_capsule(
                &ctx(),
                CapsuleInput {
                    scope: CapsuleScope::Project,
                    subject_type: "repo".into(),
                    subject_id: "continuum".into(),
                    audience_agent_ids: vec!["*".into()],
                    ttl_days: None,
                    items: CapsuleItems::default(),
                    risks: vec![],
                },
            )
            .unwrap();
        assert_eq!(capsule.ttl_days, DEFAULT_TTL_DAYS);
        assert_eq!(capsule.author_agent_id, "Callin");

        let visible = ops.get_capsules(&ctx(), true, None).unwrap();
        assert_eq!(visible.len(), 1);

        let revoked = ops.revoke_capsule(&ctx(), &capsule.id).unwrap();
        assert_eq!(revoked.status, CapsuleStatus::Revoked);
        // Idempotent
        assert!(ops.revoke_capsule(&ctx(), &capsule.id).is_ok());
    }

    #[test]
    fn test_zero_ttl_capsule_expires_immediately() {
        let (ops, _store, _dir) = test_ops();
        let capsule = ops
            .create_capsule(
                &ctx(),
                CapsuleInput {
                    scope: CapsuleScope::User,
                    subject_type: "session".into(),
                    subject_id: "s1".into(),
                    audience_agent_ids: vec!["*".into()],
                    ttl_days: Some(0),
                    items: CapsuleItems::default(),
                    risks: vec![],
                },
            )
            .unwrap();

        let listed = ops.get_capsules(&ctx(), true, None).unwrap();
        assert_eq!(listed[0].status, CapsuleStatus::Expired);
        // Excluded when expired capsules are filtered
        assert!(ops.get_capsules(&ctx(), false, None).unwrap().is_empty());

        let err = ops.revoke_capsule(&ctx(), &capsule.id).unwrap_err();
        assert_eq!(err.kind(), "expired_capsule");
    }

    #[test]
    fn test_capsule_referencing_unknown_decision_fails() {
        let (ops, _store, _dir) = test_ops();
        let err = ops
            .create_capsule(
                &ctx(),
                CapsuleInput {
                    scope: CapsuleScope::User,
                    subject_type: "repo".into(),
                    subject_id: "x".into(),
                    audience_agent_ids: vec![],
                    ttl_days: None,
                    items: CapsuleItems {
                        chunks: vec![],
                        decisions: vec!["dec_ghost".into()],
                        artifacts: vec![],
                    },
                    risks: vec![],
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_revoke_permission_rules() {
        let (ops, _store, _dir) = test_ops();
        let capsule = ops
            .create_capsule(
                &ctx(),
                CapsuleInput {
                    scope: CapsuleScope::Project,
                    subject_type: "repo".into(),
                    subject_id: "x".into(),
                    audience_agent_ids: vec!["other".into()],
                    ttl_days: None,
                    items: CapsuleItems::default(),
                    risks: vec![],
                },
            )
            .unwrap();

        // Audience member of a non-global capsule cannot revoke
        let other = RequestContext::new("default", "other");
        assert_eq!(
            ops.revoke_capsule(&other, &capsule.id).unwrap_err().kind(),
            "conflict"
        );

        // Audience member of a global capsule can
        let global = ops
            .create_capsule(
                &ctx(),
                CapsuleInput {
                    scope: CapsuleScope::Global,
                    subject_type: "repo".into(),
                    subject_id: "y".into(),
                    audience_agent_ids: vec!["other".into()],
                    ttl_days: None,
                    items: CapsuleItems::default(),
                    risks: vec![],
                },
            )
            .unwrap();
        assert!(ops.revoke_capsule(&other, &global.id).is_ok());
    }

    #[test]
    fn test_decision_supersession() {
        let (ops, _store, _dir) = test_ops();
        let old = ops
            .create_decision(&ctx(), DecisionScope::Project, "old way".into(), None)
            .unwrap();
        let new = ops
            .create_decision(
                &ctx(),
                DecisionScope::Project,
                "new way".into(),
                Some(old.id.clone()),
            )
            .unwrap();
        assert_eq!(new.supersedes.as_deref(), Some(old.id.as_str()));

        let decisions = ops.list_decisions(&ctx(), None, None, None).unwrap();
        let old_row = decisions.iter().find(|d| d.id == old.id).unwrap();
        assert_eq!(old_row.status, DecisionStatus::Superseded);

        assert_eq!(
            ops.create_decision(
                &ctx(),
                DecisionScope::Project,
                "x".into(),
                Some("dec_ghost".into())
            )
            .unwrap_err()
            .kind(),
            "not_found"
        );
    }

    #[test]
    fn test_semantic_principles_are_global_active() {
        let (ops, _store, _dir) = test_ops();
        ops.create_decision(&ctx(), DecisionScope::Global, "principle".into(), None)
            .unwrap();
        ops.create_decision(&ctx(), DecisionScope::Project, "local call".into(), None)
            .unwrap();

        let principles = ops.list_semantic_principles(&ctx(), None).unwrap();
        assert_eq!(principles.len(), 1);
        assert_eq!(principles[0].text, "principle");
    }

    #[test]
    fn test_feedback_transitions() {
        let (ops, _store, _dir) = test_ops();
        let feedback = ops
            .submit_feedback(&ctx(), FeedbackKind::Friction, "too many tools".into())
            .unwrap();
        assert_eq!(feedback.status, FeedbackStatus::Open);

        let reviewed = ops
            .update_feedback_status(&ctx(), &feedback.id, FeedbackStatus::Reviewed)
            .unwrap();
        assert_eq!(reviewed.status, FeedbackStatus::Reviewed);

        let addressed = ops
            .update_feedback_status(&ctx(), &feedback.id, FeedbackStatus::Addressed)
            .unwrap();
        assert_eq!(addressed.status, FeedbackStatus::Addressed);

        // Terminal state is frozen
        assert_eq!(
            ops.update_feedback_status(&ctx(), &feedback.id, FeedbackStatus::Open)
                .unwrap_err()
                .kind(),
            "conflict"
        );
    }

    #[test]
    fn test_note_delete_blocked_by_edges() {
        let (ops, store, _dir) = test_ops();
        let note = ops
            .create_knowledge_note(
                &ctx(),
                NoteInput {
                    text: "a node".into(),
                    tags: vec![],
                    project_path: None,
                    source_handoffs: vec![],
                    confidence: None,
                },
            )
            .unwrap();
        let other = ops
            .create_knowledge_note(
                &ctx(),
                NoteInput {
                    text: "another node".into(),
                    tags: vec![],
                    project_path: None,
                    source_handoffs: vec![],
                    confidence: None,
                },
            )
            .unwrap();

        let graph = crate::graph::GraphService::new(store.clone());
        let edge = graph
            .create_edge(
                &ctx(),
                &note.id,
                &other.id,
                crate::model::EdgeType::References,
                None,
            )
            .unwrap();

        assert_eq!(
            ops.delete_knowledge_note(&ctx(), &note.id)
                .unwrap_err()
                .kind(),
            "referential_integrity"
        );

        graph.delete_edge(&ctx(), &edge.id).unwrap();
        assert!(ops.delete_knowledge_note(&ctx(), &note.id).is_ok());
    }

    #[test]
    fn test_tenant_rows_invisible_across_tenants() {
        let (ops, _store, _dir) = test_ops();
        ops.create_handoff(&ctx(), handoff_input()).unwrap();

        let other = RequestContext::new("other-tenant", "someone");
        assert!(ops.get_last_handoff(&other, None, false).unwrap().is_none());
        assert!(ops
            .list_handoffs(&other, HandoffFilter::default(), None, None, false)
            .unwrap()
            .0
            .is_empty());
        assert!(ops.get_identity_thread(&other, None, None).unwrap().is_empty());
    }
}
