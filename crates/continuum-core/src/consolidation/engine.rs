//! The consolidation engine.
//!
//! One job per `(tenant, job_type)` per run, leased through the store so a
//! second trigger gets the running job's id back. Every item is its own
//! sub-transaction: a retried job makes forward progress instead of
//! repeating finished work. LLM failures degrade to deterministic fallbacks;
//! only store failures fail a job.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::identity::{cluster, ClusterMember};
use crate::embeddings::Embedder;
use crate::error::Result;
use crate::ids;
use crate::llm::{
    bullet_summary, first_sentence, principle_from_statements, truncate_to_tokens, LanguageModel,
};
use crate::model::{
    estimate_tokens, CompressionLevel, Decision, DecisionScope, DecisionStatus, Handoff,
    JobStatus, JobType, MemoryKind,
};
use crate::storage::{JobAcquisition, Store};

// ============================================================================
// CONFIG
// ============================================================================

/// Thresholds and knobs, all overridable
#[derive(Debug, Clone)]
pub struct ConsolidationConfig {
    /// Age before a `full` handoff gains a summary
    pub summary_threshold_days: i64,
    /// Age before a `summary` handoff shrinks to a quick_ref
    pub quick_ref_threshold_days: i64,
    /// Age before a `quick_ref` handoff folds into a principle
    pub integration_threshold_days: i64,
    /// Age before an active decision is archived
    pub decision_archive_threshold_days: i64,
    /// Cluster size that triggers a consolidated principle
    pub identity_min_count: usize,
    /// Cosine floor for identity clustering
    pub similarity_threshold: f32,
    /// Keyword overlap floor for identity clustering
    pub keyword_overlap_threshold: f64,
    /// Jaccard floor when embeddings are missing
    pub jaccard_fallback_threshold: f64,
    /// Running jobs older than this are failed and replaced
    pub stale_job_timeout: Duration,
    /// Summary size target
    pub summary_target_tokens: usize,
    /// Quick-ref size target
    pub quick_ref_target_tokens: usize,
    /// Embedding backfill batch per maintenance run
    pub embed_backfill_batch: usize,
    /// Idempotency record TTL
    pub idempotency_ttl: Duration,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            summary_threshold_days: 30,
            quick_ref_threshold_days: 90,
            integration_threshold_days: 180,
            decision_archive_threshold_days: 60,
            identity_min_count: 10,
            similarity_threshold: 0.82,
            keyword_overlap_threshold: 0.30,
            jaccard_fallback_threshold: 0.40,
            stale_job_timeout: Duration::hours(1),
            summary_target_tokens: 500,
            quick_ref_target_tokens: 100,
            embed_backfill_batch: 64,
            idempotency_ttl: Duration::hours(48),
        }
    }
}

/// Which scheduled tick is firing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickKind {
    /// Compression steps 1-2 plus maintenance
    Daily,
    /// Adds identity consolidation and decision archival
    Weekly,
    /// Adds integration (compression step 3)
    Monthly,
}

impl TickKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickKind::Daily => "daily",
            TickKind::Weekly => "weekly",
            TickKind::Monthly => "monthly",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(TickKind::Daily),
            "weekly" => Some(TickKind::Weekly),
            "monthly" => Some(TickKind::Monthly),
            _ => None,
        }
    }
}

/// One job's outcome within a tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub items_processed: i64,
    pub items_affected: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Everything one tick did for one tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickReport {
    pub tenant_id: String,
    pub tick: TickKind,
    pub jobs: Vec<JobOutcome>,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Scheduled/triggered consolidation over the store
pub struct ConsolidationEngine {
    store: Arc<Store>,
    embedder: Arc<dyn Embedder>,
    llm: Option<Arc<dyn LanguageModel>>,
    config: ConsolidationConfig,
}

impl ConsolidationEngine {
    pub fn new(
        store: Arc<Store>,
        embedder: Arc<dyn Embedder>,
        llm: Option<Arc<dyn LanguageModel>>,
        config: ConsolidationConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            llm,
            config,
        }
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    /// Run one tick for one tenant. `now` is explicit so tests and replays
    /// can drive a simulated clock.
    pub fn run_tick(&self, tenant: &str, tick: TickKind, now: DateTime<Utc>) -> TickReport {
        let mut jobs = Vec::new();

        let include_integration = tick == TickKind::Monthly;
        jobs.push(self.run_handoff_compression(tenant, now, include_integration));
        jobs.push(self.run_maintenance(tenant, now));

        if matches!(tick, TickKind::Weekly | TickKind::Monthly) {
            jobs.push(self.run_identity_consolidation(tenant, now));
            jobs.push(self.run_decision_archival(tenant, now));
        }

        for job in &jobs {
            info!(
                tenant,
                job_type = job.job_type.as_str(),
                status = job.status.as_str(),
                items_processed = job.items_processed,
                items_affected = job.items_affected,
                "consolidation job finished"
            );
        }

        TickReport {
            tenant_id: tenant.to_string(),
            tick,
            jobs,
        }
    }

    fn lease(&self, tenant: &str, job_type: JobType, now: DateTime<Utc>) -> Result<JobAcquisition> {
        self.store
            .acquire_job(tenant, job_type, now, self.config.stale_job_timeout)
    }

    fn outcome_running(job_id: String, job_type: JobType) -> JobOutcome {
        JobOutcome {
            job_id,
            job_type,
            status: JobStatus::Running,
            items_processed: 0,
            items_affected: 0,
            error_message: None,
        }
    }

    fn finish(
        &self,
        tenant: &str,
        job_id: &str,
        job_type: JobType,
        processed: i64,
        affected: i64,
        now: DateTime<Utc>,
        result: Result<()>,
    ) -> JobOutcome {
        match result {
            Ok(()) => {
                if let Err(e) = self.store.complete_job(tenant, job_id, processed, affected, now) {
                    warn!(tenant, job_id, "failed to record job completion: {e}");
                }
                JobOutcome {
                    job_id: job_id.to_string(),
                    job_type,
                    status: JobStatus::Completed,
                    items_processed: processed,
                    items_affected: affected,
                    error_message: None,
                }
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(err) = self.store.fail_job(tenant, job_id, &message, now) {
                    warn!(tenant, job_id, "failed to record job failure: {err}");
                }
                JobOutcome {
                    job_id: job_id.to_string(),
                    job_type,
                    status: JobStatus::Failed,
                    items_processed: processed,
                    items_affected: affected,
                    error_message: Some(message),
                }
            }
        }
    }

    // ========================================================================
    // HANDOFF COMPRESSION
    // ========================================================================

    /// Compression steps 1-2, plus step 3 (integration) on monthly ticks
    pub fn run_handoff_compression(
        &self,
        tenant: &str,
        now: DateTime<Utc>,
        include_integration: bool,
    ) -> JobOutcome {
        let job_type = JobType::HandoffCompression;
        let job = match self.lease(tenant, job_type, now) {
            Ok(JobAcquisition::Acquired(job)) => job,
            Ok(JobAcquisition::AlreadyRunning(id)) => {
                return Self::outcome_running(id, job_type);
            }
            Err(e) => {
                return JobOutcome {
                    job_id: String::new(),
                    job_type,
                    status: JobStatus::Failed,
                    items_processed: 0,
                    items_affected: 0,
                    error_message: Some(e.to_string()),
                };
            }
        };

        let mut processed = 0;
        let mut affected = 0;

        let result = (|| -> Result<()> {
            affected += self.compress_to_summary(tenant, now, &mut processed)?;
            affected += self.compress_to_quick_ref(tenant, now, &mut processed)?;
            if include_integration {
                affected += self.integrate_old_handoffs(tenant, now, &mut processed)?;
            }
            Ok(())
        })();

        self.finish(tenant, &job.id, job_type, processed, affected, now, result)
    }

    /// Step 1: full → summary after `summary_threshold_days`
    fn compress_to_summary(
        &self,
        tenant: &str,
        now: DateTime<Utc>,
        processed: &mut i64,
    ) -> Result<i64> {
        let cutoff = now - Duration::days(self.config.summary_threshold_days);
        let eligible =
            self.store
                .handoffs_for_compression(tenant, CompressionLevel::Full, cutoff)?;
        let mut affected = 0;
        let mut tokens_saved = 0;
        let mut tokens_before = 0;

        for handoff in &eligible {
            *processed += 1;
            let summary = self.summarize(handoff);
            let before = estimate_tokens(&handoff.embedding_text());
            let applied = self.store.apply_compression(
                tenant,
                &handoff.id,
                CompressionLevel::Full,
                CompressionLevel::Summary,
                Some(&summary),
                None,
                None,
                now,
            )?;
            if applied {
                affected += 1;
                tokens_before += before;
                tokens_saved += (before - estimate_tokens(&summary)).max(0);
            }
        }

        if affected > 0 {
            self.record_stats(tenant, now, "summary", affected, tokens_before, tokens_saved)?;
        }
        Ok(affected)
    }

    /// Step 2: summary → quick_ref after `quick_ref_threshold_days`
    fn compress_to_quick_ref(
        &self,
        tenant: &str,
        now: DateTime<Utc>,
        processed: &mut i64,
    ) -> Result<i64> {
        let cutoff = now - Duration::days(self.config.quick_ref_threshold_days);
        let eligible =
            self.store
                .handoffs_for_compression(tenant, CompressionLevel::Summary, cutoff)?;
        let mut affected = 0;
        let mut tokens_saved = 0;
        let mut tokens_before = 0;

        for handoff in &eligible {
            *processed += 1;
            let quick_ref = self.quick_ref_line(handoff);
            let before = estimate_tokens(
                handoff
                    .summary
                    .as_deref()
                    .unwrap_or(&handoff.experienced),
            );
            let applied = self.store.apply_compression(
                tenant,
                &handoff.id,
                CompressionLevel::Summary,
                CompressionLevel::QuickRef,
                None,
                Some(&quick_ref),
                None,
                now,
            )?;
            if applied {
                affected += 1;
                tokens_before += before;
                tokens_saved += (before - estimate_tokens(&quick_ref)).max(0);
            }
        }

        if affected > 0 {
            self.record_stats(
                tenant,
                now,
                "quick_ref",
                affected,
                tokens_before,
                tokens_saved,
            )?;
        }
        Ok(affected)
    }

    /// Step 3: quick_ref → integrated after `integration_threshold_days`.
    ///
    /// Eligible handoffs are grouped by counterpart; each group folds into
    /// one global-scope principle decision.
    fn integrate_old_handoffs(
        &self,
        tenant: &str,
        now: DateTime<Utc>,
        processed: &mut i64,
    ) -> Result<i64> {
        let cutoff = now - Duration::days(self.config.integration_threshold_days);
        let eligible =
            self.store
                .handoffs_for_compression(tenant, CompressionLevel::QuickRef, cutoff)?;
        if eligible.is_empty() {
            return Ok(0);
        }

        let mut by_whom: BTreeMap<String, Vec<&Handoff>> = BTreeMap::new();
        for handoff in &eligible {
            by_whom
                .entry(handoff.with_whom.clone())
                .or_default()
                .push(handoff);
        }

        let mut affected = 0;
        let mut tokens_saved = 0;
        let mut tokens_before = 0;
        for (_, group) in by_whom {
            let statements: Vec<String> = group
                .iter()
                .map(|h| {
                    h.becoming
                        .clone()
                        .unwrap_or_else(|| h.remember.clone())
                })
                .collect();
            let principle = self.principle_text(&statements);
            let decision = Decision {
                id: ids::new_id(ids::DECISION),
                tenant_id: tenant.to_string(),
                scope: DecisionScope::Global,
                text: principle,
                status: DecisionStatus::Active,
                supersedes: None,
                created_at: now,
            };
            self.store.insert_decision(&decision)?;
            self.store
                .append_event(tenant, "principle.created", &decision.id)?;

            for handoff in group {
                *processed += 1;
                let before =
                    estimate_tokens(handoff.quick_ref.as_deref().unwrap_or(&handoff.remember));
                let applied = self.store.apply_compression(
                    tenant,
                    &handoff.id,
                    CompressionLevel::QuickRef,
                    CompressionLevel::Integrated,
                    None,
                    None,
                    Some(&decision.id),
                    now,
                )?;
                if applied {
                    affected += 1;
                    tokens_before += before;
                    tokens_saved += before;
                }
            }
        }

        if affected > 0 {
            self.record_stats(
                tenant,
                now,
                "integrated",
                affected,
                tokens_before,
                tokens_saved,
            )?;
        }
        Ok(affected)
    }

    // ========================================================================
    // IDENTITY CONSOLIDATION
    // ========================================================================

    /// Cluster `becoming` statements per counterpart; clusters reaching the
    /// minimum count become global principles and back-link their members.
    pub fn run_identity_consolidation(&self, tenant: &str, now: DateTime<Utc>) -> JobOutcome {
        let job_type = JobType::IdentityConsolidation;
        let job = match self.lease(tenant, job_type, now) {
            Ok(JobAcquisition::Acquired(job)) => job,
            Ok(JobAcquisition::AlreadyRunning(id)) => {
                return Self::outcome_running(id, job_type);
            }
            Err(e) => {
                return JobOutcome {
                    job_id: String::new(),
                    job_type,
                    status: JobStatus::Failed,
                    items_processed: 0,
                    items_affected: 0,
                    error_message: Some(e.to_string()),
                };
            }
        };

        let mut processed = 0;
        let mut affected = 0;

        let result = (|| -> Result<()> {
            let handoffs = self.store.becoming_statements(tenant)?;
            let mut by_whom: BTreeMap<String, Vec<&Handoff>> = BTreeMap::new();
            for handoff in &handoffs {
                by_whom
                    .entry(handoff.with_whom.clone())
                    .or_default()
                    .push(handoff);
            }

            for (_, group) in by_whom {
                let members: Vec<ClusterMember> = group
                    .iter()
                    .map(|h| {
                        let becoming = h.becoming.clone().unwrap_or_default();
                        let embedding = self.embedder.embed(&becoming).ok().map(|e| e.vector);
                        ClusterMember::new(h.id.clone(), becoming, embedding)
                    })
                    .collect();
                processed += members.len() as i64;

                let clusters = cluster(
                    &members,
                    self.config.similarity_threshold,
                    self.config.keyword_overlap_threshold,
                    self.config.jaccard_fallback_threshold,
                );

                for indices in clusters {
                    if indices.len() < self.config.identity_min_count {
                        continue;
                    }
                    let statements: Vec<String> = indices
                        .iter()
                        .map(|&i| members[i].becoming.clone())
                        .collect();
                    let decision = Decision {
                        id: ids::new_id(ids::DECISION),
                        tenant_id: tenant.to_string(),
                        scope: DecisionScope::Global,
                        text: self.principle_text(&statements),
                        status: DecisionStatus::Active,
                        supersedes: None,
                        created_at: now,
                    };
                    self.store.insert_decision(&decision)?;
                    self.store
                        .append_event(tenant, "principle.created", &decision.id)?;
                    for &i in &indices {
                        self.store.set_integrated_into(
                            tenant,
                            &members[i].handoff_id,
                            &decision.id,
                        )?;
                        affected += 1;
                    }
                }
            }
            Ok(())
        })();

        self.finish(tenant, &job.id, job_type, processed, affected, now, result)
    }

    // ========================================================================
    // DECISION ARCHIVAL
    // ========================================================================

    /// Active decisions past the archive threshold move to `archived`;
    /// superseded decisions stay superseded.
    pub fn run_decision_archival(&self, tenant: &str, now: DateTime<Utc>) -> JobOutcome {
        let job_type = JobType::DecisionArchival;
        let job = match self.lease(tenant, job_type, now) {
            Ok(JobAcquisition::Acquired(job)) => job,
            Ok(JobAcquisition::AlreadyRunning(id)) => {
                return Self::outcome_running(id, job_type);
            }
            Err(e) => {
                return JobOutcome {
                    job_id: String::new(),
                    job_type,
                    status: JobStatus::Failed,
                    items_processed: 0,
                    items_affected: 0,
                    error_message: Some(e.to_string()),
                };
            }
        };

        let cutoff = now - Duration::days(self.config.decision_archive_threshold_days);
        let mut archived = 0;
        let result = (|| -> Result<()> {
            archived = self.store.archive_decisions(tenant, cutoff)?;
            Ok(())
        })();

        self.finish(tenant, &job.id, job_type, archived, archived, now, result)
    }

    // ========================================================================
    // MAINTENANCE (chunk reorganization)
    // ========================================================================

    /// Backfill embeddings the bounded queue dropped and purge expired
    /// idempotency records.
    pub fn run_maintenance(&self, tenant: &str, now: DateTime<Utc>) -> JobOutcome {
        let job_type = JobType::ChunkReorganization;
        let job = match self.lease(tenant, job_type, now) {
            Ok(JobAcquisition::Acquired(job)) => job,
            Ok(JobAcquisition::AlreadyRunning(id)) => {
                return Self::outcome_running(id, job_type);
            }
            Err(e) => {
                return JobOutcome {
                    job_id: String::new(),
                    job_type,
                    status: JobStatus::Failed,
                    items_processed: 0,
                    items_affected: 0,
                    error_message: Some(e.to_string()),
                };
            }
        };

        let mut processed = 0;
        let mut affected = 0;

        let result = (|| -> Result<()> {
            for kind in MemoryKind::ALL {
                let pending = self.store.missing_embeddings(
                    kind,
                    tenant,
                    self.config.embed_backfill_batch,
                )?;
                for (entity_id, text) in pending {
                    processed += 1;
                    match self.embedder.embed(&text) {
                        Ok(embedding) => {
                            self.store.put_embedding(kind, tenant, &entity_id, &embedding)?;
                            affected += 1;
                        }
                        Err(e) => {
                            warn!(tenant, entity = %entity_id, "backfill embed failed: {e}");
                        }
                    }
                }
            }
            self.store.purge_idempotency(self.config.idempotency_ttl, now)?;
            Ok(())
        })();

        self.finish(tenant, &job.id, job_type, processed, affected, now, result)
    }

    // ========================================================================
    // DERIVATION HELPERS
    // ========================================================================

    /// Summary via LLM, degrading to labeled-bullet truncation
    fn summarize(&self, handoff: &Handoff) -> String {
        if let Some(llm) = &self.llm {
            match llm.summarize(&handoff.embedding_text(), self.config.summary_target_tokens) {
                Ok(summary) if !summary.trim().is_empty() => return summary,
                Ok(_) => {}
                Err(e) => warn!(handoff = %handoff.id, "llm summary failed, using fallback: {e}"),
            }
        }
        bullet_summary(
            &[
                ("experienced", &handoff.experienced),
                ("noticed", &handoff.noticed),
                ("learned", &handoff.learned),
            ],
            self.config.summary_target_tokens,
        )
    }

    /// Single line: date, counterpart, becoming if any, one-sentence summary
    fn quick_ref_line(&self, handoff: &Handoff) -> String {
        let date = handoff.created_at.format("%Y-%m-%d");
        let becoming = handoff
            .becoming
            .as_deref()
            .map(|b| format!(" - {b}"))
            .unwrap_or_default();
        let gist = first_sentence(
            handoff.summary.as_deref().unwrap_or(&handoff.experienced),
            self.config.quick_ref_target_tokens / 2,
        );
        truncate_to_tokens(
            &format!("{date} - {}{becoming} - {gist}", handoff.with_whom),
            self.config.quick_ref_target_tokens,
        )
    }

    /// Principle via LLM, degrading to the keyword digest
    fn principle_text(&self, statements: &[String]) -> String {
        if let Some(llm) = &self.llm {
            match llm.extract_principle(statements) {
                Ok(text) if !text.trim().is_empty() => return text,
                Ok(_) => {}
                Err(e) => warn!("llm principle extraction failed, using fallback: {e}"),
            }
        }
        principle_from_statements(statements)
    }

    fn record_stats(
        &self,
        tenant: &str,
        now: DateTime<Utc>,
        compression_type: &str,
        affected: i64,
        tokens_before: i64,
        tokens_saved: i64,
    ) -> Result<()> {
        let percentage = if tokens_before > 0 {
            (tokens_saved as f64 / tokens_before as f64) * 100.0
        } else {
            0.0
        };
        self.store.record_stats(
            tenant,
            now.date_naive(),
            compression_type,
            affected,
            affected,
            tokens_saved,
            percentage,
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
