//! Consolidation jobs, compression statistics, and the event log.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token estimate used for "tokens saved" accounting.
///
/// `ceil(chars / 4)` - a documented estimate, not a real tokenization.
pub fn estimate_tokens(text: &str) -> i64 {
    let chars = text.chars().count() as i64;
    (chars + 3) / 4
}

// ============================================================================
// CONSOLIDATION JOBS
// ============================================================================

/// The kinds of background work the consolidator runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    IdentityConsolidation,
    HandoffCompression,
    DecisionArchival,
    ChunkReorganization,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::IdentityConsolidation => "identity_consolidation",
            JobType::HandoffCompression => "handoff_compression",
            JobType::DecisionArchival => "decision_archival",
            JobType::ChunkReorganization => "chunk_reorganization",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "identity_consolidation" => Some(JobType::IdentityConsolidation),
            "handoff_compression" => Some(JobType::HandoffCompression),
            "decision_archival" => Some(JobType::DecisionArchival),
            "chunk_reorganization" => Some(JobType::ChunkReorganization),
            _ => None,
        }
    }
}

/// Job state machine: pending → running → completed | failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// One consolidation run for a `(tenant, job_type)` pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationJob {
    /// `cj_`-prefixed id
    pub id: String,
    pub tenant_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub items_processed: i64,
    pub items_affected: i64,
    pub error_message: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// COMPRESSION STATS
// ============================================================================

/// Rolling counters per `(tenant, stat_date, compression_type)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationStats {
    pub tenant_id: String,
    pub stat_date: NaiveDate,
    pub compression_type: String,
    pub before_count: i64,
    pub after_count: i64,
    pub tokens_saved: i64,
    pub percentage_saved: f64,
}

// ============================================================================
// EVENTS
// ============================================================================

/// Append-only observability record emitted by every mutating verb
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEvent {
    /// `evt_`-prefixed id
    pub id: String,
    pub tenant_id: String,
    /// Dotted event name, e.g. `handoff.created`
    pub kind: String,
    pub subject_id: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// TESTS
// ============================================================================
