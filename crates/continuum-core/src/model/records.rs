//! Decisions, knowledge notes, and agent feedback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// DECISIONS
// ============================================================================

/// Blast radius of a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionScope {
    Session,
    #[default]
    Project,
    Global,
}

impl DecisionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionScope::Session => "session",
            DecisionScope::Project => "project",
            DecisionScope::Global => "global",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "session" => Some(DecisionScope::Session),
            "project" => Some(DecisionScope::Project),
            "global" => Some(DecisionScope::Global),
            _ => None,
        }
    }
}

/// Lifecycle of a decision: active, then superseded or archived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    #[default]
    Active,
    Superseded,
    Archived,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Active => "active",
            DecisionStatus::Superseded => "superseded",
            DecisionStatus::Archived => "archived",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "active" => Some(DecisionStatus::Active),
            "superseded" => Some(DecisionStatus::Superseded),
            "archived" => Some(DecisionStatus::Archived),
            _ => None,
        }
    }
}

/// A recorded decision or consolidated principle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// `dec_`-prefixed id
    pub id: String,
    pub tenant_id: String,
    pub scope: DecisionScope,
    pub text: String,
    pub status: DecisionStatus,
    /// Required when status is `superseded`
    pub supersedes: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// KNOWLEDGE NOTES
// ============================================================================

/// A durable fact, preference, or principle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeNote {
    /// `kn_`-prefixed id, also addressable as a graph node
    pub id: String,
    pub tenant_id: String,
    pub text: String,
    pub tags: Vec<String>,
    /// Project the note is pinned to, if any
    pub project_path: Option<String>,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Handoffs this note was distilled from
    pub source_handoffs: Vec<String>,
    pub has_embedding: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for `create_knowledge_note`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoteInput {
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub project_path: Option<String>,
    #[serde(default)]
    pub source_handoffs: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

// ============================================================================
// AGENT FEEDBACK
// ============================================================================

/// What kind of feedback an agent is filing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Friction,
    Bug,
    Suggestion,
    Praise,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackKind::Friction => "friction",
            FeedbackKind::Bug => "bug",
            FeedbackKind::Suggestion => "suggestion",
            FeedbackKind::Praise => "praise",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "friction" => Some(FeedbackKind::Friction),
            "bug" => Some(FeedbackKind::Bug),
            "suggestion" => Some(FeedbackKind::Suggestion),
            "praise" => Some(FeedbackKind::Praise),
            _ => None,
        }
    }
}

/// Review state of a feedback item.
///
/// `addressed` and `rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
    #[default]
    Open,
    Reviewed,
    Addressed,
    Rejected,
}

impl FeedbackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackStatus::Open => "open",
            FeedbackStatus::Reviewed => "reviewed",
            FeedbackStatus::Addressed => "addressed",
            FeedbackStatus::Rejected => "rejected",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "open" => Some(FeedbackStatus::Open),
            "reviewed" => Some(FeedbackStatus::Reviewed),
            "addressed" => Some(FeedbackStatus::Addressed),
            "rejected" => Some(FeedbackStatus::Rejected),
            _ => None,
        }
    }

    /// Transition table for `update_agent_feedback`
    pub fn can_transition_to(&self, next: FeedbackStatus) -> bool {
        matches!(
            (self, next),
            (
                FeedbackStatus::Open,
                FeedbackStatus::Reviewed | FeedbackStatus::Addressed | FeedbackStatus::Rejected
            ) | (
                FeedbackStatus::Reviewed,
                FeedbackStatus::Addressed | FeedbackStatus::Rejected
            )
        )
    }
}

/// Feedback filed by an agent about the memory system itself
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentFeedback {
    /// `fb_`-prefixed id
    pub id: String,
    pub tenant_id: String,
    pub kind: FeedbackKind,
    pub text: String,
    pub status: FeedbackStatus,
    pub has_embedding: bool,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// TESTS
// ============================================================================
