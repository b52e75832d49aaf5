//! Entity types of the memory store.
//!
//! Everything here is tenant-scoped and serialized snake_case, matching the
//! wire format of the tool surface.

mod capsule;
mod graph;
mod handoff;
mod jobs;
mod records;

pub use capsule::{Capsule, CapsuleInput, CapsuleItems, CapsuleScope, CapsuleStatus};
pub use graph::{
    Direction, Edge, EdgeType, NodeKind, ResolvedNode, TaskBoard, TaskCard, TraversalHit,
};
pub use handoff::{
    CompressionLevel, Handoff, HandoffInput, HandoffView, IdentityThreadEntry,
};
pub use jobs::{
    estimate_tokens, ConsolidationJob, ConsolidationStats, JobStatus, JobType, MemoryEvent,
};
pub use records::{
    AgentFeedback, Decision, DecisionScope, DecisionStatus, FeedbackKind, FeedbackStatus,
    KnowledgeNote, NoteInput,
};

use serde::{Deserialize, Serialize};

/// The searchable memory families covered by `recall`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// Session handoffs
    SessionHandoffs,
    /// Knowledge notes
    KnowledgeNotes,
    /// Agent feedback
    AgentFeedback,
    /// Capsules
    Capsules,
}

impl MemoryKind {
    /// All searchable kinds, in registration order
    pub const ALL: [MemoryKind; 4] = [
        MemoryKind::SessionHandoffs,
        MemoryKind::KnowledgeNotes,
        MemoryKind::AgentFeedback,
        MemoryKind::Capsules,
    ];

    /// Table-name string used on the wire and in the embeddings index
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::SessionHandoffs => "session_handoffs",
            MemoryKind::KnowledgeNotes => "knowledge_notes",
            MemoryKind::AgentFeedback => "agent_feedback",
            MemoryKind::Capsules => "capsules",
        }
    }

    /// Parse a wire name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "session_handoffs" => Some(MemoryKind::SessionHandoffs),
            "knowledge_notes" => Some(MemoryKind::KnowledgeNotes),
            "agent_feedback" => Some(MemoryKind::AgentFeedback),
            "capsules" => Some(MemoryKind::Capsules),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// TESTS
// ============================================================================
