//! # Continuum Core
//!
//! Persistent memory engine for AI agents. Preserves identity and continuity
//! across sessions:
//!
//! - **Session handoffs**: structured summaries with an identity trajectory,
//!   aged through monotone compression levels instead of deletion
//! - **Sleep-inspired consolidation**: scheduled summary/quick-ref/principle
//!   compression, identity-thread clustering, decision archival
//! - **Hybrid recall**: FTS5 keyword + cosine vector fusion with a recency
//!   boost and deterministic ranking
//! - **Typed memory graph**: property edges over every memory entity, with
//!   `depends_on` acyclicity enforced on insert
//! - **Tenant isolation**: every row is tenant-scoped; the tenant comes from
//!   the request context, never from a payload
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use continuum_core::{Engine, EngineConfig, HandoffInput, RequestContext};
//! use continuum_core::embeddings::HashingEmbedder;
//! use continuum_core::storage::Store;
//! use std::sync::Arc;
//!
//! let store = Arc::new(Store::open(None, 256)?);
//! let engine = Engine::new(store, Arc::new(HashingEmbedder::default()), None, EngineConfig::default());
//!
//! let ctx = RequestContext::new("default", "Callin");
//! let handoff = engine.ops.create_handoff(&ctx, HandoffInput { /* ... */ })?;
//! ```

// ============================================================================
// MODULES
// ============================================================================

pub mod consolidation;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod graph;
pub mod ids;
pub mod llm;
pub mod model;
pub mod ops;
pub mod recall;
pub mod storage;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use consolidation::{
    ConsolidationConfig, ConsolidationEngine, JobOutcome, TickKind, TickReport,
};
pub use context::RequestContext;
pub use embeddings::{
    cosine_similarity, spawn_embed_worker, Embedder, Embedding, EmbeddingError, EmbeddingQueue,
    HashingEmbedder, DEFAULT_DIMENSION,
};
pub use error::{MemoryError, Result};
pub use graph::{GraphService, MAX_DEPTH};
pub use llm::{DeterministicSummarizer, LanguageModel, LlmError};
pub use model::{
    estimate_tokens, AgentFeedback, Capsule, CapsuleInput, CapsuleItems, CapsuleScope,
    CapsuleStatus, CompressionLevel, ConsolidationJob, ConsolidationStats, Decision,
    DecisionScope, DecisionStatus, Direction, Edge, EdgeType, FeedbackKind, FeedbackStatus,
    Handoff, HandoffInput, HandoffView, IdentityThreadEntry, JobStatus, JobType, KnowledgeNote,
    MemoryEvent, MemoryKind, NodeKind, NoteInput, ResolvedNode, TaskBoard, TaskCard,
    TraversalHit,
};
pub use ops::{MemoryOps, WakeBundle, WakeInput};
pub use recall::{Recall, RecallHit, RecallInput, TimeRange};
pub use storage::{HandoffFilter, JobAcquisition, Store, StoreCounts};

use std::sync::Arc;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// ENGINE FACADE
// ============================================================================

/// Engine-wide configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Consolidation thresholds and knobs
    pub consolidation: ConsolidationConfig,
}

/// The assembled memory engine: one store, every service over it.
///
/// Construct once, share behind an `Arc`.
pub struct Engine {
    pub store: Arc<Store>,
    pub ops: MemoryOps,
    pub recall: Recall,
    pub graph: GraphService,
    pub consolidation: ConsolidationEngine,
}

impl Engine {
    pub fn new(
        store: Arc<Store>,
        embedder: Arc<dyn Embedder>,
        llm: Option<Arc<dyn LanguageModel>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            ops: MemoryOps::new(store.clone()),
            recall: Recall::new(store.clone(), embedder.clone()),
            graph: GraphService::new(store.clone()),
            consolidation: ConsolidationEngine::new(
                store.clone(),
                embedder,
                llm,
                config.consolidation,
            ),
            store,
        }
    }
}

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        CompressionLevel, Engine, EngineConfig, HandoffInput, MemoryError, MemoryKind,
        MemoryOps, Recall, RecallInput, RequestContext, Result, Store, TickKind, WakeInput,
    };
}
