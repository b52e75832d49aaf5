//! Sleep-inspired consolidation.
//!
//! Scheduled compression of handoffs (full → summary → quick_ref →
//! integrated), identity-thread consolidation into principles, decision
//! archival, and embedding backfill. Token growth stays bounded; nothing is
//! ever hard-deleted.

mod engine;
mod identity;

pub use engine::{
    ConsolidationConfig, ConsolidationEngine, JobOutcome, TickKind, TickReport,
};
