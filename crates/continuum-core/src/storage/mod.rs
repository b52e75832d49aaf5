//! Durable storage layer.
//!
//! SQLite with WAL journaling, FTS5 full-text indexes per searchable entity,
//! and embedding BLOBs compared by brute-force cosine. Every query is
//! tenant-scoped at this layer; the tenant id always comes from the request
//! context, never from a payload.

pub mod migrations;

mod edges;
mod jobs;
mod records;
mod search;
mod sqlite;

pub use search::RecallMeta;
pub use sqlite::{HandoffFilter, JobAcquisition, Store, StoreCounts};
