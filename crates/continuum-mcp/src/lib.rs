//! # Continuum MCP
//!
//! The tool surface of the Continuum memory engine: a JSON-RPC 2.0
//! dispatcher over HTTP POST with bearer-token authentication, tenant
//! context injection, per-call deadlines, and op_id idempotency; plus the
//! client-side write-ahead log and the background consolidation scheduler.

pub mod auth;
pub mod config;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod tools;
pub mod wal;

pub use auth::{IdentityProvider, StaticTokenProvider, TenantContext};
pub use config::ServerConfig;
pub use server::{DispatchOutcome, McpDispatcher};
pub use wal::{ReplaySummary, WalClient, WalRecord};
