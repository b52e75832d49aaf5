//! Opaque typed identifiers.
//!
//! Every entity id is `<prefix>_<32 hex>`; the prefix names the table the id
//! resolves to, which is what lets the graph layer address heterogeneous
//! memory entities without runtime type probing.

use uuid::Uuid;

use crate::error::{MemoryError, Result};

/// Maximum identifier length on the wire
pub const MAX_ID_LEN: usize = 64;

/// Session handoff ids (`hof_`)
pub const HANDOFF: &str = "hof";
/// Knowledge note ids (`kn_`)
pub const NOTE: &str = "kn";
/// Capsule ids (`cap_`)
pub const CAPSULE: &str = "cap";
/// Agent feedback ids (`fb_`)
pub const FEEDBACK: &str = "fb";
/// Decision ids (`dec_`)
pub const DECISION: &str = "dec";
/// Edge ids (`edge_`)
pub const EDGE: &str = "edge";
/// Event ids (`evt_`)
pub const EVENT: &str = "evt";
/// Consolidation job ids (`cj_`)
pub const JOB: &str = "cj";

/// Mint a fresh id with the given prefix
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

/// Deterministic edge id: UUIDv5 over the edge's identity plus a nonce
pub fn edge_id(tenant: &str, from: &str, to: &str, edge_type: &str, nonce: &str) -> String {
    let name = format!("{tenant}|{from}|{to}|{edge_type}|{nonce}");
    format!(
        "{}_{}",
        EDGE,
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).simple()
    )
}

/// Prefix of an id, if it is well-formed
pub fn prefix_of(id: &str) -> Option<&str> {
    id.split_once('_').map(|(p, _)| p)
}

/// Validate an externally-supplied id
pub fn validate(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(MemoryError::Validation(format!(
            "id must be 1..={MAX_ID_LEN} chars, got {}",
            id.len()
        )));
    }
    match prefix_of(id) {
        Some(p) if !p.is_empty() => Ok(()),
        _ => Err(MemoryError::Validation(format!(
            "id '{id}' missing type prefix"
        ))),
    }
}

// ============================================================================
// TESTS
// ============================================================================
