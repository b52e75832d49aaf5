//! Error taxonomy for the memory engine.
//!
//! Every fallible operation in the engine returns [`MemoryError`]. The MCP
//! layer maps these onto JSON-RPC error codes; the consolidation engine
//! decides retriability from the variant.

use std::sync::PoisonError;

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Missing or invalid bearer token
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// Payload carried a tenant_id different from the authenticated tenant
    #[error("tenant mismatch: payload tenant '{payload}' differs from authenticated tenant '{authenticated}'")]
    TenantMismatch {
        /// Tenant id found in the payload
        payload: String,
        /// Tenant id resolved from the bearer token
        authenticated: String,
    },
    /// Missing required field, out-of-range value, bad enum
    #[error("validation error: {0}")]
    Validation(String),
    /// Referenced entity absent in the tenant
    #[error("not found: {0}")]
    NotFound(String),
    /// Unique violation or state transition not permitted
    #[error("conflict: {0}")]
    Conflict(String),
    /// A depends_on edge would create a cycle
    #[error("circular dependency: {0}")]
    CircularDependency(String),
    /// Delete blocked by inbound edges
    #[error("referential integrity: {0}")]
    ReferentialIntegrity(String),
    /// Write attempted on a capsule past its expiry
    #[error("capsule expired: {0}")]
    ExpiredCapsule(String),
    /// Downstream retriable failure (store, embedding, LLM)
    #[error("temporarily unavailable: {0}")]
    TemporaryUnavailable(String),
    /// Request exceeded its deadline
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// Anything else; logged with context
    #[error("internal error: {0}")]
    Permanent(String),
}

/// Engine result type
pub type Result<T> = std::result::Result<T, MemoryError>;

impl MemoryError {
    /// Whether the operation may succeed on retry
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            MemoryError::TemporaryUnavailable(_) | MemoryError::DeadlineExceeded
        )
    }

    /// Stable machine-readable kind, surfaced in error payloads
    pub fn kind(&self) -> &'static str {
        match self {
            MemoryError::Unauthenticated(_) => "unauthenticated",
            MemoryError::TenantMismatch { .. } => "tenant_mismatch",
            MemoryError::Validation(_) => "validation_error",
            MemoryError::NotFound(_) => "not_found",
            MemoryError::Conflict(_) => "conflict",
            MemoryError::CircularDependency(_) => "circular_dependency",
            MemoryError::ReferentialIntegrity(_) => "referential_integrity",
            MemoryError::ExpiredCapsule(_) => "expired_capsule",
            MemoryError::TemporaryUnavailable(_) => "temporary_unavailable",
            MemoryError::DeadlineExceeded => "deadline_exceeded",
            MemoryError::Permanent(_) => "permanent_error",
        }
    }
}

impl From<rusqlite::Error> for MemoryError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _) => match e.code {
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    MemoryError::TemporaryUnavailable(err.to_string())
                }
                rusqlite::ErrorCode::ConstraintViolation => {
                    MemoryError::Conflict(err.to_string())
                }
                _ => MemoryError::Permanent(err.to_string()),
            },
            rusqlite::Error::QueryReturnedNoRows => {
                MemoryError::NotFound("query returned no rows".to_string())
            }
            _ => MemoryError::Permanent(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        MemoryError::Validation(err.to_string())
    }
}

impl<T> From<PoisonError<T>> for MemoryError {
    fn from(_: PoisonError<T>) -> Self {
        MemoryError::Permanent("lock poisoned".to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================
