//! Request context threaded through every engine call.
//!
//! The tenant is resolved once, at the authentication boundary, and carried
//! explicitly from there. Nothing in the engine reads a tenant from ambient
//! state or from a payload.

use chrono::{DateTime, Utc};

use crate::error::{MemoryError, Result};

/// Authenticated per-request context
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Isolation boundary; every row touched by this request carries it
    pub tenant_id: String,
    /// Acting agent identity within the tenant
    pub principal_id: String,
    /// Granted scopes, opaque to the engine
    pub scopes: Vec<String>,
    /// Absolute deadline; checked at suspension points
    pub deadline: Option<DateTime<Utc>>,
}

impl RequestContext {
    /// Context for an authenticated principal with no deadline
    pub fn new(tenant_id: impl Into<String>, principal_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            principal_id: principal_id.into(),
            scopes: Vec::new(),
            deadline: None,
        }
    }

    /// Attach an absolute deadline
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Fail with `DeadlineExceeded` once the deadline has passed
    pub fn check_deadline(&self) -> Result<()> {
        match self.deadline {
            Some(deadline) if Utc::now() >= deadline => Err(MemoryError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Reject a payload tenant_id that differs from the authenticated tenant
    pub fn guard_payload_tenant(&self, payload_tenant: Option<&str>) -> Result<()> {
        match payload_tenant {
            Some(t) if t != self.tenant_id => Err(MemoryError::TenantMismatch {
                payload: t.to_string(),
                authenticated: self.tenant_id.clone(),
            }),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
