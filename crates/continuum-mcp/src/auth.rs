//! Identity verification.
//!
//! The dispatcher consumes an opaque `verify(token) → tenant context`
//! capability. Token issuance, OAuth, and session management live outside
//! this process; the built-in provider is a static token table plus the
//! dev-token shortcut for non-production environments.

use std::collections::HashMap;

use continuum_core::{MemoryError, Result};

/// The authenticated caller
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: String,
    pub principal_id: String,
    pub scopes: Vec<String>,
}

impl TenantContext {
    pub fn new(tenant_id: impl Into<String>, principal_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            principal_id: principal_id.into(),
            scopes: vec!["*".to_string()],
        }
    }
}

/// Capability trait: verify a bearer token
pub trait IdentityProvider: Send + Sync {
    fn verify(&self, token: &str) -> Result<TenantContext>;
}

/// Static token table.
///
/// Production deployments swap in a real provider; tests and dev mode seed
/// tokens directly.
#[derive(Default)]
pub struct StaticTokenProvider {
    tokens: HashMap<String, TenantContext>,
}

impl StaticTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for a tenant/principal pair
    pub fn with_token(
        mut self,
        token: impl Into<String>,
        context: TenantContext,
    ) -> Self {
        self.tokens.insert(token.into(), context);
        self
    }

    /// Register the dev token: authenticates to tenant `default`.
    ///
    /// Callers must gate this on a non-production environment.
    pub fn with_dev_token(self, token: impl Into<String>) -> Self {
        self.with_token(token, TenantContext::new("default", "dev"))
    }
}

impl IdentityProvider for StaticTokenProvider {
    fn verify(&self, token: &str) -> Result<TenantContext> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| MemoryError::Unauthenticated("invalid bearer token".into()))
    }
}

// ============================================================================
// TESTS
// ============================================================================
