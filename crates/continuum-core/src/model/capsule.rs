//! Capsules - curated, TTL-bounded bundles of memory items.
//!
//! A capsule addresses an audience of agents within the tenant. The
//! pseudo-principal `*` means "any agent in this tenant"; tenant isolation is
//! never crossed. Capsules are immutable after creation except for status.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Pseudo-principal admitting every agent within the tenant
pub const AUDIENCE_ANY: &str = "*";

/// Sharing scope of a capsule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapsuleScope {
    Session,
    #[default]
    User,
    Project,
    Policy,
    Global,
}

impl CapsuleScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapsuleScope::Session => "session",
            CapsuleScope::User => "user",
            CapsuleScope::Project => "project",
            CapsuleScope::Policy => "policy",
            CapsuleScope::Global => "global",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "session" => Some(CapsuleScope::Session),
            "user" => Some(CapsuleScope::User),
            "project" => Some(CapsuleScope::Project),
            "policy" => Some(CapsuleScope::Policy),
            "global" => Some(CapsuleScope::Global),
            _ => None,
        }
    }
}

/// Capsule lifecycle. `expired` is derived from the clock on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapsuleStatus {
    #[default]
    Active,
    Revoked,
    Expired,
}

impl CapsuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapsuleStatus::Active => "active",
            CapsuleStatus::Revoked => "revoked",
            CapsuleStatus::Expired => "expired",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "active" => Some(CapsuleStatus::Active),
            "revoked" => Some(CapsuleStatus::Revoked),
            "expired" => Some(CapsuleStatus::Expired),
            _ => None,
        }
    }
}

/// The memory items bundled into a capsule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CapsuleItems {
    /// Free-form context chunks
    #[serde(default)]
    pub chunks: Vec<String>,
    /// Decision ids included by reference
    #[serde(default)]
    pub decisions: Vec<String>,
    /// Artifact references (paths, URLs)
    #[serde(default)]
    pub artifacts: Vec<String>,
}

/// A curated bundle with an expiry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capsule {
    /// `cap_`-prefixed id
    pub id: String,
    pub tenant_id: String,
    pub scope: CapsuleScope,
    pub subject_type: String,
    pub subject_id: String,
    pub author_agent_id: String,
    /// Audience principals; may contain [`AUDIENCE_ANY`]
    pub audience_agent_ids: Vec<String>,
    pub ttl_days: i64,
    /// Stored status; use [`Capsule::effective_status`] on read
    pub status: CapsuleStatus,
    pub items: CapsuleItems,
    pub risks: Vec<String>,
    pub has_embedding: bool,
    pub created_at: DateTime<Utc>,
    /// Always `created_at + ttl_days`
    pub expires_at: DateTime<Utc>,
}

impl Capsule {
    /// Expiry instant for a creation time and TTL
    pub fn expiry(created_at: DateTime<Utc>, ttl_days: i64) -> DateTime<Utc> {
        created_at + Duration::days(ttl_days)
    }

    /// Status as observed at `now`: a stored `active` past its expiry reads
    /// as `expired`; revocation wins over expiry.
    pub fn effective_status(&self, now: DateTime<Utc>) -> CapsuleStatus {
        match self.status {
            CapsuleStatus::Revoked => CapsuleStatus::Revoked,
            _ if now >= self.expires_at => CapsuleStatus::Expired,
            s => s,
        }
    }

    /// Whether `now` is past the capsule's expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the principal may read this capsule
    pub fn is_visible_to(&self, principal_id: &str) -> bool {
        self.author_agent_id == principal_id
            || self
                .audience_agent_ids
                .iter()
                .any(|a| a == principal_id || a == AUDIENCE_ANY)
    }

    /// Text fed to the embedder
    pub fn embedding_text(&self) -> String {
        let mut parts: Vec<&str> = vec![&self.subject_type, &self.subject_id];
        parts.extend(self.items.chunks.iter().map(String::as_str));
        parts.extend(self.risks.iter().map(String::as_str));
        parts.join("\n")
    }
}

/// Input for `create_capsule`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CapsuleInput {
    #[serde(default)]
    pub scope: CapsuleScope,
    pub subject_type: String,
    pub subject_id: String,
    #[serde(default)]
    pub audience_agent_ids: Vec<String>,
    /// Defaults to 7 days
    #[serde(default)]
    pub ttl_days: Option<i64>,
    #[serde(default)]
    pub items: CapsuleItems,
    #[serde(default)]
    pub risks: Vec<String>,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ttl_days: i64) -> Capsule {
        let created = Utc::now();
        Capsule {
            id: "cap_1".into(),
            tenant_id: "t1".into(),
            scope: CapsuleScope::Project,
            subject_type: "repo".into(),
            subject_id: "continuum".into(),
            author_agent_id: "author".into(),
            audience_agent_ids: vec!["reader".into()],
            ttl_days,
            status: CapsuleStatus::Active,
            items: CapsuleItems::default(),
            risks: vec![],
            has_embedding: false,
            created_at: created,
            expires_at: Capsule::expiry(created, ttl_days),
        }
    }

    #[test]
    fn test_zero_ttl_is_expired_on_first_read() {
        let capsule = sample(0);
        assert_eq!(
            capsule.effective_status(Utc::now()),
            CapsuleStatus::Expired
        );
    }

    #[test]
    fn test_live_capsule_reads_active() {
        let capsule = sample(7);
        assert_eq!(capsule.effective_status(Utc::now()), CapsuleStatus::Active);
        assert!(!capsule.is_expired(Utc::now()));
    }

    #[test]
    fn test_revocation_wins_over_expiry() {
        let mut capsule = sample(0);
        capsule.status = CapsuleStatus::Revoked;
        assert_eq!(
            capsule.effective_status(Utc::now()),
            CapsuleStatus::Revoked
        );
    }

    #[test]
    fn test_visibility() {
        let capsule = sample(7);
        assert!(capsule.is_visible_to("author"));
        assert!(capsule.is_visible_to("reader"));
        assert!(!capsule.is_visible_to("stranger"));

        let mut open = sample(7);
        open.audience_agent_ids = vec![AUDIENCE_ANY.into()];
        assert!(open.is_visible_to("stranger"));
    }

    #[test]
    fn test_expiry_arithmetic() {
        let created = Utc::now();
        assert_eq!(Capsule::expiry(created, 7), created + Duration::days(7));
        assert_eq!(Capsule::expiry(created, 0), created);
    }
}
