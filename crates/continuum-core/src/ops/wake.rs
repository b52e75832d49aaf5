//! Wake-up: the composed session-start read.
//!
//! One call assembles everything a returning agent needs: recent handoffs at
//! their current compression levels, the identity thread, active
//! project/global decisions, and live capsules addressed to the principal.
//! Read-only by design.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::MemoryOps;
use crate::context::RequestContext;
use crate::error::{MemoryError, Result};
use crate::model::{Capsule, Decision, HandoffView, IdentityThreadEntry};
use crate::storage::HandoffFilter;

/// Bounds on `recent_count`
const MIN_RECENT: usize = 1;
const MAX_RECENT: usize = 20;
const DEFAULT_RECENT: usize = 3;

/// Thread length included in the bundle
const THREAD_LIMIT: usize = 10;
/// Decision count included in the bundle
const DECISION_LIMIT: usize = 20;

/// Input for `wake_up`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WakeInput {
    pub with_whom: String,
    /// Bundle sections to include; empty means all of
    /// `handoffs`, `identity`, `decisions`, `capsules`
    #[serde(default)]
    pub layers: Vec<String>,
    #[serde(default = "default_recent")]
    pub recent_count: usize,
}

fn default_recent() -> usize {
    DEFAULT_RECENT
}

/// The structured context bundle returned by `wake_up`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeBundle {
    pub with_whom: String,
    pub handoffs: Vec<HandoffView>,
    pub identity_thread: Vec<IdentityThreadEntry>,
    pub active_decisions: Vec<Decision>,
    pub capsules: Vec<Capsule>,
}

const KNOWN_LAYERS: &[&str] = &["handoffs", "identity", "decisions", "capsules"];

impl MemoryOps {
    /// Compose the wake-up bundle. Never modifies state.
    pub fn wake_up(&self, ctx: &RequestContext, input: WakeInput) -> Result<WakeBundle> {
        if input.with_whom.trim().is_empty() {
            return Err(MemoryError::Validation("'with_whom' is required".into()));
        }
        if !(MIN_RECENT..=MAX_RECENT).contains(&input.recent_count) {
            return Err(MemoryError::Validation(format!(
                "recent_count must be in {MIN_RECENT}..={MAX_RECENT}, got {}",
                input.recent_count
            )));
        }
        for layer in &input.layers {
            if !KNOWN_LAYERS.contains(&layer.as_str()) {
                return Err(MemoryError::Validation(format!(
                    "unknown layer '{layer}'"
                )));
            }
        }
        let wants = |layer: &str| input.layers.is_empty() || input.layers.iter().any(|l| l == layer);
        let store = self.store();
        let now = Utc::now();

        let handoffs = if wants("handoffs") {
            store
                .list_handoffs(
                    &ctx.tenant_id,
                    &HandoffFilter {
                        with_whom: Some(input.with_whom.clone()),
                        session_id: None,
                    },
                    input.recent_count,
                    None,
                )?
                .into_iter()
                .map(|h| HandoffView::project(h, false))
                .collect()
        } else {
            Vec::new()
        };

        let identity_thread = if wants("identity") {
            store.identity_thread(&ctx.tenant_id, Some(&input.with_whom), THREAD_LIMIT)?
        } else {
            Vec::new()
        };

        let active_decisions = if wants("decisions") {
            store.active_context_decisions(&ctx.tenant_id, DECISION_LIMIT)?
        } else {
            Vec::new()
        };

        let capsules = if wants("capsules") {
            store
                .live_capsules(&ctx.tenant_id, now)?
                .into_iter()
                .filter(|c| c.is_visible_to(&ctx.principal_id))
                .collect()
        } else {
            Vec::new()
        };

        Ok(WakeBundle {
            with_whom: input.with_whom,
            handoffs,
            identity_thread,
            active_decisions,
            capsules,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CapsuleInput, CapsuleItems, CapsuleScope, CompressionLevel, DecisionScope};
    use crate::ops::tests::{ctx, handoff_input, test_ops};

    fn wake(with_whom: &str, recent_count: usize) -> WakeInput {
        WakeInput {
            with_whom: with_whom.to_string(),
            layers: vec![],
            recent_count,
        }
    }

    #[test]
    fn test_wake_up_round_trip() {
        let (ops, _store, _dir) = test_ops();
        let created = ops.create_handoff(&ctx(), handoff_input()).unwrap();

        let bundle = ops.wake_up(&ctx(), wake("Callin", 1)).unwrap();
        assert_eq!(bundle.handoffs.len(), 1);
        assert_eq!(bundle.handoffs[0].id, created.id);
        assert_eq!(
            bundle.handoffs[0].compression_level,
            CompressionLevel::Full
        );
        assert_eq!(bundle.identity_thread.len(), 1);
        assert_eq!(bundle.identity_thread[0].becoming, "becoming continuous");
    }

    #[test]
    fn test_recent_count_bounds() {
        let (ops, _store, _dir) = test_ops();
        for bad in [0, 21] {
            assert_eq!(
                ops.wake_up(&ctx(), wake("Callin", bad)).unwrap_err().kind(),
                "validation_error"
            );
        }
        for ok in [1, 20] {
            assert!(ops.wake_up(&ctx(), wake("Callin", ok)).is_ok());
        }
    }

    #[test]
    fn test_layers_filter_sections() {
        let (ops, _store, _dir) = test_ops();
        ops.create_handoff(&ctx(), handoff_input()).unwrap();
        ops.create_decision(&ctx(), DecisionScope::Global, "a principle".into(), None)
            .unwrap();

        let mut input = wake("Callin", 3);
        input.layers = vec!["identity".into()];
        let bundle = ops.wake_up(&ctx(), input).unwrap();
        assert!(bundle.handoffs.is_empty());
        assert!(bundle.active_decisions.is_empty());
        assert_eq!(bundle.identity_thread.len(), 1);

        let mut input = wake("Callin", 3);
        input.layers = vec!["nonsense".into()];
        assert_eq!(
            ops.wake_up(&ctx(), input).unwrap_err().kind(),
            "validation_error"
        );
    }

    #[test]
    fn test_session_scope_decisions_excluded() {
        let (ops, _store, _dir) = test_ops();
        ops.create_handoff(&ctx(), handoff_input()).unwrap();
        ops.create_decision(&ctx(), DecisionScope::Session, "ephemeral".into(), None)
            .unwrap();
        ops.create_decision(&ctx(), DecisionScope::Project, "durable".into(), None)
            .unwrap();

        let bundle = ops.wake_up(&ctx(), wake("Callin", 3)).unwrap();
        assert_eq!(bundle.active_decisions.len(), 1);
        assert_eq!(bundle.active_decisions[0].text, "durable");
    }

    #[test]
    fn test_capsules_respect_audience_and_expiry() {
        let (ops, _store, _dir) = test_ops();
        ops.create_handoff(&ctx(), handoff_input()).unwrap();
        // Visible: audience *
        ops.create_capsule(
            &ctx(),
            CapsuleInput {
                scope: CapsuleScope::Project,
                subject_type: "repo".into(),
                subject_id: "a".into(),
                audience_agent_ids: vec!["*".into()],
                ttl_days: None,
                items: CapsuleItems::default(),
                risks: vec![],
            },
        )
        .unwrap();
        // Expired: ttl 0
        ops.create_capsule(
            &ctx(),
            CapsuleInput {
                scope: CapsuleScope::Project,
                subject_type: "repo".into(),
                subject_id: "b".into(),
                audience_agent_ids: vec!["*".into()],
                ttl_days: Some(0),
                items: CapsuleItems::default(),
                risks: vec![],
            },
        )
        .unwrap();

        let bundle = ops.wake_up(&ctx(), wake("Callin", 3)).unwrap();
        assert_eq!(bundle.capsules.len(), 1);
        assert_eq!(bundle.capsules[0].subject_id, "a");

        // An audience-restricted capsule is invisible to outsiders
        let restricted = RequestContext::new("default", "stranger");
        let other_bundle = ops.wake_up(&restricted, wake("Callin", 3)).unwrap();
        assert_eq!(other_bundle.capsules.len(), 1); // "*" still matches
    }
}
