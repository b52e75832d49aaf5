//! Session handoff - the fundamental unit of continuity.
//!
//! A handoff captures one session: what was experienced, noticed, and
//! learned, the story worth keeping, the identity trajectory (`becoming`),
//! and what the next session should remember. Handoffs are never deleted;
//! they age through compression levels instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// COMPRESSION LEVEL
// ============================================================================

/// Monotone staging of a handoff, driven by age.
///
/// The ordering `full < summary < quick_ref < integrated` is load-bearing:
/// consolidation only ever moves a handoff upward.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CompressionLevel {
    /// All fields as written
    #[default]
    Full,
    /// ~500-token derived summary
    Summary,
    /// ~100-token single-line reference
    QuickRef,
    /// Folded into a consolidated principle
    Integrated,
}

impl CompressionLevel {
    /// Wire string
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionLevel::Full => "full",
            CompressionLevel::Summary => "summary",
            CompressionLevel::QuickRef => "quick_ref",
            CompressionLevel::Integrated => "integrated",
        }
    }

    /// Parse a wire string
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "full" => Some(CompressionLevel::Full),
            "summary" => Some(CompressionLevel::Summary),
            "quick_ref" => Some(CompressionLevel::QuickRef),
            "integrated" => Some(CompressionLevel::Integrated),
            _ => None,
        }
    }
}

impl std::fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// HANDOFF
// ============================================================================

/// One session summary, as persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handoff {
    /// `hof_`-prefixed id
    pub id: String,
    /// Isolation boundary
    pub tenant_id: String,
    /// Session this handoff closes
    pub session_id: String,
    /// Counterpart identity the session was with
    pub with_whom: String,
    /// What happened
    pub experienced: String,
    /// What stood out
    pub noticed: String,
    /// What was learned
    pub learned: String,
    /// Narrative worth keeping
    pub story: Option<String>,
    /// Identity-trajectory statement
    pub becoming: Option<String>,
    /// Continuation hint for the next session
    pub remember: String,
    /// Importance in [0, 1]
    pub significance: f64,
    /// Categorization tags
    pub tags: Vec<String>,
    /// Current compression stage
    pub compression_level: CompressionLevel,
    /// Derived at `summary` level
    pub summary: Option<String>,
    /// Derived at `quick_ref` level
    pub quick_ref: Option<String>,
    /// Principle this handoff was folded into at `integrated` level
    pub integrated_into: Option<String>,
    /// Optional chain to an earlier handoff
    pub parent_handoff_id: Option<String>,
    /// Optional influence marker
    pub influenced_by: Option<String>,
    /// Last time the consolidator touched this row
    pub consolidated_at: Option<DateTime<Utc>>,
    /// Whether an embedding row exists for this handoff
    pub has_embedding: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Handoff {
    /// Text fed to the embedder: the experiential fields joined in order
    pub fn embedding_text(&self) -> String {
        let mut parts = vec![
            self.experienced.as_str(),
            self.noticed.as_str(),
            self.learned.as_str(),
        ];
        if let Some(story) = &self.story {
            parts.push(story);
        }
        if let Some(becoming) = &self.becoming {
            parts.push(becoming);
        }
        parts.join("\n")
    }

    /// Text surfaced by search snippets at the current compression level
    pub fn display_text(&self) -> &str {
        match self.compression_level {
            CompressionLevel::Full => &self.experienced,
            CompressionLevel::Summary => self.summary.as_deref().unwrap_or(&self.experienced),
            CompressionLevel::QuickRef | CompressionLevel::Integrated => self
                .quick_ref
                .as_deref()
                .or(self.summary.as_deref())
                .unwrap_or(&self.experienced),
        }
    }
}

// ============================================================================
// VIEWS & INPUTS
// ============================================================================

/// Input for `create_handoff`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandoffInput {
    pub session_id: String,
    pub with_whom: String,
    pub experienced: String,
    pub noticed: String,
    pub learned: String,
    #[serde(default)]
    pub story: Option<String>,
    #[serde(default)]
    pub becoming: Option<String>,
    pub remember: String,
    pub significance: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parent_handoff_id: Option<String>,
    #[serde(default)]
    pub influenced_by: Option<String>,
}

/// Read-side projection of a handoff.
///
/// Once a handoff has risen past `full`, the raw experiential fields stay on
/// disk but are withheld from default reads; `expand` restores them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffView {
    pub id: String,
    pub session_id: String,
    pub with_whom: String,
    pub compression_level: CompressionLevel,
    pub significance: f64,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub becoming: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experienced: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noticed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learned: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub story: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remember: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quick_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrated_into: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consolidated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl HandoffView {
    /// Project a handoff at its current compression level
    pub fn project(handoff: Handoff, expand: bool) -> Self {
        let reveal_raw = expand || handoff.compression_level == CompressionLevel::Full;
        Self {
            id: handoff.id,
            session_id: handoff.session_id,
            with_whom: handoff.with_whom,
            compression_level: handoff.compression_level,
            significance: handoff.significance,
            tags: handoff.tags,
            becoming: handoff.becoming,
            experienced: reveal_raw.then_some(handoff.experienced),
            noticed: reveal_raw.then_some(handoff.noticed),
            learned: reveal_raw.then_some(handoff.learned),
            story: if reveal_raw { handoff.story } else { None },
            remember: reveal_raw.then_some(handoff.remember),
            summary: if handoff.compression_level >= CompressionLevel::Summary {
                handoff.summary
            } else {
                None
            },
            quick_ref: if handoff.compression_level >= CompressionLevel::QuickRef {
                handoff.quick_ref
            } else {
                None
            },
            integrated_into: handoff.integrated_into,
            consolidated_at: handoff.consolidated_at,
            created_at: handoff.created_at,
        }
    }
}

/// One point on an identity thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityThreadEntry {
    pub handoff_id: String,
    pub becoming: String,
    pub created_at: DateTime<Utc>,
    pub significance: f64,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Handoff {
        Handoff {
            id: "hof_1".into(),
            tenant_id: "t1".into(),
            session_id: "s1".into(),
            with_whom: "Callin".into(),
            experienced: "built the retrieval layer".into(),
            noticed: "ranking felt brittle".into(),
            learned: "normalize per batch".into(),
            story: None,
            becoming: Some("becoming methodical".into()),
            remember: "check the tie-breaks".into(),
            significance: 0.8,
            tags: vec!["retrieval".into()],
            compression_level: CompressionLevel::Full,
            summary: None,
            quick_ref: None,
            integrated_into: None,
            parent_handoff_id: None,
            influenced_by: None,
            consolidated_at: None,
            has_embedding: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_compression_level_ordering() {
        assert!(CompressionLevel::Full < CompressionLevel::Summary);
        assert!(CompressionLevel::Summary < CompressionLevel::QuickRef);
        assert!(CompressionLevel::QuickRef < CompressionLevel::Integrated);
    }

    #[test]
    fn test_compression_level_roundtrip() {
        for level in [
            CompressionLevel::Full,
            CompressionLevel::Summary,
            CompressionLevel::QuickRef,
            CompressionLevel::Integrated,
        ] {
            assert_eq!(CompressionLevel::parse_name(level.as_str()), Some(level));
        }
        assert_eq!(CompressionLevel::parse_name("compact"), None);
    }

    #[test]
    fn test_embedding_text_includes_becoming() {
        let h = sample();
        let text = h.embedding_text();
        assert!(text.contains("built the retrieval layer"));
        assert!(text.contains("becoming methodical"));
    }

    #[test]
    fn test_full_view_exposes_raw_fields() {
        let view = HandoffView::project(sample(), false);
        assert_eq!(view.compression_level, CompressionLevel::Full);
        assert!(view.experienced.is_some());
        assert!(view.remember.is_some());
        assert!(view.summary.is_none());
    }

    #[test]
    fn test_summary_view_withholds_raw_fields() {
        let mut h = sample();
        h.compression_level = CompressionLevel::Summary;
        h.summary = Some("a summary".into());

        let view = HandoffView::project(h.clone(), false);
        assert!(view.experienced.is_none());
        assert!(view.learned.is_none());
        assert_eq!(view.summary.as_deref(), Some("a summary"));

        // expand restores the raw fields without dropping the summary
        let expanded = HandoffView::project(h, true);
        assert!(expanded.experienced.is_some());
        assert_eq!(expanded.summary.as_deref(), Some("a summary"));
    }

    #[test]
    fn test_display_text_follows_level() {
        let mut h = sample();
        assert_eq!(h.display_text(), "built the retrieval layer");

        h.compression_level = CompressionLevel::Summary;
        h.summary = Some("short summary".into());
        assert_eq!(h.display_text(), "short summary");

        h.compression_level = CompressionLevel::QuickRef;
        h.quick_ref = Some("one line".into());
        assert_eq!(h.display_text(), "one line");
    }

    #[test]
    fn test_handoff_input_rejects_unknown_fields() {
        let json = r#"{
            "session_id": "s1", "with_whom": "c", "experienced": "e",
            "noticed": "n", "learned": "l", "remember": "r",
            "significance": 0.5, "surprise": true
        }"#;
        assert!(serde_json::from_str::<HandoffInput>(json).is_err());
    }
}
