//! Typed property graph over memory entities.
//!
//! Any persisted memory entity can be addressed as a node through its id
//! prefix; edges carry a type and a JSON property bag. `parent_of` and
//! `child_of` are mirror views of one stored direction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids;

// ============================================================================
// EDGE TYPES
// ============================================================================

/// Relation types between memory nodes.
///
/// `child_of` is accepted everywhere but stored as the flipped `parent_of`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    ParentOf,
    ChildOf,
    References,
    RelatedTo,
    CreatedBy,
    DependsOn,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::ParentOf => "parent_of",
            EdgeType::ChildOf => "child_of",
            EdgeType::References => "references",
            EdgeType::RelatedTo => "related_to",
            EdgeType::CreatedBy => "created_by",
            EdgeType::DependsOn => "depends_on",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "parent_of" => Some(EdgeType::ParentOf),
            "child_of" => Some(EdgeType::ChildOf),
            "references" => Some(EdgeType::References),
            "related_to" => Some(EdgeType::RelatedTo),
            "created_by" => Some(EdgeType::CreatedBy),
            "depends_on" => Some(EdgeType::DependsOn),
            _ => None,
        }
    }

    /// The inverse view, where one exists
    pub fn inverse(&self) -> Option<EdgeType> {
        match self {
            EdgeType::ParentOf => Some(EdgeType::ChildOf),
            EdgeType::ChildOf => Some(EdgeType::ParentOf),
            _ => None,
        }
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Traversal direction relative to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
    #[default]
    Both,
}

impl Direction {
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "in" => Some(Direction::In),
            "out" => Some(Direction::Out),
            "both" => Some(Direction::Both),
            _ => None,
        }
    }
}

// ============================================================================
// EDGE
// ============================================================================

/// A stored edge between two memory nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    /// `edge_`-prefixed deterministic id
    pub id: String,
    pub tenant_id: String,
    pub from_node_id: String,
    pub to_node_id: String,
    pub edge_type: EdgeType,
    /// Free-form properties, e.g. `{status, priority, agent, started_at}`
    pub properties: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// NODE ADDRESSING
// ============================================================================

/// Which table a node id resolves into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Handoff,
    Note,
    Capsule,
    Feedback,
    Decision,
}

impl NodeKind {
    /// Resolve a node kind from an id prefix; the prefix is authoritative
    pub fn from_id(id: &str) -> Option<Self> {
        match ids::prefix_of(id)? {
            ids::HANDOFF => Some(NodeKind::Handoff),
            ids::NOTE => Some(NodeKind::Note),
            ids::CAPSULE => Some(NodeKind::Capsule),
            ids::FEEDBACK => Some(NodeKind::Feedback),
            ids::DECISION => Some(NodeKind::Decision),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Handoff => "handoff",
            NodeKind::Note => "note",
            NodeKind::Capsule => "capsule",
            NodeKind::Feedback => "feedback",
            NodeKind::Decision => "decision",
        }
    }
}

/// A node id resolved to its backing row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedNode {
    pub kind: NodeKind,
    pub node_id: String,
    /// Representative text of the node
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// One hop discovered during traversal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalHit {
    pub node: ResolvedNode,
    pub edge: Edge,
    /// Hops from the start node, always ≥ 1
    pub depth: u32,
}

// ============================================================================
// KANBAN PROJECTION
// ============================================================================

/// One task in the board projection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCard {
    pub node_id: String,
    pub text: String,
    /// The child edge's property bag (priority, agent, timestamps)
    pub properties: Map<String, Value>,
}

/// `get_project_tasks` output: children of a project node grouped by the
/// `status` edge property. Unknown statuses land in `todo`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskBoard {
    pub todo: Vec<TaskCard>,
    pub doing: Vec<TaskCard>,
    pub done: Vec<TaskCard>,
}

impl TaskBoard {
    /// Route a card into its column by the edge's `status` property
    pub fn push(&mut self, card: TaskCard) {
        let column = card
            .properties
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("todo");
        match column {
            "doing" => self.doing.push(card),
            "done" => self.done.push(card),
            _ => self.todo.push(card),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_type_roundtrip() {
        for t in [
            EdgeType::ParentOf,
            EdgeType::ChildOf,
            EdgeType::References,
            EdgeType::RelatedTo,
            EdgeType::CreatedBy,
            EdgeType::DependsOn,
        ] {
            assert_eq!(EdgeType::parse_name(t.as_str()), Some(t));
        }
        assert_eq!(EdgeType::parse_name("linked"), None);
    }

    #[test]
    fn test_hierarchy_mirrors() {
        assert_eq!(EdgeType::ParentOf.inverse(), Some(EdgeType::ChildOf));
        assert_eq!(EdgeType::ChildOf.inverse(), Some(EdgeType::ParentOf));
        assert_eq!(EdgeType::DependsOn.inverse(), None);
    }

    #[test]
    fn test_node_kind_from_prefix() {
        assert_eq!(NodeKind::from_id("hof_abc"), Some(NodeKind::Handoff));
        assert_eq!(NodeKind::from_id("kn_abc"), Some(NodeKind::Note));
        assert_eq!(NodeKind::from_id("cap_abc"), Some(NodeKind::Capsule));
        assert_eq!(NodeKind::from_id("fb_abc"), Some(NodeKind::Feedback));
        assert_eq!(NodeKind::from_id("dec_abc"), Some(NodeKind::Decision));
        assert_eq!(NodeKind::from_id("edge_abc"), None);
        assert_eq!(NodeKind::from_id("garbage"), None);
    }

    #[test]
    fn test_task_board_buckets_unknown_status_as_todo() {
        let mut board = TaskBoard::default();
        for status in [Some("doing"), Some("done"), Some("blocked"), None] {
            let mut properties = Map::new();
            if let Some(s) = status {
                properties.insert("status".into(), Value::String(s.into()));
            }
            board.push(TaskCard {
                node_id: "kn_x".into(),
                text: "task".into(),
                properties,
            });
        }
        assert_eq!(board.doing.len(), 1);
        assert_eq!(board.done.len(), 1);
        assert_eq!(board.todo.len(), 2);
    }
}
