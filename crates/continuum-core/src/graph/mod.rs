//! Typed graph over memory nodes.
//!
//! Endpoints resolve by id prefix within the tenant. `depends_on` stays a
//! DAG - checked on every insert. The hierarchy is stored as `parent_of`;
//! `child_of` is accepted as input and as a traversal view by flipping
//! endpoints.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::context::RequestContext;
use crate::error::{MemoryError, Result};
use crate::ids;
use crate::model::{Direction, Edge, EdgeType, ResolvedNode, TaskBoard, TaskCard, TraversalHit};
use crate::storage::Store;

/// Maximum traversal depth
pub const MAX_DEPTH: u32 = 5;

/// Graph operations over the store
pub struct GraphService {
    store: Arc<Store>,
}

impl GraphService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Resolve a node id within the tenant or fail with `NotFound`
    pub fn resolve_node(&self, ctx: &RequestContext, node_id: &str) -> Result<ResolvedNode> {
        ids::validate(node_id)?;
        self.store
            .resolve_node(&ctx.tenant_id, node_id)?
            .ok_or_else(|| MemoryError::NotFound(format!("node '{node_id}' not found")))
    }

    /// Create an edge after resolving both endpoints in the tenant.
    ///
    /// `child_of` input is canonicalized to a flipped `parent_of`.
    /// `depends_on` edges are refused when they would close a cycle.
    pub fn create_edge(
        &self,
        ctx: &RequestContext,
        from_node_id: &str,
        to_node_id: &str,
        edge_type: EdgeType,
        properties: Option<Map<String, Value>>,
    ) -> Result<Edge> {
        self.resolve_node(ctx, from_node_id)?;
        self.resolve_node(ctx, to_node_id)?;

        // Canonical storage direction for the hierarchy is parent_of
        let (from, to, stored_type) = match edge_type {
            EdgeType::ChildOf => (to_node_id, from_node_id, EdgeType::ParentOf),
            other => (from_node_id, to_node_id, other),
        };

        if stored_type == EdgeType::DependsOn {
            self.check_no_cycle(ctx, from, to)?;
        }

        let now = Utc::now();
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let edge = Edge {
            id: ids::edge_id(&ctx.tenant_id, from, to, stored_type.as_str(), &nonce),
            tenant_id: ctx.tenant_id.clone(),
            from_node_id: from.to_string(),
            to_node_id: to.to_string(),
            edge_type: stored_type,
            properties: properties.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_edge(&edge)?;
        self.store
            .append_event(&ctx.tenant_id, "edge.created", &edge.id)?;
        Ok(edge)
    }

    /// Walk `depends_on` edges from `to`; reaching `from` closes a cycle
    fn check_no_cycle(&self, ctx: &RequestContext, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Err(MemoryError::CircularDependency(format!(
                "'{from}' cannot depend on itself"
            )));
        }
        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier = vec![to.to_string()];
        while let Some(node) = frontier.pop() {
            ctx.check_deadline()?;
            if node == from {
                return Err(MemoryError::CircularDependency(format!(
                    "'{from}' -> '{to}' would close a dependency cycle"
                )));
            }
            if !visited.insert(node.clone()) {
                continue;
            }
            frontier.extend(self.store.depends_on_targets(&ctx.tenant_id, &node)?);
        }
        Ok(())
    }

    /// Edges touching a node. A `child_of` filter is answered from the
    /// stored `parent_of` rows with the direction flipped.
    pub fn get_edges(
        &self,
        ctx: &RequestContext,
        node_id: &str,
        direction: Direction,
        edge_type: Option<EdgeType>,
    ) -> Result<Vec<Edge>> {
        self.resolve_node(ctx, node_id)?;
        let (stored_type, direction) = match edge_type {
            Some(EdgeType::ChildOf) => (Some(EdgeType::ParentOf), flip(direction)),
            other => (other, direction),
        };
        self.store
            .edges_for_node(&ctx.tenant_id, node_id, direction, stored_type)
    }

    /// Breadth-first traversal from a node, cycle-safe across edge types.
    ///
    /// `depth` must be in `1..=MAX_DEPTH`; results carry the hop count.
    pub fn traverse(
        &self,
        ctx: &RequestContext,
        node_id: &str,
        edge_type: Option<EdgeType>,
        direction: Direction,
        depth: u32,
    ) -> Result<Vec<TraversalHit>> {
        if depth < 1 || depth > MAX_DEPTH {
            return Err(MemoryError::Validation(format!(
                "depth must be in 1..={MAX_DEPTH}, got {depth}"
            )));
        }
        self.resolve_node(ctx, node_id)?;

        let (stored_type, direction) = match edge_type {
            Some(EdgeType::ChildOf) => (Some(EdgeType::ParentOf), flip(direction)),
            other => (other, direction),
        };

        let mut visited: HashSet<String> = HashSet::from([node_id.to_string()]);
        let mut queue: VecDeque<(String, u32)> = VecDeque::from([(node_id.to_string(), 0)]);
        let mut hits = Vec::new();

        while let Some((current, current_depth)) = queue.pop_front() {
            ctx.check_deadline()?;
            if current_depth >= depth {
                continue;
            }
            let edges =
                self.store
                    .edges_for_node(&ctx.tenant_id, &current, direction, stored_type)?;
            for edge in edges {
                let neighbor = if edge.from_node_id == current {
                    edge.to_node_id.clone()
                } else {
                    edge.from_node_id.clone()
                };
                if !visited.insert(neighbor.clone()) {
                    continue;
                }
                // Dangling endpoints are skipped rather than failing the walk
                let Some(node) = self.store.resolve_node(&ctx.tenant_id, &neighbor)? else {
                    continue;
                };
                hits.push(TraversalHit {
                    node,
                    edge,
                    depth: current_depth + 1,
                });
                queue.push_back((neighbor, current_depth + 1));
            }
        }
        Ok(hits)
    }

    /// JSON-merge into an edge's property bag
    pub fn update_edge_properties(
        &self,
        ctx: &RequestContext,
        edge_id: &str,
        updates: Map<String, Value>,
    ) -> Result<Edge> {
        let mut edge = self
            .store
            .get_edge(&ctx.tenant_id, edge_id)?
            .ok_or_else(|| MemoryError::NotFound(format!("edge '{edge_id}' not found")))?;
        for (key, value) in updates {
            if value.is_null() {
                edge.properties.remove(&key);
            } else {
                edge.properties.insert(key, value);
            }
        }
        let now = Utc::now();
        self.store
            .set_edge_properties(&ctx.tenant_id, edge_id, &edge.properties, now)?;
        edge.updated_at = now;
        self.store
            .append_event(&ctx.tenant_id, "edge.updated", edge_id)?;
        Ok(edge)
    }

    pub fn delete_edge(&self, ctx: &RequestContext, edge_id: &str) -> Result<()> {
        self.store.delete_edge(&ctx.tenant_id, edge_id)?;
        self.store
            .append_event(&ctx.tenant_id, "edge.deleted", edge_id)?;
        Ok(())
    }

    /// Kanban projection: `parent_of` children grouped by `properties.status`
    pub fn get_project_tasks(
        &self,
        ctx: &RequestContext,
        project_node_id: &str,
    ) -> Result<TaskBoard> {
        self.resolve_node(ctx, project_node_id)?;
        let edges = self.store.edges_for_node(
            &ctx.tenant_id,
            project_node_id,
            Direction::Out,
            Some(EdgeType::ParentOf),
        )?;
        let mut board = TaskBoard::default();
        for edge in edges {
            let Some(node) = self
                .store
                .resolve_node(&ctx.tenant_id, &edge.to_node_id)?
            else {
                continue;
            };
            board.push(TaskCard {
                node_id: node.node_id,
                text: node.text,
                properties: edge.properties,
            });
        }
        Ok(board)
    }
}

fn flip(direction: Direction) -> Direction {
    match direction {
        Direction::In => Direction::Out,
        Direction::Out => Direction::In,
        Direction::Both => Direction::Both,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::DEFAULT_DIMENSION;
    use crate::model::KnowledgeNote;
    use tempfile::TempDir;

    fn test_graph() -> (GraphService, Arc<Store>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            Store::open(Some(dir.path().join("test.db")), DEFAULT_DIMENSION).unwrap(),
        );
        (GraphService::new(store.clone()), store, dir)
    }

    fn seed_note(store: &Store, tenant: &str, id: &str, text: &str) {
        store
            .insert_note(&KnowledgeNote {
                id: id.to_string(),
                tenant_id: tenant.to_string(),
                text: text.to_string(),
                tags: vec![],
                project_path: None,
                confidence: 0.8,
                source_handoffs: vec![],
                has_embedding: false,
                created_at: Utc::now(),
            })
            .unwrap();
    }

    fn ctx() -> RequestContext {
        RequestContext::new("t1", "agent")
    }

    #[test]
    fn test_create_edge_requires_both_endpoints() {
        let (graph, store, _dir) = test_graph();
        seed_note(&store, "t1", "kn_a", "a");

        let err = graph
            .create_edge(&ctx(), "kn_a", "kn_missing", EdgeType::References, None)
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");

        seed_note(&store, "t1", "kn_b", "b");
        let edge = graph
            .create_edge(&ctx(), "kn_a", "kn_b", EdgeType::References, None)
            .unwrap();
        assert!(edge.id.starts_with("edge_"));
    }

    #[test]
    fn test_cross_tenant_endpoints_do_not_resolve() {
        let (graph, store, _dir) = test_graph();
        seed_note(&store, "t1", "kn_a", "a");
        seed_note(&store, "t2", "kn_b", "b");

        let err = graph
            .create_edge(&ctx(), "kn_a", "kn_b", EdgeType::References, None)
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_direct_cycle_rejected() {
        let (graph, store, _dir) = test_graph();
        seed_note(&store, "t1", "kn_a", "a");
        seed_note(&store, "t1", "kn_b", "b");

        graph
            .create_edge(&ctx(), "kn_a", "kn_b", EdgeType::DependsOn, None)
            .unwrap();
        let err = graph
            .create_edge(&ctx(), "kn_b", "kn_a", EdgeType::DependsOn, None)
            .unwrap_err();
        assert_eq!(err.kind(), "circular_dependency");
    }

    #[test]
    fn test_transitive_cycle_rejected() {
        let (graph, store, _dir) = test_graph();
        for id in ["kn_a", "kn_b", "kn_c"] {
            seed_note(&store, "t1", id, id);
        }
        graph
            .create_edge(&ctx(), "kn_a", "kn_b", EdgeType::DependsOn, None)
            .unwrap();
        graph
            .create_edge(&ctx(), "kn_b", "kn_c", EdgeType::DependsOn, None)
            .unwrap();

        let err = graph
            .create_edge(&ctx(), "kn_c", "kn_a", EdgeType::DependsOn, None)
            .unwrap_err();
        assert_eq!(err.kind(), "circular_dependency");

        // Self-dependency is the degenerate cycle
        let err = graph
            .create_edge(&ctx(), "kn_a", "kn_a", EdgeType::DependsOn, None)
            .unwrap_err();
        assert_eq!(err.kind(), "circular_dependency");
    }

    #[test]
    fn test_cycles_allowed_for_other_types() {
        let (graph, store, _dir) = test_graph();
        seed_note(&store, "t1", "kn_a", "a");
        seed_note(&store, "t1", "kn_b", "b");

        graph
            .create_edge(&ctx(), "kn_a", "kn_b", EdgeType::RelatedTo, None)
            .unwrap();
        assert!(graph
            .create_edge(&ctx(), "kn_b", "kn_a", EdgeType::RelatedTo, None)
            .is_ok());
    }

    #[test]
    fn test_child_of_is_stored_as_parent_of() {
        let (graph, store, _dir) = test_graph();
        seed_note(&store, "t1", "kn_parent", "parent");
        seed_note(&store, "t1", "kn_child", "child");

        let edge = graph
            .create_edge(&ctx(), "kn_child", "kn_parent", EdgeType::ChildOf, None)
            .unwrap();
        assert_eq!(edge.edge_type, EdgeType::ParentOf);
        assert_eq!(edge.from_node_id, "kn_parent");
        assert_eq!(edge.to_node_id, "kn_child");

        // Both views find the same stored edge
        let as_parent = graph
            .get_edges(&ctx(), "kn_parent", Direction::Out, Some(EdgeType::ParentOf))
            .unwrap();
        assert_eq!(as_parent.len(), 1);
        let as_child = graph
            .get_edges(&ctx(), "kn_child", Direction::Out, Some(EdgeType::ChildOf))
            .unwrap();
        assert_eq!(as_child.len(), 1);
        assert_eq!(as_parent[0].id, as_child[0].id);
    }

    #[test]
    fn test_traverse_depth_bounds() {
        let (graph, store, _dir) = test_graph();
        seed_note(&store, "t1", "kn_a", "a");

        for bad in [0, 6] {
            let err = graph
                .traverse(&ctx(), "kn_a", None, Direction::Both, bad)
                .unwrap_err();
            assert_eq!(err.kind(), "validation_error");
        }
        assert!(graph.traverse(&ctx(), "kn_a", None, Direction::Both, 1).is_ok());
        assert!(graph.traverse(&ctx(), "kn_a", None, Direction::Both, 5).is_ok());
    }

    #[test]
    fn test_traverse_reports_depth_and_stops_at_limit() {
        let (graph, store, _dir) = test_graph();
        for id in ["kn_a", "kn_b", "kn_c", "kn_d"] {
            seed_note(&store, "t1", id, id);
        }
        graph
            .create_edge(&ctx(), "kn_a", "kn_b", EdgeType::References, None)
            .unwrap();
        graph
            .create_edge(&ctx(), "kn_b", "kn_c", EdgeType::References, None)
            .unwrap();
        graph
            .create_edge(&ctx(), "kn_c", "kn_d", EdgeType::References, None)
            .unwrap();

        let one_hop = graph
            .traverse(&ctx(), "kn_a", None, Direction::Out, 1)
            .unwrap();
        assert_eq!(one_hop.len(), 1);
        assert_eq!(one_hop[0].depth, 1);
        assert_eq!(one_hop[0].node.node_id, "kn_b");

        let two_hops = graph
            .traverse(&ctx(), "kn_a", None, Direction::Out, 2)
            .unwrap();
        assert_eq!(two_hops.len(), 2);
        assert!(two_hops.iter().any(|h| h.depth == 2 && h.node.node_id == "kn_c"));
    }

    #[test]
    fn test_traverse_survives_cycles_across_types() {
        let (graph, store, _dir) = test_graph();
        seed_note(&store, "t1", "kn_a", "a");
        seed_note(&store, "t1", "kn_b", "b");
        graph
            .create_edge(&ctx(), "kn_a", "kn_b", EdgeType::RelatedTo, None)
            .unwrap();
        graph
            .create_edge(&ctx(), "kn_b", "kn_a", EdgeType::References, None)
            .unwrap();

        let hits = graph
            .traverse(&ctx(), "kn_a", None, Direction::Both, 5)
            .unwrap();
        // kn_b is reported once; the cycle never revisits kn_a
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node.node_id, "kn_b");
    }

    #[test]
    fn test_update_edge_properties_merges() {
        let (graph, store, _dir) = test_graph();
        seed_note(&store, "t1", "kn_a", "a");
        seed_note(&store, "t1", "kn_b", "b");
        let mut initial = Map::new();
        initial.insert("status".into(), Value::String("todo".into()));
        initial.insert("priority".into(), Value::from(2));
        let edge = graph
            .create_edge(&ctx(), "kn_a", "kn_b", EdgeType::ParentOf, Some(initial))
            .unwrap();

        let mut updates = Map::new();
        updates.insert("status".into(), Value::String("doing".into()));
        updates.insert("agent".into(), Value::String("Callin".into()));
        updates.insert("priority".into(), Value::Null);
        let updated = graph
            .update_edge_properties(&ctx(), &edge.id, updates)
            .unwrap();

        assert_eq!(
            updated.properties.get("status"),
            Some(&Value::String("doing".into()))
        );
        assert_eq!(
            updated.properties.get("agent"),
            Some(&Value::String("Callin".into()))
        );
        // Null removes a key
        assert!(!updated.properties.contains_key("priority"));
    }

    #[test]
    fn test_project_task_board() {
        let (graph, store, _dir) = test_graph();
        seed_note(&store, "t1", "kn_project", "the project");
        for (id, status) in [
            ("kn_t1", Some("todo")),
            ("kn_t2", Some("doing")),
            ("kn_t3", Some("done")),
            ("kn_t4", Some("blocked")),
            ("kn_t5", None),
        ] {
            seed_note(&store, "t1", id, id);
            let properties = status.map(|s| {
                let mut m = Map::new();
                m.insert("status".into(), Value::String(s.into()));
                m
            });
            graph
                .create_edge(&ctx(), "kn_project", id, EdgeType::ParentOf, properties)
                .unwrap();
        }

        let board = graph.get_project_tasks(&ctx(), "kn_project").unwrap();
        assert_eq!(board.doing.len(), 1);
        assert_eq!(board.done.len(), 1);
        // Unknown and missing statuses bucket as todo
        assert_eq!(board.todo.len(), 3);
    }
}
