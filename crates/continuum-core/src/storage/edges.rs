//! Store operations for the edge table.
//!
//! Edges are stored in their canonical direction; mirror views are the graph
//! service's concern. This module only knows rows.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde_json::{Map, Value};

use super::sqlite::{fmt_ts, Store};
use crate::error::{MemoryError, Result};
use crate::model::{Direction, Edge, EdgeType};

impl Store {
    pub(super) fn row_to_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<Edge> {
        let edge_type: String = row.get("edge_type")?;
        let properties: String = row.get("properties")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        Ok(Edge {
            id: row.get("id")?,
            tenant_id: row.get("tenant_id")?,
            from_node_id: row.get("from_node_id")?,
            to_node_id: row.get("to_node_id")?,
            edge_type: EdgeType::parse_name(&edge_type).unwrap_or(EdgeType::RelatedTo),
            properties: serde_json::from_str::<Map<String, Value>>(&properties)
                .unwrap_or_default(),
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_default(),
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_default(),
        })
    }

    pub fn insert_edge(&self, edge: &Edge) -> Result<()> {
        let writer = self.writer.lock()?;
        writer.execute(
            "INSERT INTO edges (
                id, tenant_id, from_node_id, to_node_id, edge_type,
                properties, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                edge.id,
                edge.tenant_id,
                edge.from_node_id,
                edge.to_node_id,
                edge.edge_type.as_str(),
                serde_json::to_string(&edge.properties)?,
                fmt_ts(edge.created_at),
                fmt_ts(edge.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_edge(&self, tenant: &str, id: &str) -> Result<Option<Edge>> {
        let reader = self.reader.lock()?;
        let edge = reader
            .query_row(
                "SELECT * FROM edges WHERE tenant_id = ?1 AND id = ?2",
                params![tenant, id],
                Self::row_to_edge,
            )
            .optional()?;
        Ok(edge)
    }

    /// Edges touching a node in the requested direction, optionally filtered
    /// by stored type
    pub fn edges_for_node(
        &self,
        tenant: &str,
        node_id: &str,
        direction: Direction,
        edge_type: Option<EdgeType>,
    ) -> Result<Vec<Edge>> {
        let reader = self.reader.lock()?;
        let sql = match direction {
            Direction::Out => {
                "SELECT * FROM edges
                 WHERE tenant_id = ?1 AND from_node_id = ?2
                   AND (?3 IS NULL OR edge_type = ?3)
                 ORDER BY created_at ASC, id ASC"
            }
            Direction::In => {
                "SELECT * FROM edges
                 WHERE tenant_id = ?1 AND to_node_id = ?2
                   AND (?3 IS NULL OR edge_type = ?3)
                 ORDER BY created_at ASC, id ASC"
            }
            Direction::Both => {
                "SELECT * FROM edges
                 WHERE tenant_id = ?1 AND (from_node_id = ?2 OR to_node_id = ?2)
                   AND (?3 IS NULL OR edge_type = ?3)
                 ORDER BY created_at ASC, id ASC"
            }
        };
        let mut stmt = reader.prepare(sql)?;
        let rows = stmt.query_map(
            params![tenant, node_id, edge_type.map(|t| t.as_str())],
            Self::row_to_edge,
        )?;
        let mut edges = Vec::new();
        for row in rows {
            edges.push(row?);
        }
        Ok(edges)
    }

    /// Outgoing `depends_on` targets of a node, for cycle detection
    pub fn depends_on_targets(&self, tenant: &str, node_id: &str) -> Result<Vec<String>> {
        let reader = self.reader.lock()?;
        let mut stmt = reader.prepare(
            "SELECT to_node_id FROM edges
             WHERE tenant_id = ?1 AND from_node_id = ?2 AND edge_type = 'depends_on'",
        )?;
        let rows = stmt.query_map(params![tenant, node_id], |row| row.get::<_, String>(0))?;
        let mut targets = Vec::new();
        for row in rows {
            targets.push(row?);
        }
        Ok(targets)
    }

    /// How many edges reference a node from either end
    pub fn edges_touching(&self, tenant: &str, node_id: &str) -> Result<i64> {
        let reader = self.reader.lock()?;
        let count = reader.query_row(
            "SELECT COUNT(*) FROM edges
             WHERE tenant_id = ?1 AND (from_node_id = ?2 OR to_node_id = ?2)",
            params![tenant, node_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Replace an edge's property bag and bump `updated_at`
    pub fn set_edge_properties(
        &self,
        tenant: &str,
        edge_id: &str,
        properties: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let writer = self.writer.lock()?;
        let changed = writer.execute(
            "UPDATE edges SET properties = ?1, updated_at = ?2
             WHERE tenant_id = ?3 AND id = ?4",
            params![
                serde_json::to_string(properties)?,
                fmt_ts(now),
                tenant,
                edge_id
            ],
        )?;
        if changed == 0 {
            return Err(MemoryError::NotFound(format!("edge '{edge_id}' not found")));
        }
        Ok(())
    }

    pub fn delete_edge(&self, tenant: &str, edge_id: &str) -> Result<()> {
        let writer = self.writer.lock()?;
        let changed = writer.execute(
            "DELETE FROM edges WHERE tenant_id = ?1 AND id = ?2",
            params![tenant, edge_id],
        )?;
        if changed == 0 {
            return Err(MemoryError::NotFound(format!("edge '{edge_id}' not found")));
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
