//! CRUD operations for [`ConnectionEdge`] records.
//!
//! Edges are the durable half of the connection graph: the in-memory graph
//! is rebuilt from the `active` rows on startup.

use rusqlite::params;
use uuid::Uuid;

use echolink_shared::types::{EdgeStatus, LinkType};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::ConnectionEdge;
use crate::sql;

impl Database {
    /// Insert a new connection edge.
    pub fn insert_edge(&self, edge: &ConnectionEdge) -> Result<()> {
        self.conn().execute(
            "INSERT INTO connection_edges (id, user_a, user_b, link_type, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                edge.id.to_string(),
                edge.user_a.as_str(),
                edge.user_b.as_str(),
                edge.link_type.as_str(),
                edge.status.as_str(),
                edge.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single edge by connection id.
    pub fn get_edge(&self, id: Uuid) -> Result<ConnectionEdge> {
        self.conn()
            .query_row(
                "SELECT id, user_a, user_b, link_type, status, created_at
                 FROM connection_edges WHERE id = ?1",
                params![id.to_string()],
                row_to_edge,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Flip an edge's status (active -> removed, or back).
    pub fn set_edge_status(&self, id: Uuid, status: EdgeStatus) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE connection_edges SET status = ?2 WHERE id = ?1",
            params![id.to_string(), status.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// List all active edges, ordered by creation date ascending. Used to
    /// rebuild the in-memory graph on startup.
    pub fn list_active_edges(&self) -> Result<Vec<ConnectionEdge>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, user_a, user_b, link_type, status, created_at
             FROM connection_edges
             WHERE status = 'active'
             ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map([], row_to_edge)?;

        let mut edges = Vec::new();
        for row in rows {
            edges.push(row?);
        }
        Ok(edges)
    }
}

/// Map a `rusqlite::Row` to a [`ConnectionEdge`].
fn row_to_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConnectionEdge> {
    let id_str: String = row.get(0)?;
    let user_a: String = row.get(1)?;
    let user_b: String = row.get(2)?;
    let link_type_str: String = row.get(3)?;
    let status_str: String = row.get(4)?;
    let created_str: String = row.get(5)?;

    Ok(ConnectionEdge {
        id: sql::parse_uuid(0, &id_str)?,
        user_a: user_a.as_str().into(),
        user_b: user_b.as_str().into(),
        link_type: sql::parse_enum(3, &link_type_str, LinkType::parse)?,
        status: sql::parse_enum(4, &status_str, EdgeStatus::parse)?,
        created_at: sql::parse_ts(5, &created_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_reload_active_edges() {
        let db = Database::open_in_memory().unwrap();

        let edge = ConnectionEdge::new("b@x.com".into(), "a@x.com".into(), LinkType::Permanent);
        db.insert_edge(&edge).unwrap();

        let loaded = db.list_active_edges().unwrap();
        assert_eq!(loaded.len(), 1);
        // Members are stored in sorted order regardless of argument order.
        assert_eq!(loaded[0].user_a.as_str(), "a@x.com");
        assert_eq!(loaded[0].user_b.as_str(), "b@x.com");
    }

    #[test]
    fn removed_edges_do_not_reload() {
        let db = Database::open_in_memory().unwrap();

        let edge = ConnectionEdge::new("a@x.com".into(), "b@x.com".into(), LinkType::Ephemeral);
        db.insert_edge(&edge).unwrap();
        db.set_edge_status(edge.id, EdgeStatus::Removed).unwrap();

        assert!(db.list_active_edges().unwrap().is_empty());
        // The row itself survives for audit purposes.
        assert!(!db.get_edge(edge.id).unwrap().is_active());
    }
}
