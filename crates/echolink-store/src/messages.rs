//! CRUD operations for [`StoredMessage`] records.

use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::StoredMessage;
use crate::sql;

impl Database {
    /// Insert a new chat message.
    pub fn insert_message(&self, message: &StoredMessage) -> Result<()> {
        self.conn().execute(
            "INSERT INTO chat_messages (id, connection_id, sender_email, body, created_at, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id.to_string(),
                message.connection_id.to_string(),
                message.sender_email.as_str(),
                message.body,
                message.created_at.to_rfc3339(),
                message.deleted as i64,
            ],
        )?;
        Ok(())
    }

    /// Fetch a single message by id.
    pub fn get_message(&self, id: Uuid) -> Result<StoredMessage> {
        self.conn()
            .query_row(
                "SELECT id, connection_id, sender_email, body, created_at, deleted
                 FROM chat_messages WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Flip the soft-delete flag. Returns `true` if a row was updated.
    pub fn set_message_deleted(&self, id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE chat_messages SET deleted = 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Chat history for one connection, excluding soft-deleted messages.
    ///
    /// Ordered by creation time; ties broken by insertion order (rowid).
    pub fn messages_for_connection(&self, connection_id: Uuid) -> Result<Vec<StoredMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, connection_id, sender_email, body, created_at, deleted
             FROM chat_messages
             WHERE connection_id = ?1 AND deleted = 0
             ORDER BY created_at ASC, rowid ASC",
        )?;

        let rows = stmt.query_map(params![connection_id.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

/// Map a `rusqlite::Row` to a [`StoredMessage`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let id_str: String = row.get(0)?;
    let connection_str: String = row.get(1)?;
    let sender: String = row.get(2)?;
    let body: String = row.get(3)?;
    let created_str: String = row.get(4)?;
    let deleted: i64 = row.get(5)?;

    Ok(StoredMessage {
        id: sql::parse_uuid(0, &id_str)?,
        connection_id: sql::parse_uuid(1, &connection_str)?,
        sender_email: sender.as_str().into(),
        body,
        created_at: sql::parse_ts(4, &created_str)?,
        deleted: deleted != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConnectionEdge;
    use chrono::Utc;
    use echolink_shared::types::LinkType;

    fn seed_edge(db: &Database) -> Uuid {
        let edge = ConnectionEdge::new("a@x.com".into(), "b@x.com".into(), LinkType::Permanent);
        db.insert_edge(&edge).unwrap();
        edge.id
    }

    fn message(connection_id: Uuid, body: &str) -> StoredMessage {
        StoredMessage {
            id: Uuid::new_v4(),
            connection_id,
            sender_email: "a@x.com".into(),
            body: body.to_string(),
            created_at: Utc::now(),
            deleted: false,
        }
    }

    #[test]
    fn history_preserves_insertion_order() {
        let db = Database::open_in_memory().unwrap();
        let connection_id = seed_edge(&db);

        for body in ["one", "two", "three"] {
            db.insert_message(&message(connection_id, body)).unwrap();
        }

        let history = db.messages_for_connection(connection_id).unwrap();
        let bodies: Vec<&str> = history.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["one", "two", "three"]);
    }

    #[test]
    fn soft_delete_hides_from_history() {
        let db = Database::open_in_memory().unwrap();
        let connection_id = seed_edge(&db);

        let msg = message(connection_id, "oops");
        db.insert_message(&msg).unwrap();

        assert!(db.set_message_deleted(msg.id).unwrap());
        assert!(db.messages_for_connection(connection_id).unwrap().is_empty());

        // The record itself survives, flagged.
        assert!(db.get_message(msg.id).unwrap().deleted);
    }

    #[test]
    fn delete_missing_message_reports_false() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.set_message_deleted(Uuid::new_v4()).unwrap());
    }
}
