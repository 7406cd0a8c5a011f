//! Shared async handle over the synchronous [`Database`].
//!
//! Event handlers run concurrently on the tokio runtime and all write through
//! a single SQLite connection, so the connection sits behind a
//! `tokio::sync::Mutex`. Queries are short and local; callers must not hold
//! any in-memory component lock while awaiting a store call.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use echolink_shared::types::{EdgeStatus, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::{CallRecord, ConnectionEdge, Invitation, StoredMessage};

/// Cloneable async store handle.
#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Database>>,
}

impl Store {
    /// Open the default application database.
    pub fn open_default() -> Result<Self> {
        Ok(Self::from_database(Database::new()?))
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        Ok(Self::from_database(Database::open_at(path)?))
    }

    /// Open a throwaway in-memory database (tests, dev mode).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    // ------------------------------------------------------------------
    // Invitations
    // ------------------------------------------------------------------

    pub async fn insert_invitation(&self, invitation: &Invitation) -> Result<()> {
        self.db.lock().await.insert_invitation(invitation)
    }

    pub async fn get_invitation(&self, id: Uuid) -> Result<Invitation> {
        self.db.lock().await.get_invitation(id)
    }

    pub async fn update_invitation(&self, invitation: &Invitation) -> Result<()> {
        self.db.lock().await.update_invitation(invitation)
    }

    pub async fn delete_expired_invitations(&self, now: DateTime<Utc>) -> Result<usize> {
        self.db.lock().await.delete_expired_invitations(now)
    }

    // ------------------------------------------------------------------
    // Connection edges
    // ------------------------------------------------------------------

    pub async fn insert_edge(&self, edge: &ConnectionEdge) -> Result<()> {
        self.db.lock().await.insert_edge(edge)
    }

    pub async fn get_edge(&self, id: Uuid) -> Result<ConnectionEdge> {
        self.db.lock().await.get_edge(id)
    }

    pub async fn set_edge_status(&self, id: Uuid, status: EdgeStatus) -> Result<()> {
        self.db.lock().await.set_edge_status(id, status)
    }

    pub async fn list_active_edges(&self) -> Result<Vec<ConnectionEdge>> {
        self.db.lock().await.list_active_edges()
    }

    // ------------------------------------------------------------------
    // Chat messages
    // ------------------------------------------------------------------

    pub async fn insert_message(&self, message: &StoredMessage) -> Result<()> {
        self.db.lock().await.insert_message(message)
    }

    pub async fn get_message(&self, id: Uuid) -> Result<StoredMessage> {
        self.db.lock().await.get_message(id)
    }

    pub async fn set_message_deleted(&self, id: Uuid) -> Result<bool> {
        self.db.lock().await.set_message_deleted(id)
    }

    pub async fn messages_for_connection(&self, connection_id: Uuid) -> Result<Vec<StoredMessage>> {
        self.db.lock().await.messages_for_connection(connection_id)
    }

    // ------------------------------------------------------------------
    // Call history
    // ------------------------------------------------------------------

    pub async fn insert_call_record(&self, record: &CallRecord) -> Result<()> {
        self.db.lock().await.insert_call_record(record)
    }

    pub async fn call_history_for(&self, user: &UserId, limit: u32) -> Result<Vec<CallRecord>> {
        self.db.lock().await.call_history_for(user, limit)
    }
}
