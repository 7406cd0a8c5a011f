//! CRUD operations for [`Invitation`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use echolink_shared::types::{InviteStatus, LinkType};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Invitation;
use crate::sql;

impl Database {
    /// Insert a new invitation.
    pub fn insert_invitation(&self, invitation: &Invitation) -> Result<()> {
        self.conn().execute(
            "INSERT INTO invitations
                 (id, sender_email, receiver_email, status, link_type, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                invitation.id.to_string(),
                invitation.sender_email.as_str(),
                invitation.receiver_email.as_ref().map(|u| u.as_str().to_string()),
                invitation.status.as_str(),
                invitation.link_type.as_str(),
                invitation.created_at.to_rfc3339(),
                invitation.expires_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single invitation by token.
    pub fn get_invitation(&self, id: Uuid) -> Result<Invitation> {
        self.conn()
            .query_row(
                "SELECT id, sender_email, receiver_email, status, link_type, created_at, expires_at
                 FROM invitations WHERE id = ?1",
                params![id.to_string()],
                row_to_invitation,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Persist the pending -> accepted transition.
    pub fn update_invitation(&self, invitation: &Invitation) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE invitations SET receiver_email = ?2, status = ?3 WHERE id = ?1",
            params![
                invitation.id.to_string(),
                invitation.receiver_email.as_ref().map(|u| u.as_str().to_string()),
                invitation.status.as_str(),
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Delete ephemeral invitations past their expiry. Permanent invitations
    /// are never swept. Returns the number of rows removed.
    pub fn delete_expired_invitations(&self, now: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM invitations
             WHERE link_type = 'ephemeral' AND expires_at IS NOT NULL AND expires_at < ?1",
            params![now.to_rfc3339()],
        )?;
        Ok(affected)
    }
}

/// Map a `rusqlite::Row` to an [`Invitation`].
fn row_to_invitation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Invitation> {
    let id_str: String = row.get(0)?;
    let sender: String = row.get(1)?;
    let receiver: Option<String> = row.get(2)?;
    let status_str: String = row.get(3)?;
    let link_type_str: String = row.get(4)?;
    let created_str: String = row.get(5)?;
    let expires_str: Option<String> = row.get(6)?;

    Ok(Invitation {
        id: sql::parse_uuid(0, &id_str)?,
        sender_email: sender.as_str().into(),
        receiver_email: receiver.map(|r| r.as_str().into()),
        status: sql::parse_enum(3, &status_str, InviteStatus::parse)?,
        link_type: sql::parse_enum(4, &link_type_str, LinkType::parse)?,
        created_at: sql::parse_ts(5, &created_str)?,
        expires_at: sql::parse_opt_ts(6, expires_str)?,
    })
}
