//! Domain model structs persisted in the SQLite database.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use echolink_shared::types::{
    CallState, CallType, EdgeStatus, InviteStatus, LinkType, PairKey, UserId,
};

// ---------------------------------------------------------------------------
// Invitation
// ---------------------------------------------------------------------------

/// A shareable invitation token. Accepting one yields a connection edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Invitation {
    /// The opaque token embedded in the shareable link.
    pub id: Uuid,
    pub sender_email: UserId,
    /// Unknown until the invitation is accepted.
    pub receiver_email: Option<UserId>,
    pub status: InviteStatus,
    pub link_type: LinkType,
    pub created_at: DateTime<Utc>,
    /// `None` iff the invitation is permanent.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Invitation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now > expires_at,
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Connection edge
// ---------------------------------------------------------------------------

/// A symmetric "is-connected-to" relation between two user identities.
///
/// `user_a`/`user_b` are stored in sorted order so the unordered pair has a
/// single canonical row.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionEdge {
    /// The connection id clients address messages and calls to.
    pub id: Uuid,
    pub user_a: UserId,
    pub user_b: UserId,
    pub link_type: LinkType,
    pub status: EdgeStatus,
    pub created_at: DateTime<Utc>,
}

impl ConnectionEdge {
    pub fn new(a: UserId, b: UserId, link_type: LinkType) -> Self {
        let pair = PairKey::new(a, b);
        let (first, second) = pair.users();
        Self {
            id: Uuid::new_v4(),
            user_a: first.clone(),
            user_b: second.clone(),
            link_type,
            status: EdgeStatus::Active,
            created_at: Utc::now(),
        }
    }

    pub fn pair(&self) -> PairKey {
        PairKey::new(self.user_a.clone(), self.user_b.clone())
    }

    /// The counterpart of `user` on this edge, if `user` is a member.
    pub fn peer_of(&self, user: &UserId) -> Option<&UserId> {
        if &self.user_a == user {
            Some(&self.user_b)
        } else if &self.user_b == user {
            Some(&self.user_a)
        } else {
            None
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == EdgeStatus::Active
    }
}

// ---------------------------------------------------------------------------
// Chat message
// ---------------------------------------------------------------------------

/// A single chat message. Immutable once created except for the soft-delete
/// flag.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub sender_email: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub deleted: bool,
}

// ---------------------------------------------------------------------------
// Call record
// ---------------------------------------------------------------------------

/// One recorded call session. Only terminal sessions (ended or rejected)
/// are written to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub id: Uuid,
    pub caller: UserId,
    pub callee: UserId,
    pub call_type: CallType,
    pub state: CallState,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    /// Email of the party that ended the call, or `"system"` for
    /// disconnect-driven teardown.
    pub ended_by: Option<String>,
}

impl CallRecord {
    /// The counterpart of `user` in this call, falling back to the callee
    /// when `user` was neither party.
    pub fn peer_of(&self, user: &UserId) -> &UserId {
        if &self.caller == user {
            &self.callee
        } else {
            &self.caller
        }
    }
}
