//! Invitation manager: shareable, time-boxed tokens that become connection
//! edges when accepted.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use echolink_shared::error::{SignalError, SignalResult};
use echolink_shared::types::{InviteStatus, LinkType, UserId};
use echolink_store::{Invitation, Store, StoreError};

use crate::graph::ConnectionGraph;
use crate::persist;

const EPHEMERAL_TTL_HOURS: i64 = 24;

/// Creates, resolves, and accepts invitation tokens.
///
/// Acceptance only mutates the invitation; creating the resulting graph edge
/// is orchestrated by the event router.
#[derive(Clone)]
pub struct InvitationManager {
    store: Store,
    graph: ConnectionGraph,
    /// Serializes accept check-then-act so two simultaneous accepts cannot
    /// both pass the pending check.
    accept_lock: Arc<Mutex<()>>,
}

impl InvitationManager {
    pub fn new(store: Store, graph: ConnectionGraph) -> Self {
        Self {
            store,
            graph,
            accept_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Create a new pending invitation.
    ///
    /// Fails with [`SignalError::AlreadyConnected`] when the receiver is
    /// known up front and an active edge already exists. Ephemeral
    /// invitations expire 24 hours from creation; permanent ones never do.
    pub async fn create(
        &self,
        sender: UserId,
        receiver: Option<UserId>,
        link_type: LinkType,
    ) -> SignalResult<Invitation> {
        if sender.as_str().is_empty() {
            return Err(SignalError::Validation("senderEmail is required".to_string()));
        }
        if let Some(receiver) = &receiver {
            if receiver == &sender {
                return Err(SignalError::Validation(
                    "cannot invite yourself".to_string(),
                ));
            }
            if self.graph.are_connected(&sender, receiver).await {
                return Err(SignalError::AlreadyConnected);
            }
        }

        let now = Utc::now();
        let expires_at = match link_type {
            LinkType::Ephemeral => Some(now + Duration::hours(EPHEMERAL_TTL_HOURS)),
            LinkType::Permanent => None,
        };
        let invitation = Invitation {
            id: Uuid::new_v4(),
            sender_email: sender,
            receiver_email: receiver,
            status: InviteStatus::Pending,
            link_type,
            created_at: now,
            expires_at,
        };

        let store = self.store.clone();
        persist::with_retry("insert invitation", || {
            let store = store.clone();
            let invitation = invitation.clone();
            async move { store.insert_invitation(&invitation).await }
        })
        .await?;

        info!(
            invitation = %invitation.id,
            sender = %invitation.sender_email,
            link_type = invitation.link_type.as_str(),
            "Invitation created"
        );
        Ok(invitation)
    }

    /// Look up an invitation by token. Expired ephemeral invitations are
    /// indistinguishable from absent ones.
    pub async fn resolve(&self, id: Uuid) -> SignalResult<Invitation> {
        let invitation = match self.store.get_invitation(id).await {
            Ok(invitation) => invitation,
            Err(StoreError::NotFound) => return Err(SignalError::NotFound("invitation")),
            Err(e) => return Err(SignalError::Persistence(e.to_string())),
        };

        if invitation.is_expired(Utc::now()) {
            return Err(SignalError::NotFound("invitation"));
        }
        Ok(invitation)
    }

    /// Accept a pending invitation on behalf of `receiver`.
    ///
    /// The connected check runs again here to close the race between
    /// `create` and `accept`; a concurrent duplicate accept observes
    /// [`SignalError::AlreadyProcessed`].
    pub async fn accept(&self, id: Uuid, receiver: UserId) -> SignalResult<Invitation> {
        if receiver.as_str().is_empty() {
            return Err(SignalError::Validation(
                "receiverEmail is required".to_string(),
            ));
        }

        let _guard = self.accept_lock.lock().await;

        let mut invitation = self.resolve(id).await?;
        if invitation.status == InviteStatus::Accepted {
            return Err(SignalError::AlreadyProcessed);
        }
        if receiver == invitation.sender_email {
            return Err(SignalError::Validation(
                "cannot accept your own invitation".to_string(),
            ));
        }
        if self
            .graph
            .are_connected(&invitation.sender_email, &receiver)
            .await
        {
            return Err(SignalError::AlreadyConnected);
        }

        invitation.status = InviteStatus::Accepted;
        invitation.receiver_email = Some(receiver);

        let store = self.store.clone();
        persist::with_retry("accept invitation", || {
            let store = store.clone();
            let invitation = invitation.clone();
            async move { store.update_invitation(&invitation).await }
        })
        .await?;

        info!(
            invitation = %invitation.id,
            sender = %invitation.sender_email,
            receiver = ?invitation.receiver_email,
            "Invitation accepted"
        );
        Ok(invitation)
    }

    /// Spawn the periodic sweep of expired ephemeral invitations.
    pub fn spawn_sweeper(&self, every: StdDuration) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The immediate first tick doubles as a startup sweep.
            loop {
                interval.tick().await;
                match store.delete_expired_invitations(Utc::now()).await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "Swept expired invitations"),
                    Err(e) => warn!(error = %e, "Invitation sweep failed"),
                }
            }
        })
    }
}
