//! Event router: dispatches inbound client events to the presence, graph,
//! invitation, call, and relay components, and fans the resulting
//! notifications out to the affected sessions.
//!
//! Handler failures never tear down a session: the error is reported back to
//! the originating session as an `error` event and the session keeps going.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use echolink_shared::error::{SignalError, SignalResult};
use echolink_shared::protocol::{CallHistoryEntry, ClientEvent, ServerEvent};
use echolink_shared::types::{CallType, LinkType, UserId};
use echolink_store::{CallRecord, Store, StoreError};

use crate::calls::{CallSessionManager, ENDED_BY_SYSTEM};
use crate::config::ServerConfig;
use crate::graph::ConnectionGraph;
use crate::invites::InvitationManager;
use crate::presence::{Eviction, PresenceRegistry};
use crate::relay::MessageRelay;
use crate::session::SessionHandle;

const CALL_HISTORY_LIMIT: u32 = 50;

/// The signaling core. One instance per process, shared by all transport
/// sessions.
pub struct EventRouter {
    config: ServerConfig,
    presence: PresenceRegistry,
    graph: ConnectionGraph,
    invites: InvitationManager,
    calls: CallSessionManager,
    relay: MessageRelay,
}

impl EventRouter {
    /// Build the router, rebuilding the connection graph from the store and
    /// wiring the presence eviction stream into call teardown.
    pub async fn new(store: Store, config: ServerConfig) -> Result<Arc<Self>, StoreError> {
        let graph = ConnectionGraph::load(store.clone()).await?;
        let (presence, evictions) = PresenceRegistry::new(config.grace_period);

        let router = Arc::new(Self {
            invites: InvitationManager::new(store.clone(), graph.clone()),
            calls: CallSessionManager::new(store.clone()),
            relay: MessageRelay::new(store, graph.clone(), config.dedup_window),
            presence,
            graph,
            config,
        });

        tokio::spawn(Self::run_eviction_loop(Arc::clone(&router), evictions));
        Ok(router)
    }

    /// Spawn the periodic maintenance tasks (invitation sweep, dedup prune).
    pub fn spawn_background_tasks(&self) {
        self.invites.spawn_sweeper(self.config.sweep_interval);
        self.relay.spawn_pruner(self.config.dedup_window);
    }

    /// Transport hook: a session's underlying channel closed. Starts the
    /// grace window; eviction (and its notifications) follow only if no
    /// re-registration arrives in time.
    pub async fn on_disconnect(&self, session_id: Uuid) {
        if let Some(user) = self.presence.user_of(session_id).await {
            debug!(user = %user, session = %session_id, "Session disconnected");
            self.presence.mark_disconnected(&user, session_id).await;
        }
    }

    /// Dispatch one inbound event from `session`. Errors are reported back
    /// to the session, never propagated to the transport.
    pub async fn handle_event(&self, session: &SessionHandle, event: ClientEvent) {
        if let Some(user) = self.presence.user_of(session.id()).await {
            self.presence.touch(&user).await;
        }

        let result = match event {
            ClientEvent::RegisterUser { user_email } => {
                self.register_user(session, user_email).await
            }
            ClientEvent::JoinConnection {
                connection_id,
                user_email,
            } => self.join_connection(connection_id, &user_email).await,
            ClientEvent::SendMessage {
                connection_id,
                message,
                sender_email,
            } => {
                self.send_message(session, connection_id, sender_email, message)
                    .await
            }
            ClientEvent::StartCall {
                user_email,
                other_user_email,
                call_type,
                ..
            } => {
                self.start_call(session, user_email, other_user_email, call_type)
                    .await
            }
            ClientEvent::AnswerCall { call_id, .. } => self.answer_call(call_id).await,
            ClientEvent::RejectCall { call_id, .. } => self.reject_call(call_id).await,
            ClientEvent::EndCall {
                to_user, call_id, ..
            } => self.end_call(session, to_user, call_id).await,
            ClientEvent::WebrtcOffer { to_user, payload } => {
                self.forward_signaling(session, to_user, |from| ServerEvent::WebrtcOffer {
                    from,
                    payload,
                })
                .await
            }
            ClientEvent::WebrtcAnswer { to_user, payload } => {
                self.forward_signaling(session, to_user, |from| ServerEvent::WebrtcAnswer {
                    from,
                    payload,
                })
                .await
            }
            ClientEvent::IceCandidate { to_user, payload } => {
                self.forward_signaling(session, to_user, |from| ServerEvent::IceCandidate {
                    from,
                    payload,
                })
                .await
            }
            ClientEvent::CreateInvitation {
                sender_email,
                receiver_email,
                link_type,
            } => {
                self.create_invitation(session, sender_email, receiver_email, link_type)
                    .await
            }
            ClientEvent::AcceptInvitation {
                invitation_id,
                receiver_email,
            } => self.accept_invitation(invitation_id, receiver_email).await,
            ClientEvent::DeleteMessage { message_id, .. } => {
                self.delete_message(session, message_id).await
            }
        };

        if let Err(e) = result {
            warn!(session = %session.id(), error = %e, "Event handling failed");
            session.send(ServerEvent::Error {
                message: e.to_string(),
            });
        }
    }

    pub fn graph(&self) -> &ConnectionGraph {
        &self.graph
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub async fn online_users(&self) -> usize {
        self.presence.online_count().await
    }

    pub async fn live_calls(&self) -> usize {
        self.calls.live_count().await
    }

    // ------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------

    /// Bind the identity to this session and replay its world: contact list
    /// with live presence, and recent call history. Contacts are told the
    /// user came online only on a genuinely new binding; a reconnect inside
    /// the grace window stays silent because no offline notice ever went out.
    async fn register_user(&self, session: &SessionHandle, user: UserId) -> SignalResult<()> {
        if user.as_str().is_empty() {
            return Err(SignalError::Validation("userEmail is required".to_string()));
        }

        let prior = self.presence.register(user.clone(), session.clone()).await;

        let contacts = self.graph.contacts_of(&user, &self.presence).await;
        session.send(ServerEvent::ContactsUpdated(contacts.clone()));
        session.send(ServerEvent::CallHistoryUpdated(
            self.call_history_entries(&user).await?,
        ));

        if prior.is_none() {
            for contact in &contacts {
                if let Some(peer_session) = self.presence.lookup(&contact.email).await {
                    peer_session.send(ServerEvent::UserStatusChanged {
                        email: user.clone(),
                        is_online: true,
                        last_seen: None,
                    });
                }
            }
        }
        Ok(())
    }

    /// Validate that the user is a member of the connection it wants to
    /// exchange messages on, and let the counterpart know it showed up.
    async fn join_connection(&self, connection_id: Uuid, user: &UserId) -> SignalResult<()> {
        let edge = self
            .graph
            .edge_by_id(connection_id)
            .await
            .ok_or(SignalError::NotFound("connection"))?;
        let peer = edge.peer_of(user).ok_or(SignalError::NotConnected)?;

        if let Some(peer_session) = self.presence.lookup(peer).await {
            peer_session.send(ServerEvent::UserStatusChanged {
                email: user.clone(),
                is_online: self.presence.is_online(user).await,
                last_seen: self.presence.last_seen(user).await,
            });
        }
        debug!(connection = %connection_id, user = %user, "Joined connection");
        Ok(())
    }

    /// Store the message, ack the sender, and deliver to the peer if online.
    /// A dedup hit still acks (the client's retry wants its receipt) but is
    /// not delivered a second time.
    async fn send_message(
        &self,
        session: &SessionHandle,
        connection_id: Uuid,
        sender: UserId,
        body: String,
    ) -> SignalResult<()> {
        let delivery = self.relay.send(connection_id, sender, body).await?;

        session.send(ServerEvent::MessageSent {
            id: delivery.message.id,
            message: delivery.message.body.clone(),
            timestamp: delivery.message.created_at,
        });

        if !delivery.duplicate {
            if let Some(peer_session) = self.presence.lookup(&delivery.peer).await {
                peer_session.send(ServerEvent::ReceiveMessage {
                    id: delivery.message.id,
                    sender_email: delivery.message.sender_email.clone(),
                    message: delivery.message.body,
                    timestamp: delivery.message.created_at,
                });
            }
        }
        Ok(())
    }

    /// The connection id recorded on the call comes from the actual edge
    /// between the two users, not from the client's payload.
    async fn start_call(
        &self,
        session: &SessionHandle,
        caller: UserId,
        callee: UserId,
        call_type: CallType,
    ) -> SignalResult<()> {
        let edge = self
            .graph
            .edge_between(&caller, &callee)
            .await
            .ok_or(SignalError::NotConnected)?;

        let call = self
            .calls
            .start(caller, callee, edge.id, call_type, &self.presence)
            .await?;

        if let Some(callee_session) = self.presence.lookup(&call.callee).await {
            callee_session.send(ServerEvent::IncomingCall {
                from: call.caller.clone(),
                call_type: call.call_type,
                connection_id: call.connection_id,
                call_id: call.id,
            });
        }
        session.send(ServerEvent::CallInitiated {
            connection_id: call.connection_id,
            call_id: call.id,
            to: call.callee,
        });
        Ok(())
    }

    /// Both parties learn the call was answered; the answer timestamp is the
    /// duration baseline from here on.
    async fn answer_call(&self, call_id: Uuid) -> SignalResult<()> {
        let call = self.calls.answer(call_id).await?;
        for user in [&call.caller, &call.callee] {
            if let Some(peer_session) = self.presence.lookup(user).await {
                peer_session.send(ServerEvent::CallAnswered {
                    connection_id: call.connection_id,
                    call_id: call.id,
                });
            }
        }
        Ok(())
    }

    async fn reject_call(&self, call_id: Uuid) -> SignalResult<()> {
        let record = self.calls.reject(call_id).await?;
        if let Some(caller_session) = self.presence.lookup(&record.caller).await {
            caller_session.send(ServerEvent::CallRejected { call_id: record.id });
        }
        self.push_call_history(&record).await;
        Ok(())
    }

    async fn end_call(
        &self,
        session: &SessionHandle,
        to_user: UserId,
        call_id: Uuid,
    ) -> SignalResult<()> {
        // Attribute the hangup to the session's identity; fall back to the
        // call pair when the session never registered.
        let ended_by = match self.presence.user_of(session.id()).await {
            Some(user) => user,
            None => {
                let call = self
                    .calls
                    .get(call_id)
                    .await
                    .ok_or(SignalError::NotFound("call"))?;
                call.pair().other(&to_user).cloned().ok_or_else(|| {
                    SignalError::Validation("toUser is not part of this call".to_string())
                })?
            }
        };

        let record = self.calls.end(call_id, &ended_by).await?;
        self.notify_call_ended(&record, &ended_by).await;
        self.push_call_history(&record).await;
        Ok(())
    }

    /// Route opaque WebRTC signaling to the target identity. An offline
    /// target is dropped silently: SDP and ICE are only useful in the moment.
    async fn forward_signaling<F>(
        &self,
        session: &SessionHandle,
        to_user: UserId,
        build: F,
    ) -> SignalResult<()>
    where
        F: FnOnce(UserId) -> ServerEvent,
    {
        let Some(from) = self.presence.user_of(session.id()).await else {
            return Err(SignalError::Validation(
                "session is not registered".to_string(),
            ));
        };
        match self.presence.lookup(&to_user).await {
            Some(target) => target.send(build(from)),
            None => debug!(to = %to_user, "Dropping signaling for offline target"),
        }
        Ok(())
    }

    async fn create_invitation(
        &self,
        session: &SessionHandle,
        sender: UserId,
        receiver: Option<UserId>,
        link_type: LinkType,
    ) -> SignalResult<()> {
        let invitation = self.invites.create(sender, receiver, link_type).await?;
        session.send(ServerEvent::InvitationCreated {
            invitation_id: invitation.id,
            link_type: invitation.link_type,
            expires_at: invitation.expires_at,
        });
        Ok(())
    }

    /// Accept an invitation and materialize the connection edge, then bring
    /// both parties' views up to date.
    async fn accept_invitation(&self, invitation_id: Uuid, receiver: UserId) -> SignalResult<()> {
        let invitation = self.invites.accept(invitation_id, receiver.clone()).await?;
        let sender = invitation.sender_email.clone();

        let edge = self
            .graph
            .add_edge(sender.clone(), receiver.clone(), invitation.link_type)
            .await?;

        info!(
            connection = %edge.id,
            sender = %sender,
            receiver = %receiver,
            "Connection established from invitation"
        );

        if let Some(receiver_session) = self.presence.lookup(&receiver).await {
            receiver_session.send(ServerEvent::ConnectionEstablished {
                connection_id: edge.id,
                sender_email: sender.clone(),
                receiver_email: receiver.clone(),
            });
            receiver_session.send(ServerEvent::ContactsUpdated(
                self.graph.contacts_of(&receiver, &self.presence).await,
            ));
        }
        if let Some(sender_session) = self.presence.lookup(&sender).await {
            sender_session.send(ServerEvent::RequestAccepted {
                connection_id: edge.id,
                receiver_email: receiver.clone(),
                message: format!("{receiver} accepted your invitation"),
            });
            sender_session.send(ServerEvent::ContactsUpdated(
                self.graph.contacts_of(&sender, &self.presence).await,
            ));
        }
        Ok(())
    }

    /// Soft-delete one of the session identity's own messages and tell both
    /// connection members to drop it from view.
    async fn delete_message(&self, session: &SessionHandle, message_id: Uuid) -> SignalResult<()> {
        let Some(requester) = self.presence.user_of(session.id()).await else {
            return Err(SignalError::Validation(
                "session is not registered".to_string(),
            ));
        };

        let message = self.relay.soft_delete(message_id, &requester).await?;

        let notice = ServerEvent::MessageDeleted {
            message_id: message.id,
            connection_id: message.connection_id,
        };
        match self.graph.edge_by_id(message.connection_id).await {
            Some(edge) => {
                for user in [&edge.user_a, &edge.user_b] {
                    if let Some(member_session) = self.presence.lookup(user).await {
                        member_session.send(notice.clone());
                    }
                }
            }
            // Edge already removed; the requester still gets its confirmation.
            None => session.send(notice),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Eviction handling
    // ------------------------------------------------------------------

    async fn run_eviction_loop(
        router: Arc<Self>,
        mut evictions: mpsc::UnboundedReceiver<Eviction>,
    ) {
        while let Some(eviction) = evictions.recv().await {
            router.handle_eviction(eviction).await;
        }
    }

    /// An identity's grace window elapsed: end its live calls with
    /// `endedBy = "system"` and tell its online contacts it went offline.
    async fn handle_eviction(&self, eviction: Eviction) {
        let user = eviction.user;
        info!(user = %user, "Handling presence eviction");

        for record in self.calls.end_all_for(&user).await {
            let survivor = record.peer_of(&user).clone();
            if let Some(peer_session) = self.presence.lookup(&survivor).await {
                peer_session.send(ServerEvent::CallEnded {
                    from: user.clone(),
                    call_id: record.id,
                    duration: record.duration_secs.unwrap_or(0),
                    ended_by: ENDED_BY_SYSTEM.to_string(),
                });
            }
            self.push_call_history(&record).await;
        }

        for contact in self.graph.contacts_of(&user, &self.presence).await {
            if let Some(peer_session) = self.presence.lookup(&contact.email).await {
                peer_session.send(ServerEvent::UserStatusChanged {
                    email: user.clone(),
                    is_online: false,
                    last_seen: Some(eviction.last_seen),
                });
            }
        }
    }

    // ------------------------------------------------------------------
    // Notification helpers
    // ------------------------------------------------------------------

    async fn notify_call_ended(&self, record: &CallRecord, ended_by: &UserId) {
        let event = ServerEvent::CallEnded {
            from: ended_by.clone(),
            call_id: record.id,
            duration: record.duration_secs.unwrap_or(0),
            ended_by: ended_by.as_str().to_string(),
        };
        for user in [&record.caller, &record.callee] {
            if let Some(peer_session) = self.presence.lookup(user).await {
                peer_session.send(event.clone());
            }
        }
    }

    /// Refresh both participants' call history views after a terminal
    /// transition. Best effort; a history read failure only costs the
    /// refresh.
    async fn push_call_history(&self, record: &CallRecord) {
        for user in [&record.caller, &record.callee] {
            if let Some(peer_session) = self.presence.lookup(user).await {
                match self.call_history_entries(user).await {
                    Ok(entries) => peer_session.send(ServerEvent::CallHistoryUpdated(entries)),
                    Err(e) => warn!(user = %user, error = %e, "Call history refresh failed"),
                }
            }
        }
    }

    async fn call_history_entries(&self, user: &UserId) -> SignalResult<Vec<CallHistoryEntry>> {
        let records = self.calls.history_for(user, CALL_HISTORY_LIMIT).await?;
        Ok(records
            .into_iter()
            .map(|record| CallHistoryEntry {
                call_id: record.id,
                peer: record.peer_of(user).clone(),
                call_type: record.call_type,
                state: record.state,
                started_at: record.started_at,
                duration: record.duration_secs.unwrap_or(0),
                ended_by: record.ended_by,
            })
            .collect())
    }
}
