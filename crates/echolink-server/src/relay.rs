//! Message relay: durable chat messages scoped to a connection edge, with a
//! short dedup window absorbing client-side double sends.
//!
//! A repeat of the same body from the same sender on the same connection
//! within the window is answered with the original stored message and is
//! neither persisted nor delivered again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use echolink_shared::error::{SignalError, SignalResult};
use echolink_shared::types::UserId;
use echolink_store::{Store, StoredMessage};

use crate::graph::ConnectionGraph;
use crate::persist;

/// Outcome of a send: the stored message, the peer to deliver it to, and
/// whether it was absorbed by the dedup window.
#[derive(Debug)]
pub struct Delivery {
    pub message: StoredMessage,
    pub peer: UserId,
    pub duplicate: bool,
}

// The body is part of the key: a resend must match an earlier identical
// message even when other sends landed in between.
type DedupKey = (Uuid, UserId, String);

#[derive(Clone)]
pub struct MessageRelay {
    store: Store,
    graph: ConnectionGraph,
    dedup: Arc<RwLock<HashMap<DedupKey, (StoredMessage, Instant)>>>,
    window: StdDuration,
}

impl MessageRelay {
    pub fn new(store: Store, graph: ConnectionGraph, window: StdDuration) -> Self {
        Self {
            store,
            graph,
            dedup: Arc::new(RwLock::new(HashMap::new())),
            window,
        }
    }

    /// Store and address a message on `connection_id` from `sender`.
    ///
    /// The sender must be a member of the connection. Duplicates inside the
    /// window come back with `duplicate = true` and the original message so
    /// the sender still receives its ack.
    pub async fn send(
        &self,
        connection_id: Uuid,
        sender: UserId,
        body: String,
    ) -> SignalResult<Delivery> {
        if body.trim().is_empty() {
            return Err(SignalError::Validation("message body is empty".to_string()));
        }

        let edge = self
            .graph
            .edge_by_id(connection_id)
            .await
            .ok_or(SignalError::NotConnected)?;
        let peer = edge
            .peer_of(&sender)
            .ok_or(SignalError::NotConnected)?
            .clone();

        let key = (connection_id, sender.clone(), body.clone());
        let message = {
            let mut dedup = self.dedup.write().await;
            if let Some((prior, at)) = dedup.get(&key) {
                if at.elapsed() < self.window {
                    debug!(
                        connection = %connection_id,
                        sender = %sender,
                        message = %prior.id,
                        "Duplicate send absorbed"
                    );
                    return Ok(Delivery {
                        message: prior.clone(),
                        peer,
                        duplicate: true,
                    });
                }
            }

            let message = StoredMessage {
                id: Uuid::new_v4(),
                connection_id,
                sender_email: sender,
                body,
                created_at: Utc::now(),
                deleted: false,
            };
            dedup.insert(key.clone(), (message.clone(), Instant::now()));
            message
        };

        let store = self.store.clone();
        let persisted = persist::with_retry("insert message", || {
            let store = store.clone();
            let message = message.clone();
            async move { store.insert_message(&message).await }
        })
        .await;

        if let Err(e) = persisted {
            // Do not let an unstored message suppress a retry from the client.
            self.dedup.write().await.remove(&key);
            return Err(e);
        }

        Ok(Delivery {
            message,
            peer,
            duplicate: false,
        })
    }

    /// Soft-delete a message. Only its sender may delete it; the row is kept
    /// with a tombstone so history queries skip it.
    pub async fn soft_delete(
        &self,
        message_id: Uuid,
        requester: &UserId,
    ) -> SignalResult<StoredMessage> {
        let message = match self.store.get_message(message_id).await {
            Ok(message) => message,
            Err(echolink_store::StoreError::NotFound) => {
                return Err(SignalError::NotFound("message"))
            }
            Err(e) => return Err(SignalError::Persistence(e.to_string())),
        };

        if &message.sender_email != requester {
            return Err(SignalError::Validation(
                "only the sender may delete a message".to_string(),
            ));
        }
        if message.deleted {
            return Err(SignalError::AlreadyProcessed);
        }

        let store = self.store.clone();
        persist::with_retry("delete message", || {
            let store = store.clone();
            async move { store.set_message_deleted(message_id).await }
        })
        .await?;

        info!(message = %message_id, sender = %requester, "Message deleted");
        Ok(message)
    }

    /// Undeleted messages on a connection in send order. The requester must
    /// be a member.
    pub async fn history(
        &self,
        connection_id: Uuid,
        requester: &UserId,
    ) -> SignalResult<Vec<StoredMessage>> {
        let edge = self
            .graph
            .edge_by_id(connection_id)
            .await
            .ok_or(SignalError::NotConnected)?;
        if edge.peer_of(requester).is_none() {
            return Err(SignalError::NotConnected);
        }

        self.store
            .messages_for_connection(connection_id)
            .await
            .map_err(|e| SignalError::Persistence(e.to_string()))
    }

    /// Spawn the periodic sweep of dedup entries older than the window.
    pub fn spawn_pruner(&self, every: StdDuration) -> tokio::task::JoinHandle<()> {
        let relay = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                relay.prune_stale().await;
            }
        })
    }

    async fn prune_stale(&self) {
        let window = self.window;
        let mut dedup = self.dedup.write().await;
        dedup.retain(|_, (_, at)| at.elapsed() < window);
    }

    #[cfg(test)]
    async fn dedup_len(&self) -> usize {
        self.dedup.read().await.len()
    }
}
