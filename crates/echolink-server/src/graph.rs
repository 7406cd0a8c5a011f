//! Connection graph: the durable, symmetric "is-connected-to" relation.
//!
//! The graph is held in memory for membership queries on the hot path and
//! written through to the store so edges survive a process restart; the
//! in-memory maps are rebuilt from the store on startup.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use echolink_shared::error::{SignalError, SignalResult};
use echolink_shared::protocol::ContactEntry;
use echolink_shared::types::{EdgeStatus, LinkType, PairKey, UserId};
use echolink_store::{ConnectionEdge, Store, StoreError};

use crate::persist;
use crate::presence::PresenceRegistry;

#[derive(Default)]
struct GraphState {
    by_id: HashMap<Uuid, ConnectionEdge>,
    by_pair: HashMap<PairKey, Uuid>,
}

/// Symmetric connection relation between user identities.
#[derive(Clone)]
pub struct ConnectionGraph {
    state: Arc<RwLock<GraphState>>,
    store: Store,
}

impl ConnectionGraph {
    /// Rebuild the in-memory graph from the store's active edges.
    pub async fn load(store: Store) -> Result<Self, StoreError> {
        let mut state = GraphState::default();
        for edge in store.list_active_edges().await? {
            state.by_pair.insert(edge.pair(), edge.id);
            state.by_id.insert(edge.id, edge);
        }

        info!(edges = state.by_id.len(), "Connection graph loaded");

        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            store,
        })
    }

    /// Create an edge between two users.
    ///
    /// Idempotent at the caller boundary: re-adding an existing active edge
    /// reports [`SignalError::AlreadyConnected`] as a soft failure.
    pub async fn add_edge(
        &self,
        a: UserId,
        b: UserId,
        link_type: LinkType,
    ) -> SignalResult<ConnectionEdge> {
        if a == b {
            return Err(SignalError::Validation(
                "cannot connect a user to themselves".to_string(),
            ));
        }

        let edge = ConnectionEdge::new(a, b, link_type);
        let pair = edge.pair();

        {
            let mut state = self.state.write().await;
            if state.by_pair.contains_key(&pair) {
                return Err(SignalError::AlreadyConnected);
            }
            state.by_pair.insert(pair.clone(), edge.id);
            state.by_id.insert(edge.id, edge.clone());
        }

        let store = self.store.clone();
        let persisted = persist::with_retry("insert connection edge", || {
            let store = store.clone();
            let edge = edge.clone();
            async move { store.insert_edge(&edge).await }
        })
        .await;

        if let Err(e) = persisted {
            let mut state = self.state.write().await;
            state.by_pair.remove(&pair);
            state.by_id.remove(&edge.id);
            return Err(e);
        }

        info!(connection = %edge.id, pair = %pair, "Connection edge added");
        Ok(edge)
    }

    /// Remove the edge between two users. The trigger is asymmetric (either
    /// party may delete), the effect symmetric: both contact views update.
    pub async fn remove_edge(&self, a: &UserId, b: &UserId) -> SignalResult<ConnectionEdge> {
        let pair = PairKey::new(a.clone(), b.clone());

        let mut edge = {
            let mut state = self.state.write().await;
            let Some(id) = state.by_pair.remove(&pair) else {
                return Err(SignalError::NotConnected);
            };
            state.by_id.remove(&id).expect("pair index out of sync")
        };
        edge.status = EdgeStatus::Removed;

        let store = self.store.clone();
        let edge_id = edge.id;
        let persisted = persist::with_retry("remove connection edge", || {
            let store = store.clone();
            async move { store.set_edge_status(edge_id, EdgeStatus::Removed).await }
        })
        .await;

        if let Err(e) = persisted {
            let mut state = self.state.write().await;
            let mut restored = edge.clone();
            restored.status = EdgeStatus::Active;
            state.by_pair.insert(pair, restored.id);
            state.by_id.insert(restored.id, restored);
            return Err(e);
        }

        info!(connection = %edge.id, pair = %pair, "Connection edge removed");
        Ok(edge)
    }

    pub async fn are_connected(&self, a: &UserId, b: &UserId) -> bool {
        let pair = PairKey::new(a.clone(), b.clone());
        self.state.read().await.by_pair.contains_key(&pair)
    }

    /// The active edge between two users, if any.
    pub async fn edge_between(&self, a: &UserId, b: &UserId) -> Option<ConnectionEdge> {
        let pair = PairKey::new(a.clone(), b.clone());
        let state = self.state.read().await;
        let id = state.by_pair.get(&pair)?;
        state.by_id.get(id).cloned()
    }

    /// The active edge with this connection id, if any.
    pub async fn edge_by_id(&self, id: Uuid) -> Option<ConnectionEdge> {
        self.state.read().await.by_id.get(&id).cloned()
    }

    /// The user's contact list with live presence joined at query time,
    /// ordered by edge creation.
    pub async fn contacts_of(
        &self,
        user: &UserId,
        presence: &PresenceRegistry,
    ) -> Vec<ContactEntry> {
        let mut edges: Vec<ConnectionEdge> = {
            let state = self.state.read().await;
            state
                .by_id
                .values()
                .filter(|edge| edge.peer_of(user).is_some())
                .cloned()
                .collect()
        };
        edges.sort_by_key(|edge| edge.created_at);

        let mut contacts = Vec::with_capacity(edges.len());
        for edge in edges {
            let peer = edge.peer_of(user).expect("filtered above").clone();
            let is_online = presence.is_online(&peer).await;
            let last_seen = presence.last_seen(&peer).await;
            contacts.push(ContactEntry {
                email: peer,
                is_online,
                last_seen,
                connection_type: edge.link_type,
            });
        }
        contacts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionHandle;
    use std::time::Duration;

    async fn graph() -> ConnectionGraph {
        ConnectionGraph::load(Store::open_in_memory().unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn add_edge_is_symmetric() {
        let graph = graph().await;
        let a = UserId::from("a@x.com");
        let b = UserId::from("b@x.com");

        graph
            .add_edge(a.clone(), b.clone(), LinkType::Permanent)
            .await
            .unwrap();

        assert!(graph.are_connected(&a, &b).await);
        assert!(graph.are_connected(&b, &a).await);
    }

    #[tokio::test]
    async fn duplicate_add_is_soft_failure() {
        let graph = graph().await;
        let a = UserId::from("a@x.com");
        let b = UserId::from("b@x.com");

        graph
            .add_edge(a.clone(), b.clone(), LinkType::Permanent)
            .await
            .unwrap();
        let second = graph.add_edge(b, a, LinkType::Ephemeral).await;
        assert_eq!(second.unwrap_err(), SignalError::AlreadyConnected);
    }

    #[tokio::test]
    async fn self_edge_is_rejected() {
        let graph = graph().await;
        let a = UserId::from("a@x.com");
        let result = graph.add_edge(a.clone(), a, LinkType::Permanent).await;
        assert!(matches!(result, Err(SignalError::Validation(_))));
    }

    #[tokio::test]
    async fn remove_edge_updates_both_views() {
        let graph = graph().await;
        let a = UserId::from("a@x.com");
        let b = UserId::from("b@x.com");

        graph
            .add_edge(a.clone(), b.clone(), LinkType::Permanent)
            .await
            .unwrap();
        graph.remove_edge(&b, &a).await.unwrap();

        assert!(!graph.are_connected(&a, &b).await);
        assert!(!graph.are_connected(&b, &a).await);
        assert_eq!(
            graph.remove_edge(&a, &b).await.unwrap_err(),
            SignalError::NotConnected
        );
    }

    #[tokio::test]
    async fn edges_survive_reload_from_store() {
        let store = Store::open_in_memory().unwrap();
        let a = UserId::from("a@x.com");
        let b = UserId::from("b@x.com");

        {
            let graph = ConnectionGraph::load(store.clone()).await.unwrap();
            graph
                .add_edge(a.clone(), b.clone(), LinkType::Permanent)
                .await
                .unwrap();
        }

        let reloaded = ConnectionGraph::load(store).await.unwrap();
        assert!(reloaded.are_connected(&a, &b).await);
    }

    #[tokio::test(start_paused = true)]
    async fn add_edge_rolls_back_when_the_store_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");
        let graph = ConnectionGraph::load(Store::open_at(&path).unwrap())
            .await
            .unwrap();

        // Sabotage the backing table through a second connection to the
        // same database file.
        let saboteur = echolink_store::Database::open_at(&path).unwrap();
        saboteur
            .conn()
            .execute_batch("DROP TABLE connection_edges")
            .unwrap();

        let a = UserId::from("a@x.com");
        let b = UserId::from("b@x.com");
        let result = graph
            .add_edge(a.clone(), b.clone(), LinkType::Permanent)
            .await;
        assert!(matches!(result, Err(SignalError::Persistence(_))));

        // The maps were rolled back: the pair reads as unconnected and a
        // retry is not short-circuited by the duplicate check.
        assert!(!graph.are_connected(&a, &b).await);
        let retry = graph.add_edge(a, b, LinkType::Permanent).await;
        assert!(matches!(retry, Err(SignalError::Persistence(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn remove_edge_rolls_back_when_the_store_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");
        let graph = ConnectionGraph::load(Store::open_at(&path).unwrap())
            .await
            .unwrap();

        let a = UserId::from("a@x.com");
        let b = UserId::from("b@x.com");
        graph
            .add_edge(a.clone(), b.clone(), LinkType::Permanent)
            .await
            .unwrap();

        let saboteur = echolink_store::Database::open_at(&path).unwrap();
        saboteur
            .conn()
            .execute_batch("DROP TABLE connection_edges")
            .unwrap();

        let result = graph.remove_edge(&a, &b).await;
        assert!(matches!(result, Err(SignalError::Persistence(_))));

        // The edge is back in both views.
        assert!(graph.are_connected(&a, &b).await);
        assert!(graph.edge_between(&a, &b).await.is_some());
    }

    #[tokio::test]
    async fn contacts_join_live_presence() {
        let graph = graph().await;
        let (presence, _rx) = PresenceRegistry::new(Duration::from_secs(5));
        let a = UserId::from("a@x.com");
        let b = UserId::from("b@x.com");
        let c = UserId::from("c@x.com");

        graph
            .add_edge(a.clone(), b.clone(), LinkType::Permanent)
            .await
            .unwrap();
        graph
            .add_edge(a.clone(), c.clone(), LinkType::Ephemeral)
            .await
            .unwrap();

        let (session, _out) = SessionHandle::new();
        presence.register(b.clone(), session).await;

        let contacts = graph.contacts_of(&a, &presence).await;
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].email, b);
        assert!(contacts[0].is_online);
        assert_eq!(contacts[1].email, c);
        assert!(!contacts[1].is_online);

        // Both sides see the edge.
        let contacts = graph.contacts_of(&b, &presence).await;
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].email, a);
    }
}
