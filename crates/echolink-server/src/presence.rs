//! Presence registry: identity -> live transport session bindings.
//!
//! Registration is last-writer-wins so a reconnect with a fresh session
//! silently supersedes the old binding. Disconnects do not evict
//! immediately: the binding is kept for a grace window (cancellable delayed
//! task keyed by identity + binding generation) so transport reconnect races
//! never produce false offline notifications or orphaned call teardown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tokio::task::AbortHandle;
use tracing::{debug, info};
use uuid::Uuid;

use echolink_shared::types::UserId;

use crate::session::SessionHandle;

/// Notice that an identity's grace window elapsed without re-registration.
/// The router reacts by ending the identity's live calls and notifying its
/// contacts.
#[derive(Debug)]
pub struct Eviction {
    pub user: UserId,
    pub last_seen: DateTime<Utc>,
}

struct Binding {
    handle: SessionHandle,
    last_seen: DateTime<Utc>,
    connected: bool,
    /// Bumped on every registration; a pending eviction task only fires if
    /// the generation it captured is still current.
    generation: u64,
    pending_eviction: Option<AbortHandle>,
}

/// Tracks which identities are reachable on which transport session.
#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<RwLock<HashMap<UserId, Binding>>>,
    evictions: mpsc::UnboundedSender<Eviction>,
    grace: Duration,
}

impl PresenceRegistry {
    /// Create a registry plus the receiver of settled evictions.
    pub fn new(grace: Duration) -> (Self, mpsc::UnboundedReceiver<Eviction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                inner: Arc::new(RwLock::new(HashMap::new())),
                evictions: tx,
                grace,
            },
            rx,
        )
    }

    /// Bind `user` to `handle`, replacing any existing binding
    /// (last-writer-wins; this models reconnect-with-new-session).
    ///
    /// Returns the prior session handle, if any, so the caller can decide
    /// whether to treat this as a genuine reconnect.
    pub async fn register(&self, user: UserId, handle: SessionHandle) -> Option<SessionHandle> {
        let mut inner = self.inner.write().await;
        match inner.get_mut(&user) {
            Some(binding) => {
                if let Some(pending) = binding.pending_eviction.take() {
                    pending.abort();
                }
                let prior = binding.handle.clone();
                binding.handle = handle;
                binding.last_seen = Utc::now();
                binding.connected = true;
                binding.generation += 1;
                debug!(user = %user, "Superseded existing session binding");
                Some(prior)
            }
            None => {
                inner.insert(
                    user.clone(),
                    Binding {
                        handle,
                        last_seen: Utc::now(),
                        connected: true,
                        generation: 0,
                        pending_eviction: None,
                    },
                );
                info!(user = %user, "User registered");
                None
            }
        }
    }

    /// Refresh the last-activity timestamp. Called on any inbound event from
    /// the identity's session.
    pub async fn touch(&self, user: &UserId) {
        if let Some(binding) = self.inner.write().await.get_mut(user) {
            binding.last_seen = Utc::now();
        }
    }

    /// Schedule eviction after the grace window, unless a newer session has
    /// already superseded the disconnecting one (then this is a no-op).
    pub async fn mark_disconnected(&self, user: &UserId, session_id: Uuid) {
        let mut inner = self.inner.write().await;
        let Some(binding) = inner.get_mut(user) else {
            return;
        };
        if binding.handle.id() != session_id {
            debug!(user = %user, "Stale disconnect ignored (session superseded)");
            return;
        }
        if !binding.connected {
            return;
        }

        binding.connected = false;
        binding.last_seen = Utc::now();
        let generation = binding.generation;

        let registry = self.clone();
        let user = user.clone();
        let grace = self.grace;
        let task = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            registry.finish_eviction(user, generation).await;
        });
        binding.pending_eviction = Some(task.abort_handle());
    }

    /// Evict the binding if the grace window elapsed without a newer
    /// registration. Emits an [`Eviction`] notice on success.
    async fn finish_eviction(&self, user: UserId, generation: u64) {
        let mut inner = self.inner.write().await;
        let evict = matches!(
            inner.get(&user),
            Some(binding) if !binding.connected && binding.generation == generation
        );
        if !evict {
            return;
        }

        let binding = inner.remove(&user).expect("checked above");
        drop(inner);

        info!(user = %user, "Presence evicted after grace window");
        // Receiver dropped only during shutdown.
        let _ = self.evictions.send(Eviction {
            user,
            last_seen: binding.last_seen,
        });
    }

    pub async fn is_online(&self, user: &UserId) -> bool {
        self.inner
            .read()
            .await
            .get(user)
            .map(|b| b.connected)
            .unwrap_or(false)
    }

    /// The live session handle for `user`, if it is currently reachable.
    /// Bindings inside the disconnect grace window are not routable.
    pub async fn lookup(&self, user: &UserId) -> Option<SessionHandle> {
        self.inner
            .read()
            .await
            .get(user)
            .filter(|b| b.connected)
            .map(|b| b.handle.clone())
    }

    pub async fn last_seen(&self, user: &UserId) -> Option<DateTime<Utc>> {
        self.inner.read().await.get(user).map(|b| b.last_seen)
    }

    /// Reverse lookup: which identity owns this transport session. Covers
    /// bindings inside the grace window too, so a disconnect can always be
    /// attributed.
    pub async fn user_of(&self, session_id: Uuid) -> Option<UserId> {
        self.inner
            .read()
            .await
            .iter()
            .find(|(_, b)| b.handle.id() == session_id)
            .map(|(user, _)| user.clone())
    }

    pub async fn online_count(&self) -> usize {
        self.inner.read().await.values().filter(|b| b.connected).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grace() -> Duration {
        Duration::from_secs(5)
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let (registry, _rx) = PresenceRegistry::new(grace());
        let (session, _out) = SessionHandle::new();
        let user = UserId::from("a@x.com");

        assert!(registry.register(user.clone(), session.clone()).await.is_none());
        assert!(registry.is_online(&user).await);
        assert_eq!(registry.lookup(&user).await.unwrap().id(), session.id());
        assert_eq!(registry.user_of(session.id()).await, Some(user));
    }

    #[tokio::test]
    async fn re_register_returns_prior_handle() {
        let (registry, _rx) = PresenceRegistry::new(grace());
        let (old, _o) = SessionHandle::new();
        let (new, _n) = SessionHandle::new();
        let user = UserId::from("a@x.com");

        registry.register(user.clone(), old.clone()).await;
        let prior = registry.register(user.clone(), new.clone()).await;
        assert_eq!(prior.unwrap().id(), old.id());
        assert_eq!(registry.lookup(&user).await.unwrap().id(), new.id());
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_fires_after_grace_window() {
        let (registry, mut rx) = PresenceRegistry::new(grace());
        let (session, _out) = SessionHandle::new();
        let user = UserId::from("a@x.com");

        registry.register(user.clone(), session.clone()).await;
        registry.mark_disconnected(&user, session.id()).await;
        assert!(!registry.is_online(&user).await);

        let eviction = rx.recv().await.expect("eviction notice");
        assert_eq!(eviction.user, user);
        assert!(registry.lookup(&user).await.is_none());
        assert!(registry.last_seen(&user).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_within_grace_cancels_eviction() {
        let (registry, mut rx) = PresenceRegistry::new(grace());
        let (old, _o) = SessionHandle::new();
        let user = UserId::from("a@x.com");

        registry.register(user.clone(), old.clone()).await;
        registry.mark_disconnected(&user, old.id()).await;

        // Reconnect with a fresh session before the window elapses.
        tokio::time::advance(Duration::from_secs(2)).await;
        let (new, _n) = SessionHandle::new();
        registry.register(user.clone(), new).await;

        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;

        assert!(registry.is_online(&user).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_disconnect_from_superseded_session_is_noop() {
        let (registry, mut rx) = PresenceRegistry::new(grace());
        let (old, _o) = SessionHandle::new();
        let (new, _n) = SessionHandle::new();
        let user = UserId::from("a@x.com");

        registry.register(user.clone(), old.clone()).await;
        registry.register(user.clone(), new).await;

        // The old transport reports its disconnect after the supersede.
        registry.mark_disconnected(&user, old.id()).await;
        assert!(registry.is_online(&user).await);

        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
        assert!(registry.is_online(&user).await);
    }
}
