//! Call session manager: per-pair call state machine, duration accounting,
//! and call history recording.
//!
//! At most one live call session exists per unordered participant pair; the
//! check-then-create runs under the live table's write lock. Terminal
//! sessions are recorded to history and removed from live state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{error, info};
use uuid::Uuid;

use echolink_shared::error::{SignalError, SignalResult};
use echolink_shared::types::{CallState, CallType, PairKey, UserId};
use echolink_store::{CallRecord, Store};

use crate::persist;
use crate::presence::PresenceRegistry;

/// `endedBy` marker for disconnect-driven teardown.
pub const ENDED_BY_SYSTEM: &str = "system";

/// One live (non-terminal) call session.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub id: Uuid,
    pub caller: UserId,
    pub callee: UserId,
    pub connection_id: Uuid,
    pub call_type: CallType,
    pub state: CallState,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn pair(&self) -> PairKey {
        PairKey::new(self.caller.clone(), self.callee.clone())
    }

    /// Close out the session into a history record.
    ///
    /// Duration is measured from `answered_at`, not `started_at`: ring time
    /// is not talk time. A call that was never answered has duration 0.
    fn into_record(self, state: CallState, ended_by: String, now: DateTime<Utc>) -> CallRecord {
        let duration_secs = match state {
            CallState::Ended => self
                .answered_at
                .map(|answered| (now - answered).num_seconds().max(0))
                .unwrap_or(0),
            _ => 0,
        };
        CallRecord {
            id: self.id,
            caller: self.caller,
            callee: self.callee,
            call_type: self.call_type,
            state,
            started_at: self.started_at,
            answered_at: self.answered_at,
            ended_at: Some(now),
            duration_secs: Some(duration_secs),
            ended_by: Some(ended_by),
        }
    }
}

/// Owns the live call table and the history store access.
#[derive(Clone)]
pub struct CallSessionManager {
    live: Arc<RwLock<HashMap<PairKey, CallSession>>>,
    store: Store,
}

impl CallSessionManager {
    pub fn new(store: Store) -> Self {
        Self {
            live: Arc::new(RwLock::new(HashMap::new())),
            store,
        }
    }

    /// Begin a call. Fails with [`SignalError::PeerOffline`] when the callee
    /// has no live session and [`SignalError::CallAlreadyInProgress`] when
    /// the pair already has a live call.
    pub async fn start(
        &self,
        caller: UserId,
        callee: UserId,
        connection_id: Uuid,
        call_type: CallType,
        presence: &PresenceRegistry,
    ) -> SignalResult<CallSession> {
        if caller == callee {
            return Err(SignalError::Validation("cannot call yourself".to_string()));
        }
        if !presence.is_online(&callee).await {
            return Err(SignalError::PeerOffline(callee));
        }

        let pair = PairKey::new(caller.clone(), callee.clone());
        let session = CallSession {
            id: Uuid::new_v4(),
            caller,
            callee,
            connection_id,
            call_type,
            state: CallState::Initiated,
            started_at: Utc::now(),
            answered_at: None,
        };

        let mut live = self.live.write().await;
        if live.contains_key(&pair) {
            return Err(SignalError::CallAlreadyInProgress);
        }
        live.insert(pair, session.clone());
        drop(live);

        info!(
            call = %session.id,
            caller = %session.caller,
            callee = %session.callee,
            call_type = session.call_type.as_str(),
            "Call initiated"
        );
        Ok(session)
    }

    /// The live session with this call id, if any.
    pub async fn get(&self, call_id: Uuid) -> Option<CallSession> {
        self.live
            .read()
            .await
            .values()
            .find(|s| s.id == call_id)
            .cloned()
    }

    /// Transition INITIATED -> ANSWERED. Sets `answered_at`, the duration
    /// baseline. A stale or duplicate answer yields
    /// [`SignalError::InvalidState`], which is reported but not fatal.
    pub async fn answer(&self, call_id: Uuid) -> SignalResult<CallSession> {
        let mut live = self.live.write().await;
        let session = live
            .values_mut()
            .find(|s| s.id == call_id)
            .ok_or(SignalError::NotFound("call"))?;

        if session.state != CallState::Initiated {
            return Err(SignalError::InvalidState(format!(
                "cannot answer a call in state {}",
                session.state.as_str()
            )));
        }
        session.state = CallState::Answered;
        session.answered_at = Some(Utc::now());
        let session = session.clone();
        drop(live);

        info!(call = %session.id, "Call answered");
        Ok(session)
    }

    /// Transition INITIATED -> REJECTED. Records duration 0 and removes the
    /// live session.
    pub async fn reject(&self, call_id: Uuid) -> SignalResult<CallRecord> {
        let mut live = self.live.write().await;
        let pair = live
            .iter()
            .find(|(_, s)| s.id == call_id)
            .map(|(pair, _)| pair.clone())
            .ok_or(SignalError::NotFound("call"))?;

        if live[&pair].state != CallState::Initiated {
            return Err(SignalError::InvalidState(format!(
                "cannot reject a call in state {}",
                live[&pair].state.as_str()
            )));
        }
        let session = live.remove(&pair).expect("found above");
        drop(live);

        let ended_by = session.callee.as_str().to_string();
        let record = session.into_record(CallState::Rejected, ended_by, Utc::now());
        info!(call = %record.id, "Call rejected");
        self.record(&record).await;
        Ok(record)
    }

    /// Transition INITIATED or ANSWERED -> ENDED. Duration is
    /// `now - answered_at` (0 if never answered).
    pub async fn end(&self, call_id: Uuid, ended_by: &UserId) -> SignalResult<CallRecord> {
        let mut live = self.live.write().await;
        let pair = live
            .iter()
            .find(|(_, s)| s.id == call_id)
            .map(|(pair, _)| pair.clone())
            .ok_or(SignalError::NotFound("call"))?;

        if !pair.contains(ended_by) {
            return Err(SignalError::Validation(
                "only a participant may end a call".to_string(),
            ));
        }
        let session = live.remove(&pair).expect("found above");
        drop(live);

        let record =
            session.into_record(CallState::Ended, ended_by.as_str().to_string(), Utc::now());
        info!(
            call = %record.id,
            ended_by = %ended_by,
            duration = record.duration_secs,
            "Call ended"
        );
        self.record(&record).await;
        Ok(record)
    }

    /// End every live call naming `identity`, with `endedBy = "system"`.
    /// Invoked on disconnect grace-window expiry.
    pub async fn end_all_for(&self, identity: &UserId) -> Vec<CallRecord> {
        let sessions: Vec<CallSession> = {
            let mut live = self.live.write().await;
            let pairs: Vec<PairKey> = live
                .keys()
                .filter(|pair| pair.contains(identity))
                .cloned()
                .collect();
            pairs
                .into_iter()
                .filter_map(|pair| live.remove(&pair))
                .collect()
        };

        let now = Utc::now();
        let mut records = Vec::with_capacity(sessions.len());
        for session in sessions {
            let record = session.into_record(CallState::Ended, ENDED_BY_SYSTEM.to_string(), now);
            info!(call = %record.id, user = %identity, "Call ended by system on disconnect");
            self.record(&record).await;
            records.push(record);
        }
        records
    }

    /// Recorded call sessions naming `identity`, most recent first.
    pub async fn history_for(&self, identity: &UserId, limit: u32) -> SignalResult<Vec<CallRecord>> {
        self.store
            .call_history_for(identity, limit)
            .await
            .map_err(|e| SignalError::Persistence(e.to_string()))
    }

    pub async fn live_count(&self) -> usize {
        self.live.read().await.len()
    }

    /// Persist a terminal record. The live session is already gone either
    /// way: losing a history row beats resurrecting a dead call, so retry
    /// exhaustion is logged rather than propagated.
    async fn record(&self, record: &CallRecord) {
        let store = self.store.clone();
        let persisted = persist::with_retry("insert call record", || {
            let store = store.clone();
            let record = record.clone();
            async move { store.insert_call_record(&record).await }
        })
        .await;

        if let Err(e) = persisted {
            error!(call = %record.id, error = %e, "Call history record lost");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionHandle;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    async fn setup() -> (CallSessionManager, PresenceRegistry, Store) {
        let store = Store::open_in_memory().unwrap();
        let manager = CallSessionManager::new(store.clone());
        let (presence, _rx) = PresenceRegistry::new(Duration::from_secs(5));
        (manager, presence, store)
    }

    async fn bring_online(presence: &PresenceRegistry, user: &str) -> SessionHandle {
        let (session, _out) = SessionHandle::new();
        presence.register(user.into(), session.clone()).await;
        session
    }

    #[tokio::test]
    async fn start_requires_callee_online() {
        let (manager, presence, _store) = setup().await;
        bring_online(&presence, "a@x.com").await;

        let result = manager
            .start(
                "a@x.com".into(),
                "b@x.com".into(),
                Uuid::new_v4(),
                CallType::Voice,
                &presence,
            )
            .await;
        assert_eq!(result.unwrap_err(), SignalError::PeerOffline("b@x.com".into()));

        bring_online(&presence, "b@x.com").await;
        let session = manager
            .start(
                "a@x.com".into(),
                "b@x.com".into(),
                Uuid::new_v4(),
                CallType::Voice,
                &presence,
            )
            .await
            .unwrap();
        assert_eq!(session.state, CallState::Initiated);
    }

    #[tokio::test]
    async fn at_most_one_live_call_per_pair() {
        let (manager, presence, _store) = setup().await;
        bring_online(&presence, "a@x.com").await;
        bring_online(&presence, "b@x.com").await;

        manager
            .start(
                "a@x.com".into(),
                "b@x.com".into(),
                Uuid::new_v4(),
                CallType::Video,
                &presence,
            )
            .await
            .unwrap();

        // Same pair, either direction.
        let second = manager
            .start(
                "b@x.com".into(),
                "a@x.com".into(),
                Uuid::new_v4(),
                CallType::Voice,
                &presence,
            )
            .await;
        assert_eq!(second.unwrap_err(), SignalError::CallAlreadyInProgress);
    }

    #[tokio::test]
    async fn duplicate_answer_is_invalid_state() {
        let (manager, presence, _store) = setup().await;
        bring_online(&presence, "a@x.com").await;
        bring_online(&presence, "b@x.com").await;

        let session = manager
            .start(
                "a@x.com".into(),
                "b@x.com".into(),
                Uuid::new_v4(),
                CallType::Voice,
                &presence,
            )
            .await
            .unwrap();

        let answered = manager.answer(session.id).await.unwrap();
        assert_eq!(answered.state, CallState::Answered);
        assert!(answered.answered_at.is_some());

        assert!(matches!(
            manager.answer(session.id).await,
            Err(SignalError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn reject_records_zero_duration_and_clears_live_state() {
        let (manager, presence, store) = setup().await;
        bring_online(&presence, "a@x.com").await;
        bring_online(&presence, "b@x.com").await;

        let session = manager
            .start(
                "a@x.com".into(),
                "b@x.com".into(),
                Uuid::new_v4(),
                CallType::Voice,
                &presence,
            )
            .await
            .unwrap();

        let record = manager.reject(session.id).await.unwrap();
        assert_eq!(record.state, CallState::Rejected);
        assert_eq!(record.duration_secs, Some(0));
        assert_eq!(manager.live_count().await, 0);

        let history = store.call_history_for(&"b@x.com".into(), 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].ended_by.as_deref(), Some("b@x.com"));
    }

    #[tokio::test]
    async fn duration_baseline_is_answered_at_not_started_at() {
        let (manager, _presence, _store) = setup().await;
        let now = Utc::now();

        // Inject a session that rang for 70s and has been answered for 30s.
        let session = CallSession {
            id: Uuid::new_v4(),
            caller: "a@x.com".into(),
            callee: "b@x.com".into(),
            connection_id: Uuid::new_v4(),
            call_type: CallType::Video,
            state: CallState::Answered,
            started_at: now - ChronoDuration::seconds(100),
            answered_at: Some(now - ChronoDuration::seconds(30)),
        };
        manager
            .live
            .write()
            .await
            .insert(session.pair(), session.clone());

        let record = manager.end(session.id, &"a@x.com".into()).await.unwrap();
        let duration = record.duration_secs.unwrap();
        assert!((29..=31).contains(&duration), "duration was {duration}");
    }

    #[tokio::test]
    async fn end_before_answer_has_zero_duration() {
        let (manager, presence, _store) = setup().await;
        bring_online(&presence, "a@x.com").await;
        bring_online(&presence, "b@x.com").await;

        let session = manager
            .start(
                "a@x.com".into(),
                "b@x.com".into(),
                Uuid::new_v4(),
                CallType::Voice,
                &presence,
            )
            .await
            .unwrap();

        let record = manager.end(session.id, &"a@x.com".into()).await.unwrap();
        assert_eq!(record.state, CallState::Ended);
        assert_eq!(record.duration_secs, Some(0));
    }

    #[tokio::test]
    async fn end_all_for_records_system_teardown() {
        let (manager, presence, store) = setup().await;
        for user in ["a@x.com", "b@x.com", "c@x.com"] {
            bring_online(&presence, user).await;
        }

        manager
            .start(
                "a@x.com".into(),
                "b@x.com".into(),
                Uuid::new_v4(),
                CallType::Voice,
                &presence,
            )
            .await
            .unwrap();
        manager
            .start(
                "c@x.com".into(),
                "a@x.com".into(),
                Uuid::new_v4(),
                CallType::Video,
                &presence,
            )
            .await
            .unwrap();

        let records = manager.end_all_for(&"a@x.com".into()).await;
        assert_eq!(records.len(), 2);
        assert!(records
            .iter()
            .all(|r| r.ended_by.as_deref() == Some(ENDED_BY_SYSTEM)));
        assert_eq!(manager.live_count().await, 0);

        let history = store.call_history_for(&"a@x.com".into(), 10).await.unwrap();
        assert_eq!(history.len(), 2);
    }
}
