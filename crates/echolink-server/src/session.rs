//! Transport session handles.
//!
//! The core never touches sockets: a [`SessionHandle`] is the "send event E
//! to user U" primitive the transport layer hands in when a duplex channel
//! opens. Outbound events flow through a bounded mpsc channel drained by the
//! transport's writer task.

use tokio::sync::mpsc;
use uuid::Uuid;

use echolink_shared::protocol::ServerEvent;

const OUTBOUND_BUFFER: usize = 256;

/// One live transport channel, addressable by the core.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    tx: mpsc::Sender<ServerEvent>,
}

impl SessionHandle {
    /// Create a handle plus the receiver its transport writer drains.
    pub fn new() -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue an outbound event for this session.
    ///
    /// A full buffer means the client is not draining its socket; the event
    /// is dropped rather than letting one slow session stall the core.
    pub fn send(&self, event: ServerEvent) {
        if self.tx.try_send(event).is_err() {
            tracing::debug!(session = %self.id, "Dropping event for slow session");
        }
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SessionHandle {}

#[cfg(test)]
mod tests {
    use super::*;
    use echolink_shared::types::UserId;

    #[tokio::test]
    async fn send_reaches_receiver() {
        let (session, mut rx) = SessionHandle::new();
        session.send(ServerEvent::Error {
            message: "boom".to_string(),
        });

        match rx.recv().await {
            Some(ServerEvent::Error { message }) => assert_eq!(message, "boom"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_buffer_drops_instead_of_blocking() {
        let (session, _rx) = SessionHandle::new();
        // Never drained; must not block or panic.
        for _ in 0..(OUTBOUND_BUFFER + 10) {
            session.send(ServerEvent::UserStatusChanged {
                email: UserId::from("a@x.com"),
                is_online: true,
                last_seen: None,
            });
        }
    }
}
