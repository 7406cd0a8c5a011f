use thiserror::Error;

use crate::types::UserId;

/// Recoverable failures surfaced by the signaling core.
///
/// Every variant is converted by the event router into an `error`-tagged
/// outbound event addressed to the originating session only; none of them
/// crash the process.
#[derive(Debug, Error, PartialEq)]
pub enum SignalError {
    /// The referenced invitation, message, or call does not exist (or the
    /// invitation has expired).
    #[error("{0} not found")]
    NotFound(&'static str),

    /// An active connection edge already exists between the two users.
    #[error("users are already connected")]
    AlreadyConnected,

    /// The invitation was already accepted.
    #[error("invitation was already processed")]
    AlreadyProcessed,

    /// The callee has no live presence session.
    #[error("peer {0} is offline")]
    PeerOffline(UserId),

    /// A live call session already exists for this pair of users.
    #[error("a call is already in progress with this peer")]
    CallAlreadyInProgress,

    /// Out-of-order call state transition (stale or duplicate signal).
    #[error("invalid call state: {0}")]
    InvalidState(String),

    /// Messaging attempted without an active connection edge.
    #[error("users are not connected")]
    NotConnected,

    /// Missing or malformed required fields.
    #[error("validation error: {0}")]
    Validation(String),

    /// A durable-store write failed after bounded retries. The in-memory
    /// mutation has been rolled back by the time this is returned.
    #[error("persistence error: {0}")]
    Persistence(String),
}

/// Convenience alias used throughout the core.
pub type SignalResult<T> = std::result::Result<T, SignalError>;
