//! # echolink-shared
//!
//! Types shared between the EchoLink signaling core and its collaborators:
//! the wire-level event contract, domain newtypes and enums, and the
//! recoverable error taxonomy.

pub mod error;
pub mod protocol;
pub mod types;

pub use error::SignalError;
pub use types::{CallState, CallType, EdgeStatus, InviteStatus, LinkType, PairKey, UserId};
