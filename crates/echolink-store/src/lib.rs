//! # echolink-store
//!
//! Durable store collaborator for the EchoLink signaling core, backed by
//! SQLite.  The core treats this crate as the source of truth on restart for
//! connection edges, invitations, chat messages, and call history; live
//! presence and call state deliberately do not survive a restart.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection` with typed CRUD helpers per domain model, plus an
//! async [`Store`] handle for shared access from concurrent event handlers.

pub mod calls;
pub mod database;
pub mod edges;
pub mod handle;
pub mod invitations;
pub mod messages;
pub mod migrations;
pub mod models;

mod error;
mod sql;

pub use database::Database;
pub use error::StoreError;
pub use handle::Store;
pub use models::*;
