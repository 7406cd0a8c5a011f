//! # echolink-server
//!
//! The real-time core of EchoLink: a signaling relay (not a media server)
//! that lets two registered parties form a mutual connection via a
//! shareable invitation, exchange text messages, and negotiate voice/video
//! calls whose SDP/ICE metadata is routed through the server.
//!
//! Components, leaf first:
//! - [`presence`]   -- identity -> live session bindings with grace-period
//!   eviction that absorbs transport reconnect races
//! - [`graph`]      -- the durable, symmetric "is-connected-to" relation
//! - [`invites`]    -- time-boxed invitation tokens that become graph edges
//! - [`calls`]      -- per-pair call state machine and duration accounting
//! - [`relay`]      -- chat message delivery with resend deduplication
//! - [`router`]     -- dispatches inbound events to the components above and
//!   fans out the outbound notifications
//! - [`transport`]  -- a line-delimited JSON TCP front-end standing in for
//!   the deployed duplex transport

pub mod calls;
pub mod config;
pub mod graph;
pub mod invites;
pub mod presence;
pub mod relay;
pub mod router;
pub mod session;
pub mod transport;

mod persist;

pub use config::ServerConfig;
pub use router::EventRouter;
pub use session::SessionHandle;
