//! Signaling relay that pairs two peers per room and forwards their
//! coordination messages (session descriptions, candidates, chat and call
//! requests) until they can talk to each other directly.
//!
//! The core is the [`table::RoomTable`]: rooms of at most two clients, a
//! directory of every registered client, a queue for messages sent before the
//! second client arrives, and a registration timer that reclaims rooms whose
//! peer never shows up. Around it:
//!
//! - [`session`] runs the per-connection command state machine.
//! - [`socket`] and [`server`] are the WebSocket and admin HTTP boundary.
//! - [`message`] defines the JSON records exchanged with clients.
//! - [`dashboard`] keeps the counters reported on `GET /status`.
//! - [`cli`] and [`config`] turn command-line flags into a [`config::RelayConfig`].
//!
//! State is in memory only and does not survive a restart.

pub mod cli;
pub mod config;
pub mod connection;
pub mod dashboard;
pub mod directory;
pub mod error;
pub mod message;
pub mod room;
pub mod server;
pub mod session;
pub mod socket;
pub mod table;
pub mod timer;
