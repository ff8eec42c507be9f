//! WebSocket Session Management
//!
//! This module contains the real-time side of the service, structured into
//! submodules:
//!
//! - `protocol`: the JSON-based message format between client and server.
//! - `registry`: bookkeeping of live connections per user, with heartbeats.
//! - `fanout`: best-effort delivery of events to every session of a user.
//! - `session`: the WebSocket connection lifecycle, handshake to teardown.
//! - `cycle`: the message cycle — quota gate, completion call, action
//!   extraction and execution.
//! - `voice`: glue between the socket and the voice chunk sequencer.

pub mod cycle;
pub mod fanout;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod voice;

pub use session::ws_handler;
