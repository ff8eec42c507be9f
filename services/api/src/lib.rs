//! Mentor API Library Crate
//!
//! This library contains all the logic for the Mentor web service: the
//! application state, REST handlers, WebSocket session handling, event
//! fan-out, and routing. The `bin/api.rs` binary is a thin wrapper around
//! this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod state;
pub mod ws;
