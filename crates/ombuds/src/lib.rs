//! ombud relay daemon — stateful WebSocket chat relay.
//!
//! Clients authenticate in-band with a signed token; plain users talk to
//! a canned bot responder until a per-identity reply quota runs out, after
//! which their messages are escalated to every connected administrator.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Identity verification seam over signed tokens.
pub mod auth;
/// Canned bot responder.
pub mod bot;
/// CLI argument parsing and server configuration.
pub mod config;
mod connection;
/// Error types for relay server operations.
pub mod error;
/// Prometheus metrics collection and HTTP endpoint.
pub mod metrics;
/// Per-identity automated-reply counters.
pub mod quota;
mod ratelimit;
/// Identity-keyed table of live sessions.
pub mod registry;
/// Message routing policy.
pub mod relay;
/// Accept loop and shared server state.
pub mod server;

pub use server::{run, run_with_shutdown, ServerState};
