//! Shared types for the ombud chat relay.
//!
//! This crate provides:
//! - JSON wire envelopes and client events ([`protocol`])
//! - Identity and role definitions ([`identity`])
//! - HMAC signed-token minting and verification ([`token`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod identity;
pub mod protocol;
pub mod token;

pub use identity::{Identity, Role};
pub use token::TokenError;
