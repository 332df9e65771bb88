//! JSON wire protocol: one object per WebSocket text frame.
//!
//! Clients send [`ClientEvent`]s; the relay answers with flat
//! [`Envelope`]s, never batched. Optional envelope fields are omitted
//! from the serialized form when absent.

use crate::identity::Identity;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current WebSocket subprotocol identifier.
/// Bump this on breaking wire-format changes.
pub const PROTOCOL_VERSION: &str = "ombud.v1";

/// Sender name used for relay-generated system envelopes.
pub const SYSTEM_SENDER: &str = "System";
/// Sender name used for automated bot replies.
pub const BOT_SENDER: &str = "Bot";

/// An inbound event from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientEvent {
    /// Presents a signed token; first event on every connection.
    Auth {
        /// Opaque signed token issued by the login service.
        token: String,
    },
    /// A chat message from an authenticated session.
    #[serde(rename_all = "camelCase")]
    Message {
        /// Raw message text.
        message: String,
        /// Target user id for a direct send; `None` talks to the bot.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient_id: Option<String>,
    },
}

/// Errors that can occur while parsing an inbound event.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame carried no payload at all.
    #[error("empty frame")]
    Empty,
    /// The payload is not a recognized event object.
    #[error("invalid event: {0}")]
    Invalid(#[from] serde_json::Error),
}

impl ClientEvent {
    /// Parses one inbound text frame into a typed event.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the text is empty or is not a valid
    /// event object.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        if text.trim().is_empty() {
            return Err(ProtocolError::Empty);
        }
        Ok(serde_json::from_str(text)?)
    }
}

/// Discriminator for envelopes that carry a client-visible event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeKind {
    /// The sender's automated-reply quota has just been exhausted.
    #[serde(rename = "limitReached")]
    LimitReached,
}

/// An outbound message from the relay to one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Event type tag; only present on `limitReached` notifications.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EnvelopeKind>,
    /// Display name of the originator ("System", "Bot", or a user).
    pub sender: String,
    /// Message text.
    pub message: String,
    /// RFC 3339 UTC timestamp with millisecond precision.
    pub timestamp: String,
    /// Set on automated replies and the welcome envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_bot: Option<bool>,
    /// User id the message relates to; lets admin UIs thread by user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<String>,
    /// Set on envelopes that require an administrator's attention.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_admin: Option<bool>,
}

impl Envelope {
    fn now() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Creates a plain system envelope with the given message.
    #[must_use]
    pub fn system(message: impl Into<String>) -> Self {
        Self {
            kind: None,
            sender: SYSTEM_SENDER.to_string(),
            message: message.into(),
            timestamp: Self::now(),
            is_bot: None,
            from_user_id: None,
            needs_admin: None,
        }
    }

    /// Welcome envelope sent right after successful authentication.
    #[must_use]
    pub fn welcome(identity: &Identity) -> Self {
        Self {
            is_bot: Some(true),
            ..Self::system(format!("Welcome, {}!", identity.display_name))
        }
    }

    /// Automated bot reply delivered back to the sender only.
    #[must_use]
    pub fn bot_reply(reply: &str, user_id: &str) -> Self {
        Self {
            kind: None,
            sender: BOT_SENDER.to_string(),
            message: reply.to_string(),
            timestamp: Self::now(),
            is_bot: Some(true),
            from_user_id: Some(user_id.to_string()),
            needs_admin: None,
        }
    }

    /// `limitReached` notification for the user whose quota just ran out.
    #[must_use]
    pub fn limit_reached(user_id: &str, limit: u32) -> Self {
        Self {
            kind: Some(EnvelopeKind::LimitReached),
            from_user_id: Some(user_id.to_string()),
            ..Self::system(format!("Automated reply limit of {limit} reached"))
        }
    }

    /// One-time notice to an administrator that a user hit the quota.
    #[must_use]
    pub fn limit_notice(user: &Identity, limit: u32) -> Self {
        Self {
            from_user_id: Some(user.id.clone()),
            needs_admin: Some(true),
            ..Self::system(format!(
                "{} reached the limit of {limit} automated replies. Reply to them directly.",
                user.display_name
            ))
        }
    }

    /// A user's raw message, escalated to an administrator.
    #[must_use]
    pub fn escalation(sender: &Identity, text: &str) -> Self {
        Self {
            needs_admin: Some(true),
            ..Self::direct(sender, text, &sender.id)
        }
    }

    /// A relayed chat message attributed to `sender`.
    ///
    /// `from_user_id` is the id the receiving UI should thread the
    /// message under: the sender's id on delivery, the recipient's id on
    /// the copy echoed back to an administrator.
    #[must_use]
    pub fn direct(sender: &Identity, text: &str, from_user_id: &str) -> Self {
        Self {
            kind: None,
            sender: sender.display_name.clone(),
            message: text.to_string(),
            timestamp: Self::now(),
            is_bot: None,
            from_user_id: Some(from_user_id.to_string()),
            needs_admin: None,
        }
    }
}
