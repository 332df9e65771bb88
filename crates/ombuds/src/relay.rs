//! Routing policy for authenticated `message` events.
//!
//! The decision is computed by a pure function over the sender's role,
//! their automated-reply count, and whether the event names a recipient;
//! the effecting step (registry lookups, channel sends) lives with the
//! connection handler.

use ombud_common::Role;

/// Where one inbound `message` event goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Admin-to-user delivery plus an echo copy back to the admin.
    DirectSend {
        /// Identity id the message is addressed to.
        recipient: String,
    },
    /// Quota exhausted: forward the raw text to every registered admin.
    Escalate,
    /// Quota available: answer with the bot and charge the quota.
    BotReply,
    /// Non-admin named a recipient: relay to the named peer, never the
    /// sender, without quota or escalation semantics.
    Broadcast {
        /// Identity id the message is addressed to.
        recipient: String,
    },
}

/// Classifies one `message` event, in priority order: admin direct send,
/// escalation, bot reply, broadcast.
#[must_use]
pub fn classify(
    role: Role,
    auto_replies: u32,
    recipient_id: Option<&str>,
    limit: u32,
) -> RouteDecision {
    match recipient_id {
        Some(recipient) if role.is_admin() => RouteDecision::DirectSend {
            recipient: recipient.to_string(),
        },
        Some(recipient) => RouteDecision::Broadcast {
            recipient: recipient.to_string(),
        },
        None if auto_replies >= limit => RouteDecision::Escalate,
        None => RouteDecision::BotReply,
    }
}
