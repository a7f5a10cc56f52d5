// Canonical data model for the conversation engine.
// Raw wire records (see service.rs) are normalized into these shapes by the
// feed synchronizer; nothing past that boundary sees the upstream spellings.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of the conversation the engine is currently bound to.
/// All engine state is scoped to exactly one of these at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum ConversationId {
    /// A named channel.
    Channel(String),
    /// A direct-message pairing, identified by the peer's user id.
    Direct(String),
}

impl ConversationId {
    pub fn channel(id: impl Into<String>) -> Self {
        ConversationId::Channel(id.into())
    }

    pub fn direct(peer_user_id: impl Into<String>) -> Self {
        ConversationId::Direct(peer_user_id.into())
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationId::Channel(id) => write!(f, "channel {}", id),
            ConversationId::Direct(peer) => write!(f, "dm with {}", peer),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// One emoji aggregated across everyone who reacted with it.
/// The users set is always server-authoritative; the engine never invents
/// membership beyond a short-lived optimistic placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub emoji: String,
    pub count: u32,
    pub users: Vec<String>,
}

/// Pre-resolved file descriptor. Uploads happen elsewhere; by the time an
/// attachment reaches the engine it already has a server-side identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

/// Where a message sits in the optimistic-send lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeliveryState {
    /// Local placeholder, not yet confirmed by the server.
    Pending,
    /// Server-acknowledged, part of the authoritative feed.
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub author_id: String,
    pub created_at: DateTime<Utc>,
    pub edited: bool,
    /// Local-only flag; not sourced from the feed.
    pub pinned: bool,
    pub reactions: Vec<Reaction>,
    pub bookmarked_by_users: HashSet<String>,
    pub attachments: Vec<Attachment>,
    /// Set when the message is a deferred send scheduled for the future.
    pub scheduled_for: Option<DateTime<Utc>>,
    pub delivery: DeliveryState,
    /// Client-generated correlation id for optimistic sends, echoed back by
    /// the server so a placeholder and its confirmed copy can be matched up.
    pub client_ref: Option<String>,
}

impl Message {
    pub fn is_pending(&self) -> bool {
        self.delivery == DeliveryState::Pending
    }

    /// Whether `user_id` currently has this exact emoji recorded on the message.
    pub fn has_reaction_from(&self, user_id: &str, emoji: &str) -> bool {
        self.reactions
            .iter()
            .any(|r| r.emoji == emoji && r.users.iter().any(|u| u == user_id))
    }
}
