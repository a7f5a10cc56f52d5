// Remote conversation service boundary.
// The engine never talks HTTP itself; it goes through this trait so the
// production transport and the in-memory test double are interchangeable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Attachment, ConversationId, Reaction, User};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("server rejected the request: {0}")]
    Rejected(String),

    #[error("no valid session")]
    Unauthorized,
}

/// A message exactly as the feed endpoint serialized it.
///
/// Upstream records are not uniform: depending on which server code path
/// produced them, the author arrives as `authorUserId` or `senderId` and the
/// timestamp as `createdAt` or `sentAt`. Both spellings are captured here and
/// coalesced in one place (engine/feed.rs); the canonical [`crate::models::Message`]
/// shape never carries the ambiguity forward.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawMessage {
    pub id: String,
    pub content: String,
    pub author_user_id: Option<String>,
    pub sender_id: Option<String>,
    pub created_at: Option<String>,
    pub sent_at: Option<String>,
    pub edited: Option<bool>,
    pub reactions: Option<Vec<Reaction>>,
    pub bookmarked_by_users: Option<Vec<String>>,
    pub attachments: Option<Vec<Attachment>>,
    pub scheduled_for: Option<String>,
    pub client_ref: Option<String>,
}

/// Response of the direct-message feed endpoint. DMs are backed by a hidden
/// channel on the server; its id is needed later for the mark-read call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectFeed {
    pub messages: Vec<RawMessage>,
    pub dm_channel_id: String,
}

/// Operations the remote conversation service exposes.
///
/// Send operations carry a client-generated correlation id (`client_ref`)
/// that the server echoes back in the stored message, so an optimistic
/// placeholder can be matched with its confirmed copy instead of living on
/// as a duplicate.
#[async_trait]
pub trait ConversationService: Send + Sync {
    async fn list_channel_messages(&self, channel_id: &str)
        -> Result<Vec<RawMessage>, ServiceError>;

    async fn list_direct_messages(&self, peer_user_id: &str)
        -> Result<DirectFeed, ServiceError>;

    async fn send_message(
        &self,
        channel_id: &str,
        text: &str,
        attachments: &[Attachment],
        client_ref: &str,
    ) -> Result<RawMessage, ServiceError>;

    async fn send_direct_message(
        &self,
        peer_user_id: &str,
        text: &str,
        attachments: &[Attachment],
        client_ref: &str,
    ) -> Result<RawMessage, ServiceError>;

    async fn update_message_content(
        &self,
        message_id: &str,
        text: &str,
    ) -> Result<RawMessage, ServiceError>;

    async fn delete_message(&self, message_id: &str) -> Result<(), ServiceError>;

    async fn set_reaction(
        &self,
        message_id: &str,
        emoji: &str,
    ) -> Result<Vec<Reaction>, ServiceError>;

    async fn clear_reaction(&self, message_id: &str) -> Result<Vec<Reaction>, ServiceError>;

    async fn toggle_bookmark(&self, message_id: &str) -> Result<bool, ServiceError>;

    async fn mark_channel_read(&self, channel_id: &str) -> Result<(), ServiceError>;

    async fn mark_dm_read(&self, dm_channel_id: &str) -> Result<(), ServiceError>;

    /// Best-effort presence broadcast; callers ignore failures.
    async fn set_typing(
        &self,
        conversation: &ConversationId,
        typing: bool,
    ) -> Result<(), ServiceError>;

    async fn typing_users(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<String>, ServiceError>;

    async fn current_user(&self) -> Result<User, ServiceError>;
}
