// Common utilities for the integration tests: an in-memory conversation
// service the engine can poll and mutate against, plus wait helpers for the
// update channel.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Once;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::LevelFilter;
use tokio::sync::{mpsc, Mutex};

use confab::models::{Attachment, ConversationId, Message, Reaction, User};
use confab::service::{ConversationService, DirectFeed, RawMessage, ServiceError};
use confab::{EngineConfig, EngineUpdate};

static INIT_LOGGER: Once = Once::new();

pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .init();
    });
}

/// Millisecond-scale intervals so the tests exercise several poll cycles
/// without taking wall-clock seconds.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        feed_poll_interval: Duration::from_millis(40),
        presence_poll_interval: Duration::from_millis(25),
        typing_timeout: Duration::from_millis(80),
        read_receipt_grace: Duration::from_millis(5),
        update_capacity: 64,
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub op: String,
    pub detail: String,
    pub at: Instant,
}

#[derive(Default)]
pub struct MockState {
    pub channel_feeds: HashMap<String, Vec<RawMessage>>,
    pub dm_feeds: HashMap<String, DirectFeed>,
    /// Scripted channel-feed responses: each feed fetch pops one
    /// (delay, messages) entry; once empty, `channel_feeds` serves as usual.
    /// Lets a test hand an older request a slower response deterministically.
    pub feed_script: VecDeque<(Duration, Vec<RawMessage>)>,
    pub typing: Vec<String>,
    pub send_delay: Option<Duration>,
    pub fail_sends: bool,
    pub fail_edits: bool,
    pub fail_deletes: bool,
    pub fail_reactions: bool,
    pub fail_bookmarks: bool,
    pub fail_mark_read: bool,
    /// Authoritative reaction sets, keyed by message id.
    pub reactions: HashMap<String, Vec<Reaction>>,
    /// Per-message bookmark flag for the viewer, flipped by toggleBookmark.
    pub bookmarks: HashMap<String, bool>,
    pub calls: Vec<RecordedCall>,
    next_id: u32,
}

pub struct MockService {
    pub viewer: User,
    pub state: Mutex<MockState>,
}

impl MockService {
    pub fn new(viewer_id: &str) -> Self {
        MockService {
            viewer: User {
                id: viewer_id.to_string(),
                name: format!("{} (test)", viewer_id),
                email: Some(format!("{}@example.com", viewer_id)),
            },
            state: Mutex::new(MockState::default()),
        }
    }

    pub async fn calls(&self, op: &str) -> Vec<RecordedCall> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    pub async fn call_count(&self, op: &str) -> usize {
        self.calls(op).await.len()
    }
}

impl MockState {
    fn record(&mut self, op: &str, detail: impl Into<String>) {
        self.calls.push(RecordedCall {
            op: op.to_string(),
            detail: detail.into(),
            at: Instant::now(),
        });
    }

    fn all_feeds_mut(&mut self) -> impl Iterator<Item = &mut Vec<RawMessage>> {
        self.channel_feeds
            .values_mut()
            .chain(self.dm_feeds.values_mut().map(|f| &mut f.messages))
    }

    fn find_message_mut(&mut self, message_id: &str) -> Option<&mut RawMessage> {
        self.all_feeds_mut()
            .flat_map(|feed| feed.iter_mut())
            .find(|m| m.id == message_id)
    }

    fn stored_send(&mut self, author: &str, text: &str, attachments: &[Attachment], client_ref: &str) -> RawMessage {
        self.next_id += 1;
        RawMessage {
            id: format!("srv-{}", self.next_id),
            content: text.to_string(),
            author_user_id: Some(author.to_string()),
            created_at: Some(Utc::now().to_rfc3339()),
            attachments: Some(attachments.to_vec()),
            client_ref: Some(client_ref.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ConversationService for MockService {
    async fn list_channel_messages(&self, channel_id: &str) -> Result<Vec<RawMessage>, ServiceError> {
        let (delay, feed) = {
            let mut state = self.state.lock().await;
            state.record("listChannelMessages", channel_id);
            match state.feed_script.pop_front() {
                Some(scripted) => scripted,
                None => (
                    Duration::ZERO,
                    state.channel_feeds.get(channel_id).cloned().unwrap_or_default(),
                ),
            }
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(feed)
    }

    async fn list_direct_messages(&self, peer_user_id: &str) -> Result<DirectFeed, ServiceError> {
        let mut state = self.state.lock().await;
        state.record("listDirectMessages", peer_user_id);
        Ok(state
            .dm_feeds
            .entry(peer_user_id.to_string())
            .or_insert_with(|| DirectFeed {
                messages: Vec::new(),
                dm_channel_id: format!("dmchan-{}", peer_user_id),
            })
            .clone())
    }

    async fn send_message(
        &self,
        channel_id: &str,
        text: &str,
        attachments: &[Attachment],
        client_ref: &str,
    ) -> Result<RawMessage, ServiceError> {
        let delay = {
            let mut state = self.state.lock().await;
            state.record("sendMessage", format!("{}:{}", channel_id, text));
            if state.fail_sends {
                return Err(ServiceError::Transport("connection lost".to_string()));
            }
            state.send_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().await;
        let viewer = self.viewer.id.clone();
        let stored = state.stored_send(&viewer, text, attachments, client_ref);
        state
            .channel_feeds
            .entry(channel_id.to_string())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn send_direct_message(
        &self,
        peer_user_id: &str,
        text: &str,
        attachments: &[Attachment],
        client_ref: &str,
    ) -> Result<RawMessage, ServiceError> {
        let mut state = self.state.lock().await;
        state.record("sendDirectMessage", format!("{}:{}", peer_user_id, text));
        if state.fail_sends {
            return Err(ServiceError::Transport("connection lost".to_string()));
        }
        let viewer = self.viewer.id.clone();
        let stored = state.stored_send(&viewer, text, attachments, client_ref);
        state
            .dm_feeds
            .entry(peer_user_id.to_string())
            .or_insert_with(|| DirectFeed {
                messages: Vec::new(),
                dm_channel_id: format!("dmchan-{}", peer_user_id),
            })
            .messages
            .push(stored.clone());
        Ok(stored)
    }

    async fn update_message_content(
        &self,
        message_id: &str,
        text: &str,
    ) -> Result<RawMessage, ServiceError> {
        let mut state = self.state.lock().await;
        state.record("updateMessageContent", message_id);
        if state.fail_edits {
            return Err(ServiceError::Rejected("edit refused".to_string()));
        }
        match state.find_message_mut(message_id) {
            Some(message) => {
                message.content = text.to_string();
                message.edited = Some(true);
                Ok(message.clone())
            }
            None => Err(ServiceError::Rejected(format!("no message {}", message_id))),
        }
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), ServiceError> {
        let mut state = self.state.lock().await;
        state.record("deleteMessage", message_id);
        // The failure modeled here is a lost response: the server applied
        // the delete but the client never heard back.
        for feed in state.all_feeds_mut() {
            feed.retain(|m| m.id != message_id);
        }
        if state.fail_deletes {
            return Err(ServiceError::Transport("connection lost".to_string()));
        }
        Ok(())
    }

    async fn set_reaction(
        &self,
        message_id: &str,
        emoji: &str,
    ) -> Result<Vec<Reaction>, ServiceError> {
        let mut state = self.state.lock().await;
        state.record("setReaction", format!("{}:{}", message_id, emoji));
        if state.fail_reactions {
            return Err(ServiceError::Transport("connection lost".to_string()));
        }
        let viewer = self.viewer.id.clone();
        let reactions = state.reactions.entry(message_id.to_string()).or_default();
        for reaction in reactions.iter_mut() {
            if let Some(pos) = reaction.users.iter().position(|u| *u == viewer) {
                reaction.users.remove(pos);
                reaction.count -= 1;
            }
        }
        reactions.retain(|r| !r.users.is_empty());
        match reactions.iter_mut().find(|r| r.emoji == emoji) {
            Some(reaction) => {
                reaction.users.push(viewer);
                reaction.count += 1;
            }
            None => reactions.push(Reaction {
                emoji: emoji.to_string(),
                count: 1,
                users: vec![viewer],
            }),
        }
        Ok(reactions.clone())
    }

    async fn clear_reaction(&self, message_id: &str) -> Result<Vec<Reaction>, ServiceError> {
        let mut state = self.state.lock().await;
        state.record("clearReaction", message_id);
        if state.fail_reactions {
            return Err(ServiceError::Transport("connection lost".to_string()));
        }
        let viewer = self.viewer.id.clone();
        let reactions = state.reactions.entry(message_id.to_string()).or_default();
        for reaction in reactions.iter_mut() {
            if let Some(pos) = reaction.users.iter().position(|u| *u == viewer) {
                reaction.users.remove(pos);
                reaction.count -= 1;
            }
        }
        reactions.retain(|r| !r.users.is_empty());
        Ok(reactions.clone())
    }

    async fn toggle_bookmark(&self, message_id: &str) -> Result<bool, ServiceError> {
        let mut state = self.state.lock().await;
        state.record("toggleBookmark", message_id);
        if state.fail_bookmarks {
            return Err(ServiceError::Transport("connection lost".to_string()));
        }
        let flag = state.bookmarks.entry(message_id.to_string()).or_insert(false);
        *flag = !*flag;
        Ok(*flag)
    }

    async fn mark_channel_read(&self, channel_id: &str) -> Result<(), ServiceError> {
        let mut state = self.state.lock().await;
        state.record("markChannelRead", channel_id);
        if state.fail_mark_read {
            return Err(ServiceError::Transport("connection lost".to_string()));
        }
        Ok(())
    }

    async fn mark_dm_read(&self, dm_channel_id: &str) -> Result<(), ServiceError> {
        let mut state = self.state.lock().await;
        state.record("markDmRead", dm_channel_id);
        if state.fail_mark_read {
            return Err(ServiceError::Transport("connection lost".to_string()));
        }
        Ok(())
    }

    async fn set_typing(
        &self,
        conversation: &ConversationId,
        typing: bool,
    ) -> Result<(), ServiceError> {
        let mut state = self.state.lock().await;
        state.record("setTyping", format!("{}:{}", conversation, typing));
        Ok(())
    }

    async fn typing_users(
        &self,
        _conversation: &ConversationId,
    ) -> Result<Vec<String>, ServiceError> {
        let mut state = self.state.lock().await;
        state.record("getTypingUsers", "");
        Ok(state.typing.clone())
    }

    async fn current_user(&self) -> Result<User, ServiceError> {
        let mut state = self.state.lock().await;
        state.record("getCurrentUser", "");
        Ok(self.viewer.clone())
    }
}

pub fn raw_message(id: &str, author: &str, ts: &str, content: &str) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        content: content.to_string(),
        author_user_id: Some(author.to_string()),
        created_at: Some(ts.to_string()),
        ..Default::default()
    }
}

/// Same message, older wire spellings (`senderId` / `sentAt`).
pub fn legacy_raw_message(id: &str, author: &str, ts: &str, content: &str) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        content: content.to_string(),
        sender_id: Some(author.to_string()),
        sent_at: Some(ts.to_string()),
        ..Default::default()
    }
}

/// Drain updates until one matches, or time out.
pub async fn wait_for_update(
    rx: &mut mpsc::Receiver<EngineUpdate>,
    secs: u64,
    pred: impl Fn(&EngineUpdate) -> bool,
) -> Result<EngineUpdate> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(update)) => {
                if pred(&update) {
                    return Ok(update);
                }
            }
            Ok(None) => bail!("update channel closed while waiting"),
            Err(_) => bail!("timed out waiting for a matching update"),
        }
    }
}

/// Wait for a feed update whose message list satisfies the predicate.
pub async fn wait_for_feed(
    rx: &mut mpsc::Receiver<EngineUpdate>,
    secs: u64,
    pred: impl Fn(&[Message]) -> bool,
) -> Result<Vec<Message>> {
    let update = wait_for_update(rx, secs, |u| {
        matches!(u, EngineUpdate::Feed { messages, .. } if pred(messages))
    })
    .await?;
    match update {
        EngineUpdate::Feed { messages, .. } => Ok(messages),
        _ => Err(anyhow!("unexpected update variant")),
    }
}
