// Optimistic mutation overlay.
// Every operation follows the same shape: apply the local speculative change
// under the state lock, push a feed update, issue the remote call, then fold
// the server's answer back in or roll back. Responses that resolve after the
// conversation was switched are discarded by the generation check.

use std::collections::HashSet;

use chrono::Utc;
use log::{debug, error, info};
use uuid::Uuid;

use crate::models::{Attachment, ConversationId, DeliveryState, Message, Reaction};

use super::{feed, typing, ConversationEngine, EngineError, EngineUpdate};

impl ConversationEngine {
    /// Send a message in the open conversation.
    ///
    /// The message shows up immediately as a pending entry; on confirmation
    /// the placeholder is replaced by the server's copy (matched through the
    /// correlation id, so a poll racing the confirmation cannot duplicate
    /// it). On failure the placeholder is removed and the user notified.
    pub async fn send_message(
        &self,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> Result<(), EngineError> {
        if text.trim().is_empty() && attachments.is_empty() {
            return Err(EngineError::EmptyMessage);
        }

        let shared = &self.shared;
        let generation = shared.generation();
        let client_ref = Uuid::new_v4().to_string();

        let conversation = {
            let mut state = shared.state.lock().await;
            let conversation = state
                .conversation
                .clone()
                .ok_or(EngineError::NoConversation)?;
            state.pending_sends.push(Message {
                id: format!("pending-{}", client_ref),
                content: text.to_string(),
                author_id: shared.viewer.id.clone(),
                created_at: Utc::now(),
                edited: false,
                pinned: false,
                reactions: Vec::new(),
                bookmarked_by_users: HashSet::new(),
                attachments: attachments.clone(),
                scheduled_for: None,
                delivery: DeliveryState::Pending,
                client_ref: Some(client_ref.clone()),
            });
            conversation
        };
        shared.emit_feed_snapshot().await;

        // Hitting send ends the typing indicator for the contact.
        typing::note_message_sent(shared, &conversation).await;

        let result = match &conversation {
            ConversationId::Channel(id) => {
                shared
                    .service
                    .send_message(id, text, &attachments, &client_ref)
                    .await
            }
            ConversationId::Direct(peer) => {
                shared
                    .service
                    .send_direct_message(peer, text, &attachments, &client_ref)
                    .await
            }
        };

        match result {
            Ok(raw) => {
                {
                    let mut state = shared.state.lock().await;
                    if !shared.is_current(generation) {
                        debug!("Dropping send confirmation {}: conversation changed", client_ref);
                        return Ok(());
                    }
                    state
                        .pending_sends
                        .retain(|p| p.client_ref.as_deref() != Some(client_ref.as_str()));
                    let mut confirmed = feed::normalize_message(raw, None);
                    confirmed.pinned = state.pinned.contains(&confirmed.id);
                    info!("Send confirmed as {}", confirmed.id);
                    feed::upsert_confirmed(&mut state, confirmed);
                }
                shared.emit_feed_snapshot().await;
                Ok(())
            }
            Err(e) => {
                error!("Send failed: {}", e);
                {
                    let mut state = shared.state.lock().await;
                    state
                        .pending_sends
                        .retain(|p| p.client_ref.as_deref() != Some(client_ref.as_str()));
                }
                shared.emit_feed_snapshot().await;
                shared
                    .emit_update(EngineUpdate::MutationFailed {
                        op: "send",
                        message_id: None,
                        detail: e.to_string(),
                    })
                    .await;
                Err(EngineError::Mutation {
                    op: "send",
                    source: e,
                })
            }
        }
    }

    /// Rewrite a message's content. The edit is visible immediately and the
    /// message is flagged edited regardless of whether the server echoes the
    /// flag; a failed call restores the prior content so the user can retry.
    pub async fn edit_message(&self, message_id: &str, text: &str) -> Result<(), EngineError> {
        if text.trim().is_empty() {
            return Err(EngineError::EmptyMessage);
        }

        let shared = &self.shared;
        let generation = shared.generation();

        let previous_content = {
            let mut state = shared.state.lock().await;
            let message = state
                .messages
                .iter_mut()
                .find(|m| m.id == message_id)
                .ok_or_else(|| EngineError::UnknownMessage(message_id.to_string()))?;
            let previous = message.content.clone();
            message.content = text.to_string();
            message.edited = true;
            previous
        };
        shared.emit_feed_snapshot().await;

        match shared.service.update_message_content(message_id, text).await {
            Ok(raw) => {
                {
                    let mut state = shared.state.lock().await;
                    if shared.is_current(generation) {
                        if let Some(slot) =
                            state.messages.iter_mut().find(|m| m.id == message_id)
                        {
                            let pinned = slot.pinned;
                            let mut confirmed = feed::normalize_message(raw, Some(&*slot));
                            confirmed.edited = true;
                            confirmed.pinned = pinned;
                            *slot = confirmed;
                        }
                    }
                }
                shared.emit_feed_snapshot().await;
                Ok(())
            }
            Err(e) => {
                error!("Edit of {} failed: {}", message_id, e);
                {
                    let mut state = shared.state.lock().await;
                    if shared.is_current(generation) {
                        if let Some(message) =
                            state.messages.iter_mut().find(|m| m.id == message_id)
                        {
                            message.content = previous_content;
                        }
                    }
                }
                shared.emit_feed_snapshot().await;
                shared
                    .emit_update(EngineUpdate::MutationFailed {
                        op: "edit",
                        message_id: Some(message_id.to_string()),
                        detail: e.to_string(),
                    })
                    .await;
                Err(EngineError::Mutation {
                    op: "edit",
                    source: e,
                })
            }
        }
    }

    /// Remove a message. The caller is responsible for having confirmed the
    /// action with the user. Deletion is best-effort: the entry disappears
    /// locally right away and stays gone even if the server call fails (the
    /// failure is still surfaced).
    pub async fn delete_message(&self, message_id: &str) -> Result<(), EngineError> {
        let shared = &self.shared;
        {
            let mut state = shared.state.lock().await;
            if !state.messages.iter().any(|m| m.id == message_id) {
                return Err(EngineError::UnknownMessage(message_id.to_string()));
            }
            state.messages.retain(|m| m.id != message_id);
            state.pinned.remove(message_id);
        }
        shared.emit_feed_snapshot().await;

        match shared.service.delete_message(message_id).await {
            Ok(()) => {
                info!("Deleted {}", message_id);
                Ok(())
            }
            Err(e) => {
                error!("Delete of {} failed: {}", message_id, e);
                shared
                    .emit_update(EngineUpdate::MutationFailed {
                        op: "delete",
                        message_id: Some(message_id.to_string()),
                        detail: e.to_string(),
                    })
                    .await;
                Err(EngineError::Mutation {
                    op: "delete",
                    source: e,
                })
            }
        }
    }

    /// Toggle the viewer's reaction. Holding this exact emoji already means
    /// clearing it; anything else means setting it (displacing whatever
    /// other emoji the viewer had on the message - one reaction per user).
    /// Whatever the server returns replaces the local set wholesale.
    pub async fn toggle_reaction(&self, message_id: &str, emoji: &str) -> Result<(), EngineError> {
        let shared = &self.shared;
        let generation = shared.generation();
        let viewer = shared.viewer.id.clone();

        let (clearing, prior) = {
            let mut state = shared.state.lock().await;
            let message = state
                .messages
                .iter_mut()
                .find(|m| m.id == message_id)
                .ok_or_else(|| EngineError::UnknownMessage(message_id.to_string()))?;
            let prior = message.reactions.clone();
            let clearing = message.has_reaction_from(&viewer, emoji);
            apply_reaction_toggle(message, &viewer, emoji, clearing);
            (clearing, prior)
        };
        shared.emit_feed_snapshot().await;

        let result = if clearing {
            shared.service.clear_reaction(message_id).await
        } else {
            shared.service.set_reaction(message_id, emoji).await
        };

        match result {
            Ok(reactions) => {
                {
                    let mut state = shared.state.lock().await;
                    if shared.is_current(generation) {
                        if let Some(message) =
                            state.messages.iter_mut().find(|m| m.id == message_id)
                        {
                            message.reactions = reactions;
                        }
                    }
                }
                shared.emit_feed_snapshot().await;
                Ok(())
            }
            Err(e) => {
                error!("Reaction toggle on {} failed: {}", message_id, e);
                {
                    let mut state = shared.state.lock().await;
                    if shared.is_current(generation) {
                        if let Some(message) =
                            state.messages.iter_mut().find(|m| m.id == message_id)
                        {
                            message.reactions = prior;
                        }
                    }
                }
                shared.emit_feed_snapshot().await;
                shared
                    .emit_update(EngineUpdate::MutationFailed {
                        op: "react",
                        message_id: Some(message_id.to_string()),
                        detail: e.to_string(),
                    })
                    .await;
                Err(EngineError::Mutation {
                    op: "react",
                    source: e,
                })
            }
        }
    }

    /// Toggle the viewer's bookmark on a message. Unlike reactions the
    /// membership set is trusted locally: it flips immediately and is then
    /// pinned to the boolean the server returns, with no feed re-fetch.
    pub async fn toggle_bookmark(&self, message_id: &str) -> Result<bool, EngineError> {
        let shared = &self.shared;
        let generation = shared.generation();
        let viewer = shared.viewer.id.clone();

        let had = {
            let mut state = shared.state.lock().await;
            let message = state
                .messages
                .iter_mut()
                .find(|m| m.id == message_id)
                .ok_or_else(|| EngineError::UnknownMessage(message_id.to_string()))?;
            let had = message.bookmarked_by_users.contains(&viewer);
            if had {
                message.bookmarked_by_users.remove(&viewer);
            } else {
                message.bookmarked_by_users.insert(viewer.clone());
            }
            had
        };
        shared.emit_feed_snapshot().await;

        match shared.service.toggle_bookmark(message_id).await {
            Ok(bookmarked) => {
                {
                    let mut state = shared.state.lock().await;
                    if shared.is_current(generation) {
                        if let Some(message) =
                            state.messages.iter_mut().find(|m| m.id == message_id)
                        {
                            if bookmarked {
                                message.bookmarked_by_users.insert(viewer);
                            } else {
                                message.bookmarked_by_users.remove(&viewer);
                            }
                        }
                    }
                }
                shared.emit_feed_snapshot().await;
                Ok(bookmarked)
            }
            Err(e) => {
                error!("Bookmark toggle on {} failed: {}", message_id, e);
                {
                    let mut state = shared.state.lock().await;
                    if shared.is_current(generation) {
                        if let Some(message) =
                            state.messages.iter_mut().find(|m| m.id == message_id)
                        {
                            if had {
                                message.bookmarked_by_users.insert(viewer);
                            } else {
                                message.bookmarked_by_users.remove(&viewer);
                            }
                        }
                    }
                }
                shared.emit_feed_snapshot().await;
                shared
                    .emit_update(EngineUpdate::MutationFailed {
                        op: "bookmark",
                        message_id: Some(message_id.to_string()),
                        detail: e.to_string(),
                    })
                    .await;
                Err(EngineError::Mutation {
                    op: "bookmark",
                    source: e,
                })
            }
        }
    }

    /// Pin or unpin a message for the viewer. Pins are purely local state;
    /// there is no remote call and the flag survives feed reloads.
    pub async fn toggle_pin(&self, message_id: &str) -> Result<bool, EngineError> {
        let shared = &self.shared;
        let now_pinned = {
            let mut state = shared.state.lock().await;
            if !state.messages.iter().any(|m| m.id == message_id) {
                return Err(EngineError::UnknownMessage(message_id.to_string()));
            }
            let now_pinned = if state.pinned.remove(message_id) {
                false
            } else {
                state.pinned.insert(message_id.to_string());
                true
            };
            if let Some(message) = state.messages.iter_mut().find(|m| m.id == message_id) {
                message.pinned = now_pinned;
            }
            now_pinned
        };
        shared.emit_feed_snapshot().await;
        Ok(now_pinned)
    }
}

// Speculative half of the reaction toggle. The server's response replaces
// whatever this produces, so counts only need to be locally consistent.
fn apply_reaction_toggle(message: &mut Message, viewer: &str, emoji: &str, clearing: bool) {
    // The viewer holds at most one emoji per message; drop any current one.
    for reaction in message.reactions.iter_mut() {
        if let Some(pos) = reaction.users.iter().position(|u| u == viewer) {
            reaction.users.remove(pos);
            reaction.count = reaction.count.saturating_sub(1);
        }
    }
    message.reactions.retain(|r| !r.users.is_empty());

    if !clearing {
        match message.reactions.iter_mut().find(|r| r.emoji == emoji) {
            Some(reaction) => {
                reaction.users.push(viewer.to_string());
                reaction.count += 1;
            }
            None => message.reactions.push(Reaction {
                emoji: emoji.to_string(),
                count: 1,
                users: vec![viewer.to_string()],
            }),
        }
    }
}
