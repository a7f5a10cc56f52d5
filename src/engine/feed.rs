// Feed synchronizer.
// Polls the authoritative message list for the open conversation, coalesces
// the upstream field-spelling variants into the canonical shape, and
// reconciles the result with local optimistic state.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::models::{ConversationId, DeliveryState, Message};
use crate::service::{ConversationService, RawMessage, ServiceError};

use super::{read_receipts, EngineShared, FeedState};

/// Poll the feed until the conversation is switched away or the engine is
/// torn down. Each tick fires an independent fetch task, the way a UI-side
/// interval would: a slow response never delays the next tick, and the
/// sequence gate in `apply_feed` keeps a late straggler from clobbering
/// newer data.
pub(crate) async fn run_feed_loop(
    shared: Arc<EngineShared>,
    conversation: ConversationId,
    generation: u64,
) {
    debug!("Feed synchronizer started for {}", conversation);
    loop {
        if !shared.is_current(generation) {
            break;
        }

        let seq = shared.feed_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let shared_tick = Arc::clone(&shared);
        let conv = conversation.clone();
        tokio::spawn(async move {
            match fetch_feed(shared_tick.service.as_ref(), &conv).await {
                Ok((raw, dm_channel_id)) => {
                    if apply_feed(&shared_tick, &conv, generation, seq, raw, dm_channel_id).await {
                        read_receipts::schedule_mark_read(&shared_tick, generation);
                    }
                }
                Err(e) => {
                    // Nothing user-visible for a failed poll; the next tick retries.
                    warn!("Feed load for {} failed: {}", conv, e);
                }
            }
        });

        tokio::time::sleep(shared.config.feed_poll_interval).await;
    }
    debug!("Feed synchronizer stopped for {}", conversation);
}

async fn fetch_feed(
    service: &dyn ConversationService,
    conversation: &ConversationId,
) -> Result<(Vec<RawMessage>, Option<String>), ServiceError> {
    match conversation {
        ConversationId::Channel(id) => Ok((service.list_channel_messages(id).await?, None)),
        ConversationId::Direct(peer) => {
            let feed = service.list_direct_messages(peer).await?;
            Ok((feed.messages, Some(feed.dm_channel_id)))
        }
    }
}

/// Fold a poll response into the shared state. Returns true when the load was
/// applied; stale results (conversation switched, or an older request
/// resolving after a newer one) return false and leave state untouched.
async fn apply_feed(
    shared: &Arc<EngineShared>,
    conversation: &ConversationId,
    generation: u64,
    seq: u64,
    raw: Vec<RawMessage>,
    dm_channel_id: Option<String>,
) -> bool {
    {
        let mut state = shared.state.lock().await;
        if !shared.is_current(generation) {
            debug!("Discarding feed result for {}: conversation changed", conversation);
            return false;
        }
        if seq <= state.last_applied_seq {
            debug!(
                "Discarding out-of-order feed response for {} (seq {} <= {})",
                conversation, seq, state.last_applied_seq
            );
            return false;
        }
        state.last_applied_seq = seq;

        if dm_channel_id.is_some() {
            state.dm_channel_id = dm_channel_id;
        }

        let confirmed = reconcile_feed(raw, &state.messages, &state.pinned);

        // A pending send whose client_ref came back in the feed is now
        // confirmed; drop the placeholder instead of showing both copies.
        let echoed: HashSet<String> = confirmed
            .iter()
            .filter_map(|m| m.client_ref.clone())
            .collect();
        state.pending_sends.retain(|p| {
            p.client_ref
                .as_ref()
                .map(|r| !echoed.contains(r))
                .unwrap_or(true)
        });

        state.messages = confirmed;
    }

    shared.emit_feed_snapshot().await;
    true
}

/// Normalize a raw feed into the canonical list: dedup by id (first record
/// wins), coalesce field spellings, re-apply local-only flags, sort by
/// timestamp (stable, so same-instant messages keep arrival order).
pub(crate) fn reconcile_feed(
    raw: Vec<RawMessage>,
    previous: &[Message],
    pinned: &HashSet<String>,
) -> Vec<Message> {
    let prev_by_id: HashMap<&str, &Message> =
        previous.iter().map(|m| (m.id.as_str(), m)).collect();

    let mut seen: HashSet<String> = HashSet::new();
    let mut messages: Vec<Message> = Vec::with_capacity(raw.len());
    for record in raw {
        if !seen.insert(record.id.clone()) {
            warn!("Dropping duplicate message id {} from feed", record.id);
            continue;
        }
        let prev = prev_by_id.get(record.id.as_str()).copied();
        let mut message = normalize_message(record, prev);
        message.pinned = pinned.contains(&message.id);
        messages.push(message);
    }
    messages.sort_by_key(|m| m.created_at);
    messages
}

/// Coalesce one raw record into the canonical shape.
///
/// `previous` is the already-held copy of the same message, if any; local
/// knowledge the server response omits (bookmark membership, the edited
/// flag, an omitted reactions array) is carried over from it rather than
/// silently reset.
pub(crate) fn normalize_message(raw: RawMessage, previous: Option<&Message>) -> Message {
    let RawMessage {
        id,
        content,
        author_user_id,
        sender_id,
        created_at,
        sent_at,
        edited,
        reactions,
        bookmarked_by_users,
        attachments,
        scheduled_for,
        client_ref,
    } = raw;

    let author_id = match author_user_id.or(sender_id) {
        Some(author) => author,
        None => {
            warn!("Message {} arrived without an author field", id);
            String::new()
        }
    };

    let created_at = parse_timestamp(created_at.or(sent_at), &id);

    let reactions = match reactions {
        Some(reactions) => reactions,
        None => previous.map(|p| p.reactions.clone()).unwrap_or_default(),
    };

    let bookmarked_by_users = match bookmarked_by_users {
        Some(users) => users.into_iter().collect(),
        None => previous
            .map(|p| p.bookmarked_by_users.clone())
            .unwrap_or_default(),
    };

    Message {
        edited: edited.unwrap_or(false) || previous.map(|p| p.edited).unwrap_or(false),
        author_id,
        created_at,
        content,
        pinned: false,
        reactions,
        bookmarked_by_users,
        attachments: attachments.unwrap_or_default(),
        scheduled_for: scheduled_for.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|ts| ts.with_timezone(&Utc))
        }),
        delivery: DeliveryState::Confirmed,
        client_ref,
        id,
    }
}

// A record without a readable timestamp still has to land somewhere on
// screen; it orders as "now" but that synthetic value is never written back.
fn parse_timestamp(value: Option<String>, id: &str) -> DateTime<Utc> {
    match value.as_deref().map(DateTime::parse_from_rfc3339) {
        Some(Ok(ts)) => ts.with_timezone(&Utc),
        Some(Err(e)) => {
            debug!("Unreadable timestamp on message {}: {}; ordering it last", id, e);
            Utc::now()
        }
        None => {
            debug!("Message {} has no timestamp; ordering it last", id);
            Utc::now()
        }
    }
}

/// The list the UI renders: confirmed messages with pending sends folded in,
/// in timestamp order (stable, pending entries after confirmed ties).
pub(crate) fn visible_messages(state: &FeedState) -> Vec<Message> {
    let mut visible = state.messages.clone();
    visible.extend(state.pending_sends.iter().cloned());
    visible.sort_by_key(|m| m.created_at);
    visible
}

// Replace a confirmed message in place, or insert it in timestamp order.
pub(crate) fn upsert_confirmed(state: &mut FeedState, message: Message) {
    match state.messages.iter_mut().find(|m| m.id == message.id) {
        Some(slot) => *slot = message,
        None => {
            state.messages.push(message);
            state.messages.sort_by_key(|m| m.created_at);
        }
    }
}
