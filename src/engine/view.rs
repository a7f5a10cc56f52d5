// Derived, presentation-only views over the reconciled message list.
// Everything here is pure and synchronous: no I/O, no timers, no engine
// state. The UI calls these on every render or compose-buffer change.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

use crate::models::{Message, User};

lazy_static! {
    // Trailing @token in the compose buffer, e.g. "see you there @al".
    static ref MENTION_TOKEN: Regex = Regex::new(r"@([A-Za-z0-9._\-]*)$").unwrap();
}

/// The pinned subsequence, in list order.
pub fn pinned_messages(messages: &[Message]) -> Vec<&Message> {
    messages.iter().filter(|m| m.pinned).collect()
}

pub fn is_bookmarked(message: &Message, user_id: &str) -> bool {
    message.bookmarked_by_users.contains(user_id)
}

/// Indices that get a date separator rendered above them: the first message
/// always, and every message whose calendar date differs from its
/// predecessor's.
pub fn date_separator_indices(messages: &[Message]) -> Vec<usize> {
    let mut indices = Vec::new();
    let mut previous: Option<NaiveDate> = None;
    for (index, message) in messages.iter().enumerate() {
        let date = message.created_at.date_naive();
        if previous != Some(date) {
            indices.push(index);
        }
        previous = Some(date);
    }
    indices
}

/// Mention-autocomplete candidates for the current compose buffer.
///
/// Only a trailing `@token` triggers completion; the token is matched as a
/// case-insensitive substring of each user's name or email. An empty token
/// (a bare trailing `@`) matches everyone.
pub fn mention_candidates<'a>(compose: &str, directory: &'a [User]) -> Vec<&'a User> {
    let token = match MENTION_TOKEN.captures(compose) {
        Some(captures) => captures[1].to_lowercase(),
        None => return Vec::new(),
    };

    directory
        .iter()
        .filter(|user| {
            user.name.to_lowercase().contains(&token)
                || user
                    .email
                    .as_deref()
                    .map(|email| email.to_lowercase().contains(&token))
                    .unwrap_or(false)
        })
        .collect()
}
