// Typing presence.
// Two independent halves: the local Idle -> Typing -> Idle state machine with
// its inactivity watchdog, and the remote poll that refreshes which other
// users are typing. Broadcasts are best-effort; presence is advisory.

use std::sync::Arc;

use log::debug;

use crate::models::ConversationId;

use super::{ConversationEngine, EngineShared, EngineUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingState {
    Idle,
    Typing,
}

/// Local half of the presence protocol. The epoch stamps each keystroke so a
/// watchdog from an earlier keystroke can tell it has been superseded.
pub(crate) struct TypingLocal {
    pub(crate) state: TypingState,
    pub(crate) epoch: u64,
}

impl TypingLocal {
    pub(crate) fn new() -> Self {
        TypingLocal {
            state: TypingState::Idle,
            epoch: 0,
        }
    }
}

impl ConversationEngine {
    /// Feed every compose-buffer change through here. The first keystroke of
    /// a non-empty buffer broadcasts typing=true; each further keystroke
    /// pushes the inactivity deadline out; emptying the buffer (or letting
    /// the deadline pass) broadcasts typing=false.
    pub async fn compose_changed(&self, buffer: &str) {
        let shared = &self.shared;
        let conversation = { shared.state.lock().await.conversation.clone() };
        let Some(conversation) = conversation else {
            return;
        };

        if buffer.is_empty() {
            let became_idle = {
                let mut typing = shared.typing.lock().await;
                typing.epoch += 1;
                std::mem::replace(&mut typing.state, TypingState::Idle) == TypingState::Typing
            };
            if became_idle {
                broadcast(shared, &conversation, false).await;
            }
            return;
        }

        let (first_keystroke, epoch) = {
            let mut typing = shared.typing.lock().await;
            typing.epoch += 1;
            let first = typing.state == TypingState::Idle;
            typing.state = TypingState::Typing;
            (first, typing.epoch)
        };
        if first_keystroke {
            broadcast(shared, &conversation, true).await;
        }

        // Inactivity watchdog. A later keystroke moves the epoch on and this
        // instance expires without effect.
        let shared = Arc::clone(shared);
        let generation = shared.generation();
        tokio::spawn(async move {
            tokio::time::sleep(shared.config.typing_timeout).await;
            let expired = {
                let mut typing = shared.typing.lock().await;
                if typing.epoch == epoch && typing.state == TypingState::Typing {
                    typing.state = TypingState::Idle;
                    typing.epoch += 1;
                    true
                } else {
                    false
                }
            };
            if expired && shared.is_current(generation) {
                broadcast(&shared, &conversation, false).await;
            }
        });
    }

    pub async fn typing_state(&self) -> TypingState {
        self.shared.typing.lock().await.state
    }
}

/// A send counts as leaving the composer: Typing drops back to Idle.
pub(crate) async fn note_message_sent(shared: &Arc<EngineShared>, conversation: &ConversationId) {
    stop_typing(shared, conversation).await;
}

/// Force the local machine to Idle, broadcasting typing=false if it was not
/// there already. Used on send, on teardown, and on conversation switch.
pub(crate) async fn stop_typing(shared: &Arc<EngineShared>, conversation: &ConversationId) {
    let was_typing = {
        let mut typing = shared.typing.lock().await;
        typing.epoch += 1;
        std::mem::replace(&mut typing.state, TypingState::Idle) == TypingState::Typing
    };
    if was_typing {
        broadcast(shared, conversation, false).await;
    }
}

async fn broadcast(shared: &Arc<EngineShared>, conversation: &ConversationId, typing: bool) {
    if let Err(e) = shared.service.set_typing(conversation, typing).await {
        debug!("Typing broadcast ({}) for {} failed: {}", typing, conversation, e);
    }
}

/// Poll the remote typing-user set and replace the held one wholesale.
/// The viewer is filtered out; their own state lives in [`TypingLocal`].
pub(crate) async fn run_presence_loop(
    shared: Arc<EngineShared>,
    conversation: ConversationId,
    generation: u64,
) {
    debug!("Presence poll started for {}", conversation);
    loop {
        if !shared.is_current(generation) {
            break;
        }

        match shared.service.typing_users(&conversation).await {
            Ok(mut users) => {
                users.retain(|u| u != &shared.viewer.id);
                let changed = {
                    let mut state = shared.state.lock().await;
                    if !shared.is_current(generation) {
                        break;
                    }
                    if state.typing_users != users {
                        state.typing_users = users.clone();
                        true
                    } else {
                        false
                    }
                };
                if changed {
                    shared
                        .emit_update(EngineUpdate::TypingUsers {
                            conversation: conversation.clone(),
                            users,
                        })
                        .await;
                }
            }
            Err(e) => {
                // Same policy as feed polls: log it, let the next tick retry.
                debug!("Typing poll for {} failed: {}", conversation, e);
            }
        }

        tokio::time::sleep(shared.config.presence_poll_interval).await;
    }
    debug!("Presence poll stopped for {}", conversation);
}
