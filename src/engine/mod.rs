// Conversation engine core.
// Owns the single shared per-conversation state and the background loops
// (feed poll, presence poll) bound to the currently open conversation.
// Organized by concern, one submodule each:
//   feed          - authoritative feed polling and reconciliation
//   overlay       - optimistic mutations (send/edit/delete/react/bookmark/pin)
//   read_receipts - the one-mark-read-per-load dispatcher
//   typing        - local typing state machine + remote typing poll
//   view          - pure presentation-only derivations

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::events::EventBus;
use crate::models::{ConversationId, Message, User};
use crate::service::{ConversationService, ServiceError};

pub mod feed;
pub mod overlay;
pub mod read_receipts;
pub mod typing;
pub mod view;

pub use typing::TypingState;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("feed fetch failed: {0}")]
    Fetch(#[source] ServiceError),

    #[error("{op} failed: {source}")]
    Mutation {
        op: &'static str,
        #[source]
        source: ServiceError,
    },

    #[error("message {0} is not part of the open conversation")]
    UnknownMessage(String),

    #[error("a message needs text or at least one attachment")]
    EmptyMessage,

    #[error("no conversation is open")]
    NoConversation,
}

/// What the engine pushes to the embedding UI over the update channel.
#[derive(Debug, Clone)]
pub enum EngineUpdate {
    /// The reconciled visible message list changed.
    Feed {
        conversation: ConversationId,
        messages: Vec<Message>,
    },
    /// The set of remote users currently typing changed.
    TypingUsers {
        conversation: ConversationId,
        users: Vec<String>,
    },
    /// A mutation failed after its optimistic step; the UI should surface
    /// this as a blocking notice.
    MutationFailed {
        op: &'static str,
        message_id: Option<String>,
        detail: String,
    },
}

/// The one piece of shared mutable state. Mutated only from event-loop
/// callbacks under the mutex in [`EngineShared`]; stale-result suppression
/// rests on the generation check made while holding that lock.
#[derive(Default)]
pub(crate) struct FeedState {
    pub(crate) conversation: Option<ConversationId>,
    /// Hidden channel backing a DM, recorded from the first successful load.
    pub(crate) dm_channel_id: Option<String>,
    /// Server-confirmed messages, deduped and sorted.
    pub(crate) messages: Vec<Message>,
    /// Optimistic sends awaiting confirmation, keyed by client_ref.
    pub(crate) pending_sends: Vec<Message>,
    /// Ids the viewer pinned locally; pins are not sourced from the feed.
    pub(crate) pinned: HashSet<String>,
    pub(crate) typing_users: Vec<String>,
    /// Sequence number of the newest poll response applied so far. An older
    /// response resolving late can never overwrite newer data.
    pub(crate) last_applied_seq: u64,
}

impl FeedState {
    fn reset(&mut self, conversation: Option<ConversationId>) {
        self.conversation = conversation;
        self.dm_channel_id = None;
        self.messages.clear();
        self.pending_sends.clear();
        self.pinned.clear();
        self.typing_users.clear();
        self.last_applied_seq = 0;
    }
}

pub(crate) struct EngineShared {
    pub(crate) service: Arc<dyn ConversationService>,
    pub(crate) viewer: User,
    pub(crate) config: EngineConfig,
    pub(crate) bus: EventBus,
    pub(crate) update_tx: mpsc::Sender<EngineUpdate>,
    pub(crate) state: Mutex<FeedState>,
    pub(crate) typing: Mutex<typing::TypingLocal>,
    /// Bumped on every open/close. Callbacks capture the value at spawn time
    /// and results arriving under a newer generation are discarded.
    pub(crate) generation: AtomicU64,
    /// Monotonic counter stamping feed poll requests.
    pub(crate) feed_seq: AtomicU64,
}

impl EngineShared {
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    pub(crate) async fn emit_update(&self, update: EngineUpdate) {
        if self.update_tx.send(update).await.is_err() {
            debug!("Engine update dropped: receiver is gone");
        }
    }

    /// Re-derive the visible list from current state and push it out.
    pub(crate) async fn emit_feed_snapshot(&self) {
        let update = {
            let state = self.state.lock().await;
            state.conversation.as_ref().map(|conversation| EngineUpdate::Feed {
                conversation: conversation.clone(),
                messages: feed::visible_messages(&state),
            })
        };
        if let Some(update) = update {
            self.emit_update(update).await;
        }
    }
}

/// The conversation feed synchronization engine.
///
/// One instance serves one conversation at a time; `open` binds it to a
/// channel or DM and starts the background polling, `open` again switches,
/// `close` tears everything down. Mutations go through the methods defined
/// in [`overlay`]; results stream back over the update channel returned by
/// [`ConversationEngine::new`].
pub struct ConversationEngine {
    pub(crate) shared: Arc<EngineShared>,
    tasks: Vec<JoinHandle<()>>,
}

impl ConversationEngine {
    /// Build an engine bound to a service. Resolves the viewing user up
    /// front; every reaction/bookmark decision needs their id.
    pub async fn new<S>(
        service: Arc<S>,
        config: EngineConfig,
        bus: EventBus,
    ) -> Result<(Self, mpsc::Receiver<EngineUpdate>), EngineError>
    where
        S: ConversationService + 'static,
    {
        let viewer = service.current_user().await.map_err(EngineError::Fetch)?;
        info!("Conversation engine ready for {} ({})", viewer.name, viewer.id);

        let (update_tx, update_rx) = mpsc::channel(config.update_capacity);
        let shared = Arc::new(EngineShared {
            service: service as Arc<dyn ConversationService>,
            viewer,
            config,
            bus,
            update_tx,
            state: Mutex::new(FeedState::default()),
            typing: Mutex::new(typing::TypingLocal::new()),
            generation: AtomicU64::new(0),
            feed_seq: AtomicU64::new(0),
        });

        Ok((
            ConversationEngine {
                shared,
                tasks: Vec::new(),
            },
            update_rx,
        ))
    }

    pub fn viewer(&self) -> &User {
        &self.shared.viewer
    }

    /// Bind the engine to a conversation and start polling it. Opening while
    /// another conversation is active switches: its timers stop, its overlay
    /// state is dropped, and any of its in-flight results are suppressed.
    pub async fn open(&mut self, conversation: ConversationId) {
        self.teardown_current().await;
        info!("Opening {}", conversation);

        {
            let mut state = self.shared.state.lock().await;
            state.reset(Some(conversation.clone()));
        }

        let generation = self.shared.generation();

        let shared = Arc::clone(&self.shared);
        let conv = conversation.clone();
        self.tasks.push(tokio::spawn(async move {
            feed::run_feed_loop(shared, conv, generation).await;
        }));

        let shared = Arc::clone(&self.shared);
        self.tasks.push(tokio::spawn(async move {
            typing::run_presence_loop(shared, conversation, generation).await;
        }));
    }

    /// Unbind from the current conversation and stop all timers.
    pub async fn close(&mut self) {
        self.teardown_current().await;
        let mut state = self.shared.state.lock().await;
        if let Some(conversation) = state.conversation.take() {
            info!("Closed {}", conversation);
        }
        state.reset(None);
    }

    /// The reconciled visible list: confirmed messages plus pending sends.
    pub async fn snapshot(&self) -> Vec<Message> {
        let state = self.shared.state.lock().await;
        feed::visible_messages(&state)
    }

    pub async fn conversation(&self) -> Option<ConversationId> {
        self.shared.state.lock().await.conversation.clone()
    }

    /// Remote users currently typing in the open conversation.
    pub async fn typing_users(&self) -> Vec<String> {
        self.shared.state.lock().await.typing_users.clone()
    }

    // Stop the poll loops and invalidate everything in flight. The loops are
    // aborted (their future ticks are gone immediately); fetches already on
    // the wire are not cancelled and get discarded by the generation check
    // when they resolve.
    async fn teardown_current(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        let previous = { self.shared.state.lock().await.conversation.clone() };
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(previous) = previous {
            typing::stop_typing(&self.shared, &previous).await;
        }
    }
}
