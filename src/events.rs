// Process-local event bus.
// Sibling components (the sidebar unread badges, most importantly) subscribe
// here instead of depending on an ambient global, so tests can stand up an
// isolated bus per engine.

use log::debug;
use tokio::sync::broadcast;

use crate::models::ConversationId;

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// The conversation was marked read on the server; ambient unread counts
    /// should refresh.
    ConversationRead(ConversationId),
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        EventBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget: an event with no subscribers is simply dropped.
    pub fn emit(&self, event: AppEvent) {
        if self.tx.send(event.clone()).is_err() {
            debug!("No subscribers for {:?}", event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(32)
    }
}
