// Conversation feed synchronization engine.
// Keeps a single conversation's visible message list consistent over a
// polling transport while optimistic mutations, typing presence, and
// read-receipt side effects are layered on top.

pub mod config;
pub mod engine;
pub mod events;
pub mod models;
pub mod service;
pub mod utils;

// Re-export the types an embedding UI touches every day.
pub use config::EngineConfig;
pub use engine::{ConversationEngine, EngineError, EngineUpdate, TypingState};
pub use events::{AppEvent, EventBus};
pub use models::{
    Attachment, ConversationId, DeliveryState, Message, Reaction, User,
};
pub use service::{ConversationService, DirectFeed, RawMessage, ServiceError};
