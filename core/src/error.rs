/// Error types for the sync core
use crate::chat_types::{ConversationId, UserId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// History fetch or message submit failed; retry is user-triggered
    #[error("Network error: {0}")]
    Network(String),

    /// A result arrived for a conversation that is no longer pending/active
    #[error("Conflict: result for {requested} but active conversation is {active:?}")]
    Conflict {
        requested: ConversationId,
        active: Option<ConversationId>,
    },

    #[error("Viewer {viewer} is not a participant of conversation {conversation}")]
    AmbiguousParticipant {
        conversation: ConversationId,
        viewer: UserId,
    },

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Outbound queue momentarily full; the event was not sent
    #[error("Push queue full: {0}")]
    QueueFull(String),

    #[error("Invalid conversation: {0}")]
    InvalidConversation(String),

    #[error("Sync runtime stopped")]
    Stopped,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
