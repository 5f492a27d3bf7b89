/// Inputs and outputs of the sync state machine
use crate::chat_types::{Conversation, ConversationId, Message};
use crate::push::{ConnectionState, InboundEvent};
use crate::scroll::Viewport;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything the controller reacts to, serialized into one queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// User picked a conversation
    OpenConversation { conversation_id: ConversationId },

    /// User left the chat view
    CloseConversation,

    /// Conversation list or metadata refresh from outside the core
    UpsertConversation { conversation: Conversation },

    /// History fetch completed
    HistoryLoaded {
        conversation_id: ConversationId,
        request: u64,
        messages: Vec<Message>,
    },

    /// History fetch failed
    HistoryFailed {
        conversation_id: ConversationId,
        request: u64,
        error: String,
    },

    /// Live event from the push channel
    Inbound { event: InboundEvent },

    /// Transport reported a connection change
    ConnectionChanged { state: ConnectionState },

    /// Local user submits a message in the active conversation
    SendMessage { body: String },

    /// Server accepted a submitted message
    MessageSent { message: Message },

    SendFailed {
        conversation_id: ConversationId,
        client_ref: Uuid,
        error: String,
    },

    /// Local user is composing
    LocalTyping,

    LocalStopTyping,

    /// Periodic timer; expires typing signals
    Tick,

    /// View reported new scroll geometry
    ViewportChanged { viewport: Viewport },
}

impl SyncEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::OpenConversation { .. } => "open_conversation",
            SyncEvent::CloseConversation => "close_conversation",
            SyncEvent::UpsertConversation { .. } => "upsert_conversation",
            SyncEvent::HistoryLoaded { .. } => "history_loaded",
            SyncEvent::HistoryFailed { .. } => "history_failed",
            SyncEvent::Inbound { .. } => "inbound",
            SyncEvent::ConnectionChanged { .. } => "connection_changed",
            SyncEvent::SendMessage { .. } => "send_message",
            SyncEvent::MessageSent { .. } => "message_sent",
            SyncEvent::SendFailed { .. } => "send_failed",
            SyncEvent::LocalTyping => "local_typing",
            SyncEvent::LocalStopTyping => "local_stop_typing",
            SyncEvent::Tick => "tick",
            SyncEvent::ViewportChanged { .. } => "viewport_changed",
        }
    }
}

/// Work the controller asks its driver to perform
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
    /// GET /conversations/{id}/messages; result comes back as HistoryLoaded/HistoryFailed
    FetchHistory {
        conversation_id: ConversationId,
        request: u64,
    },

    /// POST the message; result comes back as MessageSent/SendFailed
    SubmitMessage {
        conversation_id: ConversationId,
        client_ref: Uuid,
        body: String,
    },

    Notice { notice: Notice },
}

/// Non-fatal conditions surfaced to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    HistoryFailed {
        conversation_id: ConversationId,
        error: String,
    },
    SendFailed {
        conversation_id: ConversationId,
        error: String,
    },
    /// Push channel down; presence shown as degraded
    Offline,
    BackOnline,
}

impl Notice {
    pub fn text(&self) -> String {
        match self {
            Notice::HistoryFailed { .. } => "Message loading failed".to_string(),
            Notice::SendFailed { .. } => "Message sending failed".to_string(),
            Notice::Offline => "Connection lost, reconnecting...".to_string(),
            Notice::BackOnline => "Back online".to_string(),
        }
    }
}
