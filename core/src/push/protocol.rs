/// Push channel event definitions (JSON frames, tagged by "type")
use crate::chat_types::{ConversationId, Message, MessageId, PresenceState, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Client → server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum OutboundEvent {
    /// Receive live events scoped to this conversation
    #[serde(rename = "joinConversation")]
    JoinConversation { conversation_id: ConversationId },

    /// Only sent when the transport needs an explicit leave
    #[serde(rename = "leaveConversation")]
    LeaveConversation { conversation_id: ConversationId },

    #[serde(rename = "sendTyping")]
    Typing { conversation_id: ConversationId },

    #[serde(rename = "stopTyping")]
    StopTyping { conversation_id: ConversationId },
}

impl OutboundEvent {
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            OutboundEvent::JoinConversation { conversation_id }
            | OutboundEvent::LeaveConversation { conversation_id }
            | OutboundEvent::Typing { conversation_id }
            | OutboundEvent::StopTyping { conversation_id } => conversation_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            OutboundEvent::JoinConversation { .. } => "joinConversation",
            OutboundEvent::LeaveConversation { .. } => "leaveConversation",
            OutboundEvent::Typing { .. } => "sendTyping",
            OutboundEvent::StopTyping { .. } => "stopTyping",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Server → client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum InboundEvent {
    #[serde(rename = "messageReceived")]
    MessageReceived { message: Message },

    #[serde(rename = "typingStarted")]
    TypingStarted {
        conversation_id: ConversationId,
        user_id: UserId,
    },

    #[serde(rename = "typingStopped")]
    TypingStopped {
        conversation_id: ConversationId,
        user_id: UserId,
    },

    #[serde(rename = "presenceChanged")]
    PresenceChanged { user_id: UserId, state: PresenceState },

    /// Server acknowledged delivery of one of our messages
    #[serde(rename = "messageDelivered")]
    MessageDelivered {
        conversation_id: ConversationId,
        message_id: MessageId,
    },

    /// Read receipt covering everything up to `up_to`
    #[serde(rename = "messagesRead")]
    MessagesRead {
        conversation_id: ConversationId,
        reader_id: UserId,
        up_to: MessageId,
    },
}

impl InboundEvent {
    /// Conversation the event targets; presence is global
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            InboundEvent::MessageReceived { message } => Some(&message.conversation_id),
            InboundEvent::TypingStarted { conversation_id, .. }
            | InboundEvent::TypingStopped { conversation_id, .. }
            | InboundEvent::MessageDelivered { conversation_id, .. }
            | InboundEvent::MessagesRead { conversation_id, .. } => Some(conversation_id),
            InboundEvent::PresenceChanged { .. } => None,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            InboundEvent::MessageReceived { .. } => "messageReceived",
            InboundEvent::TypingStarted { .. } => "typingStarted",
            InboundEvent::TypingStopped { .. } => "typingStopped",
            InboundEvent::PresenceChanged { .. } => "presenceChanged",
            InboundEvent::MessageDelivered { .. } => "messageDelivered",
            InboundEvent::MessagesRead { .. } => "messagesRead",
        }
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

impl fmt::Display for InboundEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.conversation_id() {
            Some(conv) => write!(f, "{}({})", self.event_type(), conv),
            None => write!(f, "{}", self.event_type()),
        }
    }
}
