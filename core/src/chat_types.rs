/// Shared types for the chat sync layer
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(ConversationId);
string_id!(MessageId);
string_id!(UserId);

/// A user as seen by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    pub display_name: String,
    /// Avatar image reference (URL or asset key)
    #[serde(default)]
    pub avatar: Option<String>,
}

impl UserRef {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            display_name: display_name.into(),
            avatar: None,
        }
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }
}

/// One chat (1:1 or group)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub is_group_chat: bool,
    /// Ordered, unique by user id
    pub participants: Vec<UserRef>,
    /// Stored label for group chats
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub group_image: Option<String>,
    pub last_activity_at: DateTime<Utc>,
}

impl Conversation {
    pub fn direct(id: impl Into<String>, a: UserRef, b: UserRef, at: DateTime<Utc>) -> Self {
        Self {
            id: ConversationId::new(id),
            is_group_chat: false,
            participants: vec![a, b],
            group_name: None,
            group_image: None,
            last_activity_at: at,
        }
    }

    pub fn group(
        id: impl Into<String>,
        name: impl Into<String>,
        participants: Vec<UserRef>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ConversationId::new(id),
            is_group_chat: true,
            participants,
            group_name: Some(name.into()),
            group_image: None,
            last_activity_at: at,
        }
    }

    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participants.iter().any(|p| &p.id == user)
    }

    /// Participants must be non-empty; direct chats have exactly two.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.participants.is_empty() {
            return Err(format!("{} has no participants", self.id));
        }
        if !self.is_group_chat && self.participants.len() != 2 {
            return Err(format!(
                "{} is a direct chat with {} participants",
                self.id,
                self.participants.len()
            ));
        }
        Ok(())
    }
}

/// Best-effort delivery status, only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    #[default]
    Sent,
    Delivered,
    Read,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender: UserRef,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub delivery_state: DeliveryState,
}

impl Message {
    /// Total order: created_at, then id
    pub fn order_key(&self) -> (DateTime<Utc>, &MessageId) {
        (self.created_at, &self.id)
    }

    /// Single-line preview for unread notifications
    pub fn preview(&self, max_chars: usize) -> String {
        let line = self.body.lines().next().unwrap_or("");
        if line.chars().count() <= max_chars {
            line.to_string()
        } else {
            let cut: String = line.chars().take(max_chars).collect();
            format!("{}…", cut)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Online,
    Away,
    Offline,
}
