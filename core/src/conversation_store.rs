/// Conversations the viewer participates in, plus per-conversation unread counters
use crate::chat_types::{Conversation, ConversationId, Message, MessageId, UserId, UserRef};
use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::warn;

/// Shown when a conversation title cannot be resolved
pub const PLACEHOLDER_LABEL: &str = "Unknown chat";

const PREVIEW_CHARS: usize = 80;

/// Most recent message ids remembered per counter for de-duplication
const DEDUPE_WINDOW: usize = 512;

#[derive(Debug, Clone, Default, Serialize)]
pub struct UnreadCounter {
    pub count: u32,
    pub latest_preview: Option<String>,
    #[serde(skip)]
    counted: HashSet<MessageId>,
    #[serde(skip)]
    counted_order: VecDeque<MessageId>,
}

impl UnreadCounter {
    /// Returns false when this message id was already counted
    fn record(&mut self, message: &Message) -> bool {
        if !self.counted.insert(message.id.clone()) {
            return false;
        }
        self.counted_order.push_back(message.id.clone());
        if self.counted_order.len() > DEDUPE_WINDOW {
            if let Some(oldest) = self.counted_order.pop_front() {
                self.counted.remove(&oldest);
            }
        }
        self.count = self.count.saturating_add(1);
        self.latest_preview = Some(format!(
            "{}: {}",
            message.sender.display_name,
            message.preview(PREVIEW_CHARS)
        ));
        true
    }

    fn reset(&mut self) {
        self.count = 0;
        self.latest_preview = None;
        self.counted.clear();
        self.counted_order.clear();
    }
}

#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: HashMap<ConversationId, Conversation>,
    unread: HashMap<ConversationId, UnreadCounter>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge by id
    pub fn upsert(&mut self, conversation: Conversation) -> Result<()> {
        conversation
            .validate()
            .map_err(SyncError::InvalidConversation)?;

        match self.conversations.get_mut(&conversation.id) {
            Some(existing) => {
                let mut merged = existing.clone();
                for p in conversation.participants {
                    if !merged.has_participant(&p.id) {
                        merged.participants.push(p);
                    }
                }
                merged.last_activity_at = merged.last_activity_at.max(conversation.last_activity_at);
                if conversation.group_name.is_some() {
                    merged.group_name = conversation.group_name;
                }
                if conversation.group_image.is_some() {
                    merged.group_image = conversation.group_image;
                }
                merged
                    .validate()
                    .map_err(SyncError::InvalidConversation)?;
                *existing = merged;
            }
            None => {
                self.conversations
                    .insert(conversation.id.clone(), conversation);
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Most recently active first
    pub fn sorted_by_activity(&self) -> Vec<&Conversation> {
        let mut list: Vec<_> = self.conversations.values().collect();
        list.sort_by(|a, b| {
            b.last_activity_at
                .cmp(&a.last_activity_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        list
    }

    pub fn bump_activity(&mut self, id: &ConversationId, at: DateTime<Utc>) {
        if let Some(conv) = self.conversations.get_mut(id) {
            if at > conv.last_activity_at {
                conv.last_activity_at = at;
            }
        }
    }

    /// Count a live message for a conversation that is not open
    pub fn record_unread(&mut self, message: &Message) -> bool {
        let counted = self
            .unread
            .entry(message.conversation_id.clone())
            .or_default()
            .record(message);
        if counted {
            self.bump_activity(&message.conversation_id, message.created_at);
        }
        counted
    }

    pub fn reset_unread(&mut self, id: &ConversationId) {
        if let Some(counter) = self.unread.get_mut(id) {
            counter.reset();
        }
    }

    pub fn unread(&self, id: &ConversationId) -> u32 {
        self.unread.get(id).map(|c| c.count).unwrap_or(0)
    }

    pub fn unread_counter(&self, id: &ConversationId) -> Option<&UnreadCounter> {
        self.unread.get(id)
    }

    /// Unread counts for every conversation with a non-zero counter
    pub fn unread_counts(&self) -> Vec<(ConversationId, u32)> {
        let mut counts: Vec<_> = self
            .unread
            .iter()
            .filter(|(_, c)| c.count > 0)
            .map(|(id, c)| (id.clone(), c.count))
            .collect();
        counts.sort();
        counts
    }

    pub fn total_unread(&self) -> u32 {
        self.unread.values().map(|c| c.count).sum()
    }

    /// Title with the integrity failure mapped to a placeholder
    pub fn display_name_or_placeholder(&self, id: &ConversationId, viewer: &UserId) -> String {
        let Some(conv) = self.conversations.get(id) else {
            return PLACEHOLDER_LABEL.to_string();
        };
        match resolve_display_name(conv, viewer) {
            Ok(name) => name,
            Err(e) => {
                warn!("Cannot resolve conversation title: {}", e);
                PLACEHOLDER_LABEL.to_string()
            }
        }
    }
}

/// Group chats use the stored name; direct chats the other participant's
pub fn resolve_display_name(conversation: &Conversation, viewer: &UserId) -> Result<String> {
    if conversation.is_group_chat {
        ensure_participant(conversation, viewer)?;
        return Ok(conversation
            .group_name
            .clone()
            .unwrap_or_else(|| PLACEHOLDER_LABEL.to_string()));
    }
    other_participant(conversation, viewer).map(|u| u.display_name.clone())
}

/// Same rule as [`resolve_display_name`], returning the avatar reference
pub fn resolve_display_image(conversation: &Conversation, viewer: &UserId) -> Result<Option<String>> {
    if conversation.is_group_chat {
        ensure_participant(conversation, viewer)?;
        return Ok(conversation.group_image.clone());
    }
    other_participant(conversation, viewer).map(|u| u.avatar.clone())
}

fn other_participant<'a>(conversation: &'a Conversation, viewer: &UserId) -> Result<&'a UserRef> {
    ensure_participant(conversation, viewer)?;
    conversation
        .participants
        .iter()
        .find(|p| &p.id != viewer)
        .ok_or_else(|| ambiguous(conversation, viewer))
}

fn ensure_participant(conversation: &Conversation, viewer: &UserId) -> Result<()> {
    if conversation.has_participant(viewer) {
        Ok(())
    } else {
        Err(ambiguous(conversation, viewer))
    }
}

fn ambiguous(conversation: &Conversation, viewer: &UserId) -> SyncError {
    SyncError::AmbiguousParticipant {
        conversation: conversation.id.clone(),
        viewer: viewer.clone(),
    }
}
