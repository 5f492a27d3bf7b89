/// Message list of the currently open conversation
/// Kept sorted by (created_at, id); every id stored once
use crate::chat_types::{ConversationId, DeliveryState, Message, MessageId, UserId};
use crate::error::{Result, SyncError};
use std::collections::HashSet;
use tracing::debug;

/// Result of offering a live message to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Inserted at its ordered position
    Inserted,
    /// Id already present, nothing changed
    Duplicate,
    /// Belongs to another conversation; caller bumps that unread counter
    NotActive,
}

#[derive(Debug, Default)]
pub struct MessageStore {
    active: Option<ConversationId>,
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare which conversation `load_history` will accept
    pub fn declare_active(&mut self, conversation_id: ConversationId) {
        self.active = Some(conversation_id);
    }

    pub fn active(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    /// Drop all messages. The declared id is kept.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.ids.clear();
    }

    /// Forget the declared conversation as well
    pub fn reset(&mut self) {
        self.clear();
        self.active = None;
    }

    /// Replace the active set with fetched history
    pub fn load_history(&mut self, conversation_id: &ConversationId, messages: Vec<Message>) -> Result<()> {
        self.check_active(conversation_id)?;

        let mut ids = HashSet::with_capacity(messages.len());
        let mut loaded: Vec<Message> = messages
            .into_iter()
            .filter(|m| &m.conversation_id == conversation_id)
            .filter(|m| ids.insert(m.id.clone()))
            .collect();
        loaded.sort_by(|a, b| a.order_key().cmp(&b.order_key()));

        debug!("Loaded {} messages into {}", loaded.len(), conversation_id);
        self.messages = loaded;
        self.ids = ids;
        Ok(())
    }

    /// Union fetched history into the current set (used after a reconnect)
    pub fn merge_history(&mut self, conversation_id: &ConversationId, messages: Vec<Message>) -> Result<usize> {
        self.check_active(conversation_id)?;

        let mut added = 0;
        for msg in messages {
            if self.append_live(msg) == AppendOutcome::Inserted {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Ordered insert of a live message
    pub fn append_live(&mut self, message: Message) -> AppendOutcome {
        if self.active.as_ref() != Some(&message.conversation_id) {
            return AppendOutcome::NotActive;
        }
        if self.ids.contains(&message.id) {
            return AppendOutcome::Duplicate;
        }

        // Live events usually land at the tail; history races can put them earlier
        let pos = self
            .messages
            .partition_point(|m| m.order_key() < message.order_key());
        self.ids.insert(message.id.clone());
        self.messages.insert(pos, message);
        AppendOutcome::Inserted
    }

    /// Advance one message to Delivered
    pub fn mark_delivered(&mut self, id: &MessageId) -> bool {
        match self.messages.iter_mut().find(|m| &m.id == id) {
            Some(msg) => advance(&mut msg.delivery_state, DeliveryState::Delivered),
            None => false,
        }
    }

    /// A read receipt covers every message up to and including `up_to`
    /// that the reader did not send themselves.
    pub fn mark_read_up_to(&mut self, reader: &UserId, up_to: &MessageId) -> usize {
        let Some(end) = self.messages.iter().position(|m| &m.id == up_to) else {
            return 0;
        };
        self.messages[..=end]
            .iter_mut()
            .filter(|m| &m.sender.id != reader)
            .map(|m| advance(&mut m.delivery_state, DeliveryState::Read))
            .filter(|changed| *changed)
            .count()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn check_active(&self, conversation_id: &ConversationId) -> Result<()> {
        if self.active.as_ref() != Some(conversation_id) {
            return Err(SyncError::Conflict {
                requested: conversation_id.clone(),
                active: self.active.clone(),
            });
        }
        Ok(())
    }
}

fn advance(state: &mut DeliveryState, to: DeliveryState) -> bool {
    if *state < to {
        *state = to;
        true
    } else {
        false
    }
}
