/// Read-only view state derived from the controller
use crate::chat_types::{ConversationId, DeliveryState, MessageId};
use crate::clock::{format_day_label, format_full, format_time_of_day, starts_new_day};
use crate::push::ConnectionState;
use crate::sync::controller::{SyncController, SyncState};
use crate::sync::events::Notice;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Loading,
    Active,
}

/// One rendered message row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageRow {
    pub id: MessageId,
    pub sender_name: String,
    pub body: String,
    pub is_own: bool,
    /// Day label shown above this row, if it starts a new day
    pub date_separator: Option<String>,
    /// Group chats: avatar on the last message of a run from one sender
    pub show_avatar: bool,
    pub show_sender_name: bool,
    pub avatar: Option<String>,
    pub time_label: String,
    pub full_timestamp: String,
    /// Only meaningful for own messages
    pub delivery_state: DeliveryState,
}

/// One entry of the chat list, most recently active first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub title: String,
    pub last_activity_at: DateTime<Utc>,
    pub unread: u32,
    /// "Bob: see you" of the latest unread message
    pub preview: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnreadBadge {
    pub conversation_id: ConversationId,
    pub count: u32,
}

/// Everything the view needs after one event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSnapshot {
    pub phase: Phase,
    pub conversation_id: Option<ConversationId>,
    pub title: Option<String>,
    pub image: Option<String>,
    pub header_status: Option<String>,
    pub rows: Vec<MessageRow>,
    pub conversations: Vec<ConversationSummary>,
    pub unread: Vec<UnreadBadge>,
    pub total_unread: u32,
    pub typing_text: Option<String>,
    pub connection: ConnectionState,
    pub new_content_available: bool,
    pub scroll_requests: u64,
    pub notice: Option<Notice>,
}

impl SyncSnapshot {
    pub fn capture(ctl: &SyncController) -> Self {
        let (phase, conversation_id) = match ctl.state() {
            SyncState::Idle => (Phase::Idle, None),
            SyncState::LoadingHistory { conversation_id, .. } => {
                (Phase::Loading, Some(conversation_id.clone()))
            }
            SyncState::SwitchingAway { to, .. } => (Phase::Loading, Some(to.clone())),
            SyncState::Active { conversation_id, .. } => (Phase::Active, Some(conversation_id.clone())),
        };

        let viewer = ctl.viewer();
        let conversation = conversation_id
            .as_ref()
            .and_then(|id| ctl.conversations().get(id));
        let is_group = conversation.map(|c| c.is_group_chat).unwrap_or(false);

        let title = conversation_id
            .as_ref()
            .map(|id| ctl.conversations().display_name_or_placeholder(id, &viewer.id));
        let image = conversation.and_then(|c| {
            crate::conversation_store::resolve_display_image(c, &viewer.id)
                .ok()
                .flatten()
        });

        let messages = ctl.messages().messages();
        let rows = messages
            .iter()
            .enumerate()
            .map(|(idx, msg)| {
                let is_own = msg.sender.id == viewer.id;
                let previous = idx.checked_sub(1).map(|i| messages[i].created_at);
                let next_sender = messages.get(idx + 1).map(|m| &m.sender.id);
                MessageRow {
                    id: msg.id.clone(),
                    sender_name: msg.sender.display_name.clone(),
                    body: msg.body.clone(),
                    is_own,
                    date_separator: starts_new_day(previous, msg.created_at)
                        .then(|| format_day_label(msg.created_at)),
                    show_avatar: is_group && !is_own && next_sender != Some(&msg.sender.id),
                    show_sender_name: is_group && !is_own,
                    avatar: msg.sender.avatar.clone(),
                    time_label: format_time_of_day(msg.created_at),
                    full_timestamp: format_full(msg.created_at),
                    delivery_state: msg.delivery_state,
                }
            })
            .collect();

        let conversations = ctl
            .conversations()
            .sorted_by_activity()
            .into_iter()
            .map(|conv| {
                let counter = ctl.conversations().unread_counter(&conv.id);
                ConversationSummary {
                    id: conv.id.clone(),
                    title: ctl
                        .conversations()
                        .display_name_or_placeholder(&conv.id, &viewer.id),
                    last_activity_at: conv.last_activity_at,
                    unread: counter.map(|c| c.count).unwrap_or(0),
                    preview: counter.and_then(|c| c.latest_preview.clone()),
                }
            })
            .collect();

        let unread = ctl
            .conversations()
            .unread_counts()
            .into_iter()
            .map(|(conversation_id, count)| UnreadBadge {
                conversation_id,
                count,
            })
            .collect();

        Self {
            phase,
            conversation_id,
            title,
            image,
            header_status: ctl.header_status(),
            rows,
            conversations,
            unread,
            total_unread: ctl.conversations().total_unread(),
            typing_text: ctl.typing_text(),
            connection: ctl.connection_state(),
            new_content_available: ctl.scroll().new_content_available(),
            scroll_requests: ctl.scroll().scroll_requests(),
            notice: ctl.last_notice().cloned(),
        }
    }
}
