/// Sync controller: the single owner of chat state
///
/// A reducer over [`SyncEvent`]s. Each call to [`SyncController::handle`]
/// applies one event completely (or not at all) and returns the effects the
/// driver has to run. Nothing in here awaits; fetches and submits happen
/// outside and re-enter the queue as events.
use crate::chat_types::{ConversationId, Message, PresenceState, UserId, UserRef};
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::conversation_store::ConversationStore;
use crate::error::{Result, SyncError};
use crate::message_store::{AppendOutcome, MessageStore};
use crate::push::{ConnectionState, InboundEvent, PushChannelAdapter, PushTransport};
use crate::scroll::ScrollState;
use crate::sync::events::{Effect, Notice, SyncEvent};
use crate::typing::{typing_text, TypingTracker};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where the controller is in the open-conversation lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    /// No conversation open
    Idle,
    /// History fetch in flight for the pending conversation
    LoadingHistory {
        conversation_id: ConversationId,
        request: u64,
    },
    /// History loaded, push scope joined
    Active {
        conversation_id: ConversationId,
        /// Re-fetch after reconnect, merged on arrival
        resync: Option<u64>,
    },
    /// Cleanup of the previous conversation; only exists inside one reduction
    SwitchingAway {
        from: ConversationId,
        to: ConversationId,
    },
}

impl SyncState {
    pub fn active(&self) -> Option<&ConversationId> {
        match self {
            SyncState::Active { conversation_id, .. } => Some(conversation_id),
            _ => None,
        }
    }

    pub fn pending(&self) -> Option<&ConversationId> {
        match self {
            SyncState::LoadingHistory { conversation_id, .. } => Some(conversation_id),
            _ => None,
        }
    }
}

pub struct SyncController {
    viewer: UserRef,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    state: SyncState,
    next_request: u64,
    conversations: ConversationStore,
    messages: MessageStore,
    push: PushChannelAdapter,
    typing: TypingTracker,
    scroll: ScrollState,
    presence: HashMap<UserId, PresenceState>,
    /// Live messages for the pending conversation, applied after its history
    held_back: Vec<Message>,
    last_notice: Option<Notice>,
    client_refs: Box<dyn FnMut() -> Uuid + Send>,
}

impl SyncController {
    pub fn new(
        viewer: UserRef,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
        transport: Box<dyn PushTransport>,
    ) -> Self {
        let push = PushChannelAdapter::new(transport, config.typing_buffer_capacity);
        let typing = TypingTracker::new(config.typing_ttl_chrono());
        let scroll = ScrollState::new(config.scroll_threshold);
        Self {
            viewer,
            config,
            clock,
            state: SyncState::Idle,
            next_request: 0,
            conversations: ConversationStore::new(),
            messages: MessageStore::new(),
            push,
            typing,
            scroll,
            presence: HashMap::new(),
            held_back: Vec::new(),
            last_notice: None,
            client_refs: Box::new(Uuid::new_v4),
        }
    }

    /// Replace the random correlation ids of submitted messages
    pub fn with_client_refs(mut self, refs: impl FnMut() -> Uuid + Send + 'static) -> Self {
        self.client_refs = Box::new(refs);
        self
    }

    /// Apply one event
    pub fn handle(&mut self, event: SyncEvent) -> Vec<Effect> {
        debug!("Handling {}", event.name());
        self.push.flush_pending();
        match event {
            SyncEvent::OpenConversation { conversation_id } => self.open_conversation(conversation_id),
            SyncEvent::CloseConversation => {
                self.close_conversation();
                Vec::new()
            }
            SyncEvent::UpsertConversation { conversation } => {
                if let Err(e) = self.conversations.upsert(conversation) {
                    warn!("Rejected conversation update: {}", e);
                }
                Vec::new()
            }
            SyncEvent::HistoryLoaded {
                conversation_id,
                request,
                messages,
            } => {
                if let Err(e) = self.history_loaded(conversation_id, request, messages) {
                    debug!("Discarding history result: {}", e);
                }
                Vec::new()
            }
            SyncEvent::HistoryFailed {
                conversation_id,
                request,
                error,
            } => self.history_failed(conversation_id, request, error),
            SyncEvent::Inbound { event } => {
                self.inbound(event);
                Vec::new()
            }
            SyncEvent::ConnectionChanged { state } => self.connection_changed(state),
            SyncEvent::SendMessage { body } => self.send_message(body),
            SyncEvent::MessageSent { message } => {
                self.apply_live(message);
                Vec::new()
            }
            SyncEvent::SendFailed {
                conversation_id,
                client_ref,
                error,
            } => {
                warn!("Message {} to {} failed: {}", client_ref, conversation_id, error);
                self.notice(Notice::SendFailed {
                    conversation_id,
                    error,
                })
            }
            SyncEvent::LocalTyping => {
                if let Some(conv) = self.state.active().cloned() {
                    self.push.send_typing(conv);
                }
                Vec::new()
            }
            SyncEvent::LocalStopTyping => {
                if let Some(conv) = self.state.active().cloned() {
                    self.push.stop_typing(conv);
                }
                Vec::new()
            }
            SyncEvent::Tick => {
                let expired = self.typing.prune(self.clock.now());
                if expired > 0 {
                    debug!("Expired {} typing signals", expired);
                }
                Vec::new()
            }
            SyncEvent::ViewportChanged { viewport } => {
                self.scroll.update_viewport(viewport);
                Vec::new()
            }
        }
    }

    // ===== Transitions =====

    fn open_conversation(&mut self, to: ConversationId) -> Vec<Effect> {
        match self.state.clone() {
            SyncState::Active { conversation_id, .. } if conversation_id == to => {
                debug!("{} already open", to);
                Vec::new()
            }
            SyncState::LoadingHistory { conversation_id, .. } if conversation_id == to => {
                debug!("{} already loading, coalesced", to);
                Vec::new()
            }
            SyncState::Active { conversation_id: from, .. } => {
                info!("Switching {} -> {}", from, to);
                self.state = SyncState::SwitchingAway {
                    from: from.clone(),
                    to: to.clone(),
                };
                self.typing.clear_conversation(&from);
                self.begin_loading(to)
            }
            SyncState::LoadingHistory { conversation_id: abandoned, .. } => {
                // Last request wins; the abandoned fetch result will be discarded
                info!("Superseding pending load of {} with {}", abandoned, to);
                self.begin_loading(to)
            }
            SyncState::Idle | SyncState::SwitchingAway { .. } => self.begin_loading(to),
        }
    }

    fn begin_loading(&mut self, to: ConversationId) -> Vec<Effect> {
        let request = self.allocate_request();
        self.messages.clear();
        self.messages.declare_active(to.clone());
        self.release_held_back();
        self.scroll.reset();
        self.typing.clear_conversation(&to);
        self.state = SyncState::LoadingHistory {
            conversation_id: to.clone(),
            request,
        };
        info!("Loading history of {} (request {})", to, request);
        vec![Effect::FetchHistory {
            conversation_id: to,
            request,
        }]
    }

    fn history_loaded(
        &mut self,
        conversation_id: ConversationId,
        request: u64,
        messages: Vec<Message>,
    ) -> Result<()> {
        match &self.state {
            SyncState::LoadingHistory {
                conversation_id: pending,
                request: expected,
            } if *pending == conversation_id && *expected == request => {
                self.messages.load_history(&conversation_id, messages)?;
                self.conversations.reset_unread(&conversation_id);
                self.push.join_conversation(conversation_id.clone());

                for msg in std::mem::take(&mut self.held_back) {
                    self.messages.append_live(msg);
                }
                if let Some(at) = self.messages.last().map(|m| m.created_at) {
                    self.conversations.bump_activity(&conversation_id, at);
                }

                info!(
                    "{} active with {} messages",
                    conversation_id,
                    self.messages.len()
                );
                self.state = SyncState::Active {
                    conversation_id,
                    resync: None,
                };
                self.scroll.scroll_to_bottom();
                Ok(())
            }
            SyncState::Active {
                conversation_id: active,
                resync: Some(expected),
            } if *active == conversation_id && *expected == request => {
                let added = self.messages.merge_history(&conversation_id, messages)?;
                info!("Re-synced {}: {} missed messages", conversation_id, added);
                if added > 0 {
                    self.scroll.on_message_arrival();
                }
                self.state = SyncState::Active {
                    conversation_id,
                    resync: None,
                };
                Ok(())
            }
            _ => Err(self.conflict(conversation_id)),
        }
    }

    fn history_failed(&mut self, conversation_id: ConversationId, request: u64, error: String) -> Vec<Effect> {
        match &self.state {
            SyncState::LoadingHistory {
                conversation_id: pending,
                request: expected,
            } if *pending == conversation_id && *expected == request => {
                let err = SyncError::Network(error.clone());
                warn!("History of {} failed: {}", conversation_id, err);
                self.messages.reset();
                self.release_held_back();
                self.state = SyncState::Idle;
                self.notice(Notice::HistoryFailed {
                    conversation_id,
                    error,
                })
            }
            SyncState::Active {
                conversation_id: active,
                resync: Some(expected),
            } if *active == conversation_id && *expected == request => {
                // Keep what we have; the next reconnect tries again
                warn!("Re-sync of {} failed: {}", conversation_id, error);
                self.state = SyncState::Active {
                    conversation_id,
                    resync: None,
                };
                Vec::new()
            }
            _ => {
                debug!("Discarding failure: {}", self.conflict(conversation_id));
                Vec::new()
            }
        }
    }

    fn close_conversation(&mut self) {
        if let Some(conv) = self.state.active().or(self.state.pending()).cloned() {
            info!("Closing {}", conv);
            self.typing.clear_conversation(&conv);
        }
        self.push.leave();
        self.messages.reset();
        self.release_held_back();
        self.scroll.reset();
        self.state = SyncState::Idle;
    }

    fn connection_changed(&mut self, state: ConnectionState) -> Vec<Effect> {
        let was_open = self.push.connection_state().is_open();
        let reconnected = self.push.set_connection_state(state);
        let mut effects = Vec::new();

        if was_open && !state.is_open() {
            warn!("{}", SyncError::ConnectionLost(format!("push channel {:?}", state)));
            effects.extend(self.notice(Notice::Offline));
        }

        if reconnected {
            effects.extend(self.notice(Notice::BackOnline));
            if self.config.refetch_on_reconnect {
                if let SyncState::Active { conversation_id, .. } = self.state.clone() {
                    let request = self.allocate_request();
                    info!("Re-fetching {} after reconnect (request {})", conversation_id, request);
                    self.state = SyncState::Active {
                        conversation_id: conversation_id.clone(),
                        resync: Some(request),
                    };
                    effects.push(Effect::FetchHistory {
                        conversation_id,
                        request,
                    });
                }
            }
        }
        effects
    }

    fn send_message(&mut self, body: String) -> Vec<Effect> {
        let Some(conversation_id) = self.state.active().cloned() else {
            warn!("Send ignored: no active conversation");
            return Vec::new();
        };
        let body = body.trim().to_string();
        if body.is_empty() {
            return Vec::new();
        }

        // Own sends always jump to the bottom
        self.scroll.scroll_to_bottom();
        self.push.stop_typing(conversation_id.clone());
        vec![Effect::SubmitMessage {
            conversation_id,
            client_ref: (self.client_refs)(),
            body,
        }]
    }

    // ===== Inbound =====

    fn inbound(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::MessageReceived { message } => self.apply_live(message),
            InboundEvent::TypingStarted {
                conversation_id,
                user_id,
            } => {
                if self.state.active() != Some(&conversation_id) || user_id == self.viewer.id {
                    debug!("Ignoring typing of {} in {}", user_id, conversation_id);
                    return;
                }
                self.typing.start(conversation_id, user_id, self.clock.now());
            }
            InboundEvent::TypingStopped {
                conversation_id,
                user_id,
            } => {
                self.typing.stop(&conversation_id, &user_id);
            }
            InboundEvent::PresenceChanged { user_id, state } => {
                self.presence.insert(user_id, state);
            }
            InboundEvent::MessageDelivered {
                conversation_id,
                message_id,
            } => {
                if self.state.active() == Some(&conversation_id) {
                    self.messages.mark_delivered(&message_id);
                }
            }
            InboundEvent::MessagesRead {
                conversation_id,
                reader_id,
                up_to,
            } => {
                if self.state.active() == Some(&conversation_id) {
                    let changed = self.messages.mark_read_up_to(&reader_id, &up_to);
                    debug!("{} read {} messages in {}", reader_id, changed, conversation_id);
                }
            }
        }
    }

    fn apply_live(&mut self, message: Message) {
        let target = message.conversation_id.clone();

        if self.state.active() == Some(&target) {
            let own = message.sender.id == self.viewer.id;
            let sender = message.sender.id.clone();
            let at = message.created_at;
            match self.messages.append_live(message) {
                AppendOutcome::Inserted => {
                    self.conversations.bump_activity(&target, at);
                    self.typing.stop(&target, &sender);
                    if own {
                        self.scroll.scroll_to_bottom();
                    } else {
                        self.scroll.on_message_arrival();
                    }
                }
                AppendOutcome::Duplicate => debug!("Duplicate message in {}", target),
                AppendOutcome::NotActive => warn!("Message store out of step with {}", target),
            }
            return;
        }

        if self.state.pending() == Some(&target) {
            if !self.held_back.iter().any(|m| m.id == message.id) {
                debug!("Holding back {} until history of {} lands", message.id, target);
                self.held_back.push(message);
            }
            return;
        }

        self.count_unread(message);
    }

    /// Message for a conversation that is not on screen
    fn count_unread(&mut self, message: Message) {
        let target = &message.conversation_id;
        if message.sender.id == self.viewer.id {
            // Sent from another device; not unread for us
            self.conversations.bump_activity(target, message.created_at);
            return;
        }
        if self.conversations.record_unread(&message) {
            debug!("Unread {} in {}", self.conversations.unread(target), target);
        }
    }

    /// The pending load was abandoned; what arrived meanwhile is unread
    fn release_held_back(&mut self) {
        for message in std::mem::take(&mut self.held_back) {
            self.count_unread(message);
        }
    }

    // ===== Helpers =====

    fn allocate_request(&mut self) -> u64 {
        self.next_request += 1;
        self.next_request
    }

    fn conflict(&self, requested: ConversationId) -> SyncError {
        SyncError::Conflict {
            requested,
            active: self
                .state
                .active()
                .or(self.state.pending())
                .cloned(),
        }
    }

    fn notice(&mut self, notice: Notice) -> Vec<Effect> {
        self.last_notice = Some(notice.clone());
        vec![Effect::Notice { notice }]
    }

    // ===== Read-only views =====

    pub fn viewer(&self) -> &UserRef {
        &self.viewer
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn scroll(&self) -> &ScrollState {
        &self.scroll
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.push.connection_state()
    }

    pub fn push(&self) -> &PushChannelAdapter {
        &self.push
    }

    pub fn last_notice(&self) -> Option<&Notice> {
        self.last_notice.as_ref()
    }

    pub fn presence(&self, user: &UserId) -> Option<PresenceState> {
        self.presence.get(user).copied()
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Users typing in the active conversation
    pub fn typing_users(&self) -> Vec<UserId> {
        match self.state.active() {
            Some(conv) => self.typing.active_users(conv, self.clock.now()),
            None => Vec::new(),
        }
    }

    /// "Bob is typing..." for the active conversation
    pub fn typing_text(&self) -> Option<String> {
        let conv = self.state.active()?;
        let names: Vec<String> = self
            .typing_users()
            .into_iter()
            .map(|user| self.participant_name(conv, &user))
            .collect();
        typing_text(&names)
    }

    /// Header subtitle: "typing...", "online" or "last seen recently"
    pub fn header_status(&self) -> Option<String> {
        let conv_id = self.state.active()?;
        if !self.typing_users().is_empty() {
            return Some("typing...".to_string());
        }
        if !self.connection_state().is_open() {
            return Some("last seen recently".to_string());
        }
        let online = self
            .conversations
            .get(conv_id)
            .map(|conv| {
                conv.participants
                    .iter()
                    .filter(|p| p.id != self.viewer.id)
                    .any(|p| self.presence(&p.id) == Some(PresenceState::Online))
            })
            .unwrap_or(false);
        Some(if online { "online" } else { "last seen recently" }.to_string())
    }

    fn participant_name(&self, conv: &ConversationId, user: &UserId) -> String {
        self.conversations
            .get(conv)
            .and_then(|c| c.participants.iter().find(|p| &p.id == user))
            .map(|p| p.display_name.clone())
            .unwrap_or_else(|| user.to_string())
    }
}
