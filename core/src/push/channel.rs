/// Push channel adapter: join scope, best-effort typing, connection state
use crate::chat_types::ConversationId;
use crate::error::{Result, SyncError};
use crate::push::protocol::OutboundEvent;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Connection state as observed from the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// First connection attempt in progress
    Connecting,
    /// Connected and ready
    Open,
    /// Lost, transport is retrying with backoff
    Reconnecting,
    /// Shut down for good
    Closed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        *self == ConnectionState::Open
    }
}

/// Outbound side of the live connection
pub trait PushTransport: Send {
    /// Hand one event to the transport without blocking
    fn send(&mut self, event: OutboundEvent) -> Result<()>;

    /// Whether superseding a join needs an explicit leave
    fn requires_leave(&self) -> bool {
        false
    }
}

/// Transport that forwards outbound events into a tokio channel
pub struct ChannelTransport {
    tx: mpsc::Sender<OutboundEvent>,
    requires_leave: bool,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::Sender<OutboundEvent>) -> Self {
        Self {
            tx,
            requires_leave: false,
        }
    }

    pub fn with_explicit_leave(mut self) -> Self {
        self.requires_leave = true;
        self
    }
}

impl PushTransport for ChannelTransport {
    fn send(&mut self, event: OutboundEvent) -> Result<()> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(ev) => SyncError::QueueFull(ev.event_type().to_string()),
            mpsc::error::TrySendError::Closed(_) => {
                SyncError::ConnectionLost("outbound channel closed".to_string())
            }
        })
    }

    fn requires_leave(&self) -> bool {
        self.requires_leave
    }
}

/// Wraps the process-wide push connection
pub struct PushChannelAdapter {
    transport: Box<dyn PushTransport>,
    state: ConnectionState,
    joined: Option<ConversationId>,
    /// Join still owed to the server (requested while not open)
    join_pending: bool,
    typing_buffer: VecDeque<OutboundEvent>,
    typing_capacity: usize,
    dropped_typing: u64,
}

impl PushChannelAdapter {
    pub fn new(transport: Box<dyn PushTransport>, typing_capacity: usize) -> Self {
        Self {
            transport,
            state: ConnectionState::Connecting,
            joined: None,
            join_pending: false,
            typing_buffer: VecDeque::with_capacity(typing_capacity),
            typing_capacity,
            dropped_typing: 0,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn joined(&self) -> Option<&ConversationId> {
        self.joined.as_ref()
    }

    /// Typing events dropped so far (buffer overflow or dead connection)
    pub fn dropped_typing(&self) -> u64 {
        self.dropped_typing
    }

    pub fn buffered_typing(&self) -> usize {
        self.typing_buffer.len()
    }

    /// Scope live events to one conversation; supersedes any previous join
    pub fn join_conversation(&mut self, conversation_id: ConversationId) {
        if let Some(previous) = self.joined.take() {
            if previous != conversation_id && self.transport.requires_leave() && self.state.is_open() {
                self.transmit(OutboundEvent::LeaveConversation {
                    conversation_id: previous,
                });
            }
        }

        info!("Joining push scope {}", conversation_id);
        self.joined = Some(conversation_id);
        self.join_pending = true;
        self.flush_join();
    }

    /// Drop the current scope, e.g. when the conversation is closed
    pub fn leave(&mut self) {
        if let Some(previous) = self.joined.take() {
            if self.transport.requires_leave() && self.state.is_open() {
                self.transmit(OutboundEvent::LeaveConversation {
                    conversation_id: previous,
                });
            }
        }
        self.join_pending = false;
        self.typing_buffer.clear();
    }

    pub fn send_typing(&mut self, conversation_id: ConversationId) {
        self.send_best_effort(OutboundEvent::Typing { conversation_id });
    }

    pub fn stop_typing(&mut self, conversation_id: ConversationId) {
        self.send_best_effort(OutboundEvent::StopTyping { conversation_id });
    }

    /// Retry a join the transport could not take earlier
    pub fn flush_pending(&mut self) {
        self.flush_join();
    }

    /// Record a transport state change; true when this is a reconnect
    pub fn set_connection_state(&mut self, state: ConnectionState) -> bool {
        let previous = self.state;
        if previous == state {
            return false;
        }
        self.state = state;
        info!("Push channel {:?} -> {:?}", previous, state);

        match state {
            ConnectionState::Open => {
                // Server forgets scopes across connections
                if self.joined.is_some() {
                    self.join_pending = true;
                }
                self.flush_join();
                self.flush_typing();
                previous == ConnectionState::Reconnecting
            }
            ConnectionState::Closed => {
                let dropped = self.typing_buffer.len() as u64;
                self.dropped_typing += dropped;
                self.typing_buffer.clear();
                false
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => false,
        }
    }

    fn send_best_effort(&mut self, event: OutboundEvent) {
        match self.state {
            ConnectionState::Open => {
                self.flush_join();
                if !self.transmit(event) {
                    self.dropped_typing += 1;
                }
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                if self.typing_capacity == 0 {
                    self.dropped_typing += 1;
                    return;
                }
                if self.typing_buffer.len() == self.typing_capacity {
                    self.typing_buffer.pop_front();
                    self.dropped_typing += 1;
                }
                self.typing_buffer.push_back(event);
            }
            ConnectionState::Closed => {
                self.dropped_typing += 1;
            }
        }
    }

    fn flush_join(&mut self) {
        if !self.join_pending || !self.state.is_open() {
            return;
        }
        let Some(conversation_id) = self.joined.clone() else {
            self.join_pending = false;
            return;
        };
        if self.transmit(OutboundEvent::JoinConversation { conversation_id }) {
            self.join_pending = false;
        }
    }

    fn flush_typing(&mut self) {
        while self.state.is_open() {
            let Some(event) = self.typing_buffer.pop_front() else {
                break;
            };
            // Typing for a scope we already left is noise
            if self.joined.as_ref() != Some(event.conversation_id()) {
                self.dropped_typing += 1;
                continue;
            }
            if !self.transmit(event) {
                self.dropped_typing += 1;
            }
        }
    }

    /// Send one event; a full queue drops it, anything else means the link is gone
    fn transmit(&mut self, event: OutboundEvent) -> bool {
        match self.transport.send(event) {
            Ok(()) => true,
            Err(SyncError::QueueFull(what)) => {
                debug!("Outbound queue full, {} not sent", what);
                false
            }
            Err(e) => {
                self.connection_failed(e);
                false
            }
        }
    }

    fn connection_failed(&mut self, error: SyncError) {
        warn!("Push channel send failed: {}", error);
        if self.state.is_open() {
            self.state = ConnectionState::Reconnecting;
        }
    }
}
