/// Deterministic replay of a scripted session against the controller
///
/// The script is JSON Lines. Each line is one [`ReplayStep`]; server history
/// is registered up front (or mid-script) and fetches resolve from it as soon
/// as the controller asks. Time only moves on `advance` steps.
use crate::chat_types::{ConversationId, DeliveryState, Message, MessageId, UserRef};
use crate::clock::{Clock, ManualClock};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::projection::SyncSnapshot;
use crate::push::{ChannelTransport, OutboundEvent};
use crate::sync::{Effect, SyncController, SyncEvent};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ReplayStep {
    /// Server-side history for a conversation
    History {
        conversation_id: ConversationId,
        messages: Vec<Message>,
    },
    /// Next fetch of this conversation fails
    FailHistory {
        conversation_id: ConversationId,
        error: String,
    },
    /// Hold fetch results until `release`
    HoldFetches,
    /// Deliver held fetch results, oldest first unless `reverse`
    Release {
        #[serde(default)]
        reverse: bool,
    },
    /// Move the clock forward
    Advance { millis: i64 },
    /// Feed one event to the controller
    Event { event: SyncEvent },
}

/// One line of replay output
#[derive(Debug, Clone)]
pub struct StepReport {
    pub line: usize,
    pub event: &'static str,
    pub effects: Vec<Effect>,
}

pub struct ReplaySession {
    controller: SyncController,
    clock: ManualClock,
    history: HashMap<ConversationId, Vec<Message>>,
    failures: HashMap<ConversationId, String>,
    holding: bool,
    held: VecDeque<SyncEvent>,
    outbound: mpsc::Receiver<OutboundEvent>,
    sent: Vec<OutboundEvent>,
}

impl ReplaySession {
    pub fn new(viewer: UserRef, config: SyncConfig, start: DateTime<Utc>) -> Self {
        let clock = ManualClock::new(start);
        let (tx, outbound) = mpsc::channel(1024);
        // Sequential client refs keep reports identical across runs
        let mut submitted = 0u128;
        let controller = SyncController::new(
            viewer,
            config,
            Arc::new(clock.clone()),
            Box::new(ChannelTransport::new(tx)),
        )
        .with_client_refs(move || {
            submitted += 1;
            Uuid::from_u128(submitted)
        });
        Self {
            controller,
            clock,
            history: HashMap::new(),
            failures: HashMap::new(),
            holding: false,
            held: VecDeque::new(),
            outbound,
            sent: Vec::new(),
        }
    }

    /// Parse a JSON Lines script; blank lines and `#` comments are skipped
    pub fn parse_script(reader: impl BufRead) -> Result<Vec<(usize, ReplayStep)>> {
        let mut steps = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            steps.push((idx + 1, serde_json::from_str(trimmed)?));
        }
        Ok(steps)
    }

    pub fn run(&mut self, steps: Vec<(usize, ReplayStep)>) -> Vec<StepReport> {
        let mut reports = Vec::new();
        for (line, step) in steps {
            reports.extend(self.step(line, step));
        }
        reports
    }

    pub fn step(&mut self, line: usize, step: ReplayStep) -> Vec<StepReport> {
        match step {
            ReplayStep::History {
                conversation_id,
                messages,
            } => {
                self.history.insert(conversation_id, messages);
                Vec::new()
            }
            ReplayStep::FailHistory {
                conversation_id,
                error,
            } => {
                self.failures.insert(conversation_id, error);
                Vec::new()
            }
            ReplayStep::HoldFetches => {
                self.holding = true;
                Vec::new()
            }
            ReplayStep::Release { reverse } => {
                self.holding = false;
                let mut held: Vec<_> = self.held.drain(..).collect();
                if reverse {
                    held.reverse();
                }
                held.into_iter()
                    .flat_map(|event| self.feed(line, event))
                    .collect()
            }
            ReplayStep::Advance { millis } => {
                self.clock.advance(Duration::milliseconds(millis));
                self.feed(line, SyncEvent::Tick)
            }
            ReplayStep::Event { event } => self.feed(line, event),
        }
    }

    /// Apply an event and every completion it triggers
    fn feed(&mut self, line: usize, event: SyncEvent) -> Vec<StepReport> {
        let mut reports = Vec::new();
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            let name = event.name();
            let effects = self.controller.handle(event);
            for effect in &effects {
                match self.complete(effect) {
                    Some(next) if self.holding && matches!(effect, Effect::FetchHistory { .. }) => {
                        self.held.push_back(next);
                    }
                    Some(next) => queue.push_back(next),
                    None => {}
                }
            }
            reports.push(StepReport {
                line,
                event: name,
                effects,
            });
        }

        while let Ok(out) = self.outbound.try_recv() {
            debug!("Outbound {}", out.event_type());
            self.sent.push(out);
        }
        reports
    }

    /// What the server would answer to an effect
    fn complete(&mut self, effect: &Effect) -> Option<SyncEvent> {
        match effect {
            Effect::FetchHistory {
                conversation_id,
                request,
            } => Some(match self.failures.remove(conversation_id) {
                Some(error) => SyncEvent::HistoryFailed {
                    conversation_id: conversation_id.clone(),
                    request: *request,
                    error,
                },
                None => SyncEvent::HistoryLoaded {
                    conversation_id: conversation_id.clone(),
                    request: *request,
                    messages: self
                        .history
                        .get(conversation_id)
                        .cloned()
                        .unwrap_or_default(),
                },
            }),
            Effect::SubmitMessage {
                conversation_id,
                client_ref,
                body,
            } => {
                let now = self.clock.now();
                let message = Message {
                    id: MessageId::new(format!("srv-{}", client_ref)),
                    conversation_id: conversation_id.clone(),
                    sender: self.controller.viewer().clone(),
                    body: body.clone(),
                    created_at: now,
                    updated_at: now,
                    delivery_state: DeliveryState::Sent,
                };
                self.history
                    .entry(conversation_id.clone())
                    .or_default()
                    .push(message.clone());
                Some(SyncEvent::MessageSent { message })
            }
            Effect::Notice { .. } => None,
        }
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot::capture(&self.controller)
    }

    pub fn controller(&self) -> &SyncController {
        &self.controller
    }

    /// Events the adapter handed to the transport so far
    pub fn sent(&self) -> &[OutboundEvent] {
        &self.sent
    }
}
